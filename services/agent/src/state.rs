//! Shared Worker State
//!
//! `AppState` holds everything sessions draw on: configuration, the shared HTTP
//! client and mailer, the lesson content source, and the registry of live
//! sessions that worker shutdown walks.

use crate::config::{Config, EmailConfig};
use crate::engine::{GeminiEngine, GeminiSettings};
use crate::room::Room;
use crate::session::{
    ReportDispatcher, SessionDeps, SessionHandle, SessionOrchestrator, SessionOutcome,
};
use anyhow::Context;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tutor_core::activity::ActivityLog;
use tutor_core::http::USER_AGENT;
use tutor_core::lesson::{ContentSource, HttpContentSource};
use tutor_core::mail::{DEFAULT_SEND_TIMEOUT, DemoMailer, DisabledMailer, Mailer, SmtpMailer};
use tutor_core::tools::{TAVILY_SEARCH_URL, ToolClients, ToolRegistry, ToolSettings};
use uuid::Uuid;

/// Live sessions keyed by id.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<Uuid, SessionHandle>>>,
}

impl SessionRegistry {
    pub async fn register(&self, handle: SessionHandle) {
        self.sessions.lock().await.insert(handle.id(), handle);
    }

    pub async fn remove(&self, id: Uuid) {
        self.sessions.lock().await.remove(&id);
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Fires every session's shutdown callback and waits until each has
    /// reported and closed.
    pub async fn shutdown_all(&self) {
        let handles: Vec<SessionHandle> = self.sessions.lock().await.values().cloned().collect();
        if handles.is_empty() {
            return;
        }
        info!(sessions = handles.len(), "Shutting down live sessions");
        join_all(handles.iter().map(|handle| handle.shutdown())).await;
    }
}

/// Picks the mail transport: demo files, SMTP, or nothing.
pub fn build_mailer(email: &EmailConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    if email.demo_mode {
        info!(dir = %email.demo_dir.display(), "Email demo mode: messages are written to files");
        return Ok(Arc::new(DemoMailer::new(email.demo_dir.clone())));
    }
    match email.smtp_credentials() {
        Some((user, password)) => {
            let mailer = SmtpMailer::new(
                email.provider,
                user.to_string(),
                password.clone(),
                DEFAULT_SEND_TIMEOUT,
            )
            .context("Failed to configure SMTP transport")?;
            info!(provider = email.provider.name(), "Email delivery configured");
            Ok(Arc::new(mailer))
        }
        None => {
            let (user_var, password_var) = email.provider.credential_vars();
            warn!(
                provider = email.provider.name(),
                "{user_var}/{password_var} not set, email delivery disabled"
            );
            Ok(Arc::new(DisabledMailer))
        }
    }
}

/// The shared worker state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub gemini: GeminiSettings,
    pub tool_clients: Arc<ToolClients>,
    pub session_deps: SessionDeps,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(config: Config, persona: String, greeting: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        let mailer = build_mailer(&config.email)?;
        let content: Arc<dyn ContentSource> = Arc::new(HttpContentSource::new(
            http.clone(),
            config.lesson_content_url.clone(),
        ));

        let tool_clients = Arc::new(ToolClients {
            http,
            settings: ToolSettings {
                weather_url: config.weather_webhook_url.clone(),
                trade_url: config.trade_webhook_url.clone(),
                calendar_url: config.calendar_webhook_url.clone(),
                search_url: TAVILY_SEARCH_URL.to_string(),
                tavily_api_key: config.tavily_api_key.clone(),
                vocabulary_url: config.vocabulary_api_url.clone(),
                max_timeout: None,
            },
            mailer: mailer.clone(),
            news: content.clone(),
        });

        let session_deps = SessionDeps {
            content,
            reporter: ReportDispatcher::new(mailer, config.email.admin_email.clone()),
            persona: Arc::from(persona),
            greeting: Arc::from(greeting),
            termination: config.termination,
            poll_interval: config.poll_interval,
            video_enabled: config.video_enabled,
        };

        let gemini = GeminiSettings {
            endpoint: gemini_realtime::LIVE_ENDPOINT.to_string(),
            api_key: config.google_api_key.clone(),
            model: config.gemini_model.clone(),
            voice: config.gemini_voice.clone(),
            temperature: config.gemini_temperature,
        };

        Ok(Self {
            config: Arc::new(config),
            gemini,
            tool_clients,
            session_deps,
            sessions: SessionRegistry::default(),
        })
    }

    /// Runs one session in `room` to completion. The session is registered for
    /// worker shutdown while it runs.
    pub async fn run_session(
        &self,
        session_id: Uuid,
        room: Arc<dyn Room>,
        video_enabled: bool,
    ) -> SessionOutcome {
        let log = ActivityLog::shared();
        let tools = ToolRegistry::new(self.tool_clients.clone(), log.clone());
        let engine = GeminiEngine::new(self.gemini.clone(), tools);

        let deps = SessionDeps {
            video_enabled,
            ..self.session_deps.clone()
        };
        let (orchestrator, handle) = SessionOrchestrator::new(session_id, deps, log);
        self.sessions.register(handle).await;

        let outcome = orchestrator.run(room, Box::new(engine)).await;
        self.sessions.remove(session_id).await;
        outcome
    }
}
