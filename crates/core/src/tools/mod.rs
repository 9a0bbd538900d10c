//! Tool Registry
//!
//! The conversational engine can call these tools mid-conversation. They are
//! exposed as an MCP tool server so the engine discovers their names and JSON
//! schemas and calls them through a single typed router.
//!
//! Every tool produces a speech-safe string. Failures never escape as errors to
//! the engine; they are mapped to a short apology that can be read aloud.

pub mod calendar;
pub mod email;
pub mod news;
pub mod search;
pub mod trade;
pub mod vocabulary;
pub mod weather;

use crate::activity::{LogLevel, SharedActivityLog};
use crate::http::{self, ServiceError};
use crate::lesson::ContentSource;
use crate::mail::Mailer;
use chrono::Utc;
use reqwest::Client;
use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use secrecy::SecretString;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use calendar::CalendarArgs;
pub use email::SendEmailArgs;
pub use search::SearchArgs;
pub use trade::TradeArgs;
pub use vocabulary::{LookupWordArgs, PracticeWordsArgs};
pub use weather::WeatherArgs;

pub const WEBHOOK_USER_ID: &str = "voice_agent_user";
pub const WEBHOOK_SOURCE: &str = "voice_agent";
pub const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

/// A tool call that did not produce its intended result.
///
/// `spoken` is what the engine reads to the user; `kind` is recorded in the
/// activity log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{spoken}")]
pub struct ToolFailure {
    pub kind: &'static str,
    pub spoken: String,
}

impl ToolFailure {
    pub fn new(kind: &'static str, spoken: impl Into<String>) -> Self {
        Self {
            kind,
            spoken: spoken.into(),
        }
    }

    /// Maps a transport failure to the sentence for the named service.
    pub fn from_service(label: &str, err: &ServiceError) -> Self {
        let lower = label.to_lowercase();
        let spoken = match err {
            ServiceError::NotConfigured => {
                format!("The {lower} service is not configured right now, so I can't help with that.")
            }
            ServiceError::Timeout => {
                format!("{label} request timed out. The service might be busy, please try again.")
            }
            ServiceError::Connection(_) => {
                format!("Failed to connect to the {lower} service. Please try again later.")
            }
            ServiceError::Status(code) => {
                format!("{label} service returned status {code}. Please try again.")
            }
            ServiceError::MalformedJson(_) => {
                format!("{label} service returned invalid data. Please try again.")
            }
            ServiceError::Rejected(message) => format!("{label} service error: {message}"),
        };
        Self::new(err.kind(), spoken)
    }
}

/// Endpoints and keys for the externally backed tools. `None` disables a tool.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub weather_url: Option<String>,
    pub trade_url: Option<String>,
    pub calendar_url: Option<String>,
    pub search_url: String,
    pub tavily_api_key: Option<SecretString>,
    pub vocabulary_url: Option<String>,
    /// Upper bound applied to every tool's own timeout.
    pub max_timeout: Option<Duration>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            weather_url: None,
            trade_url: None,
            calendar_url: None,
            search_url: TAVILY_SEARCH_URL.to_string(),
            tavily_api_key: None,
            vocabulary_url: None,
            max_timeout: None,
        }
    }
}

/// Shared collaborators every tool draws on.
pub struct ToolClients {
    pub http: Client,
    pub settings: ToolSettings,
    pub mailer: Arc<dyn Mailer>,
    pub news: Arc<dyn ContentSource>,
}

impl ToolClients {
    /// The tool's timeout, capped by [`ToolSettings::max_timeout`].
    pub fn timeout(&self, default: Duration) -> Duration {
        self.settings
            .max_timeout
            .map_or(default, |cap| cap.min(default))
    }
}

/// Wraps tool parameters in the envelope every webhook expects.
pub fn webhook_envelope(action: &str, params: Value) -> Value {
    let mut body = Map::new();
    body.insert("action".to_string(), json!(action));
    if let Value::Object(params) = params {
        body.extend(params);
    }
    body.insert("user_id".to_string(), json!(WEBHOOK_USER_ID));
    body.insert("timestamp".to_string(), json!(Utc::now().timestamp()));
    body.insert("source".to_string(), json!(WEBHOOK_SOURCE));
    Value::Object(body)
}

/// POSTs an enveloped request to a webhook and returns its JSON response.
///
/// A response object carrying `"success": false` becomes [`ServiceError::Rejected`].
pub(crate) async fn call_webhook(
    http: &Client,
    url: Option<&str>,
    action: &str,
    params: Value,
    timeout: Duration,
) -> Result<Value, ServiceError> {
    let url = url.ok_or(ServiceError::NotConfigured)?;
    let response = http::post_json(http, url, &webhook_envelope(action, params), timeout).await?;

    if response.get("success").and_then(Value::as_bool) == Some(false) {
        let message = response
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("the request could not be completed")
            .to_string();
        return Err(ServiceError::Rejected(message));
    }
    Ok(response)
}

/// MCP tool server for one session.
pub struct ToolRegistry {
    clients: Arc<ToolClients>,
    log: SharedActivityLog,
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for ToolRegistry {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tool_router]
impl ToolRegistry {
    pub fn new(clients: Arc<ToolClients>, log: SharedActivityLog) -> Self {
        Self {
            clients,
            log,
            tool_router: Self::tool_router(),
        }
    }

    /// Records the outcome in the session log and hands the engine its sentence.
    async fn record(
        &self,
        tool: &str,
        outcome: Result<String, ToolFailure>,
    ) -> Result<String, String> {
        let mut log = self.log.lock().await;
        match outcome {
            Ok(text) => {
                log.add_log(
                    LogLevel::Info,
                    format!("Tool {tool} completed"),
                    Some(json!({ "tool": tool })),
                );
                Ok(text)
            }
            Err(failure) => {
                log.add_log(
                    LogLevel::Error,
                    format!("Tool {tool} failed: {}", failure.spoken),
                    Some(json!({ "tool": tool, "kind": failure.kind })),
                );
                Err(failure.spoken)
            }
        }
    }

    #[tool(description = "Get the current weather for a city.")]
    pub async fn get_weather(&self, args: Parameters<WeatherArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'get_weather'");
        let outcome = weather::run(&self.clients, args.0).await;
        self.record("get_weather", outcome).await
    }

    #[tool(
        description = "Get a sales analysis for the last N days: best sellers, worst sellers, or both."
    )]
    pub async fn get_trade_results(&self, args: Parameters<TradeArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'get_trade_results'");
        let outcome = trade::run(&self.clients, args.0).await;
        self.record("get_trade_results", outcome).await
    }

    #[tool(description = "List the user's calendar events for a time range.")]
    pub async fn get_calendar_events(
        &self,
        args: Parameters<CalendarArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'get_calendar_events'");
        let outcome = calendar::run(&self.clients, args.0).await;
        self.record("get_calendar_events", outcome).await
    }

    #[tool(description = "Search the web for up-to-date information.")]
    pub async fn search_web(&self, args: Parameters<SearchArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'search_web'");
        let outcome = search::run(&self.clients, args.0).await;
        self.record("search_web", outcome).await
    }

    #[tool(description = "Send an email on the user's behalf.")]
    pub async fn send_email(&self, args: Parameters<SendEmailArgs>) -> Result<String, String> {
        info!(to = %args.0.to_email, "Executing tool 'send_email'");
        let outcome = email::run(&self.clients, args.0).await;
        self.record("send_email", outcome).await
    }

    #[tool(description = "Look up an English word in the student's vocabulary list.")]
    pub async fn lookup_vocabulary(
        &self,
        args: Parameters<LookupWordArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'lookup_vocabulary'");
        let outcome = vocabulary::lookup(&self.clients, args.0).await;
        self.record("lookup_vocabulary", outcome).await
    }

    #[tool(description = "Get a few untrained words from the student's vocabulary for practice.")]
    pub async fn get_practice_words(
        &self,
        args: Parameters<PracticeWordsArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'get_practice_words'");
        let outcome = vocabulary::practice(&self.clients, args.0).await;
        self.record("get_practice_words", outcome).await
    }

    #[tool(description = "Get today's news digest for discussion.")]
    pub async fn get_today_news(&self) -> Result<String, String> {
        info!("Executing tool 'get_today_news'");
        let outcome = news::run(&self.clients, &self.log).await;
        self.record("get_today_news", outcome).await
    }
}
