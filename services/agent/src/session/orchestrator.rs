//! The session state machine.
//!
//! [`SessionOrchestrator::run`] drives a session through fetch, compose,
//! engine start and conversation, then waits for the first termination
//! trigger and finishes with exactly one report attempt. The host keeps a
//! [`SessionHandle`] to observe the state and to request shutdown.

use super::lifecycle::SessionState;
use super::monitor::SessionEventMonitor;
use super::report::ReportDispatcher;
use crate::config::TerminationStrategy;
use crate::engine::{EngineChannels, RealtimeEngine};
use crate::room::Room;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, error, info, warn};
use tutor_core::activity::{LogLevel, SharedActivityLog};
use tutor_core::generic_types::{GenericClientInput, GenericServerEvent, GenericSessionConfig};
use tutor_core::instructions::compose;
use tutor_core::lesson::{ContentSource, parse_lesson};
use uuid::Uuid;

/// Upper bound on flushing remaining engine events into the log while draining.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// What ended the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationTrigger {
    HostShutdown,
    ParticipantsLeft,
    EngineFinished,
    EngineStartFailed,
}

impl TerminationTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostShutdown => "host_shutdown",
            Self::ParticipantsLeft => "participants_left",
            Self::EngineFinished => "engine_finished",
            Self::EngineStartFailed => "engine_start_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    pub trigger: TerminationTrigger,
    pub report_sent: bool,
    pub final_state: SessionState,
}

/// Worker-wide collaborators a session is built from.
#[derive(Clone)]
pub struct SessionDeps {
    pub content: Arc<dyn ContentSource>,
    pub reporter: ReportDispatcher,
    pub persona: Arc<str>,
    pub greeting: Arc<str>,
    pub termination: TerminationStrategy,
    pub poll_interval: Duration,
    pub video_enabled: bool,
}

/// Host-side view of a running session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    id: Uuid,
    shutdown: Arc<watch::Sender<bool>>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Fires the host shutdown callback without waiting.
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Requests shutdown and resolves once the session has reported and closed.
    pub async fn shutdown(&self) {
        self.request_shutdown();
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| s.is_terminal()).await;
    }
}

pub struct SessionOrchestrator {
    id: Uuid,
    deps: SessionDeps,
    log: SharedActivityLog,
    state: watch::Sender<SessionState>,
    shutdown: watch::Receiver<bool>,
}

impl SessionOrchestrator {
    /// `log` is this session's own log; tools built for the session should share it.
    pub fn new(id: Uuid, deps: SessionDeps, log: SharedActivityLog) -> (Self, SessionHandle) {
        let (state_tx, state_rx) = watch::channel(SessionState::Init);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let orchestrator = Self {
            id,
            deps,
            log,
            state: state_tx,
            shutdown: shutdown_rx,
        };
        let handle = SessionHandle {
            id,
            shutdown: Arc::new(shutdown_tx),
            state: state_rx,
        };
        (orchestrator, handle)
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn advance(&self, next: SessionState) {
        let current = self.state();
        match current.transition_to(next) {
            Ok(next) => {
                info!(from = %current, to = %next, "Session state changed");
                self.state.send_replace(next);
            }
            Err(e) => error!(error = %e, "Rejected session state change"),
        }
    }

    async fn record(&self, level: LogLevel, message: &str, data: serde_json::Value) {
        self.log.lock().await.add_log(level, message, Some(data));
    }

    pub async fn run(
        mut self,
        room: Arc<dyn Room>,
        mut engine: Box<dyn RealtimeEngine>,
    ) -> SessionOutcome {
        self.advance(SessionState::Fetching);
        {
            let mut log = self.log.lock().await;
            log.clear();
            log.add_log(
                LogLevel::Info,
                "Session started",
                Some(json!({ "session_id": self.id.to_string(), "room": room.name() })),
            );
        }
        let raw = self.deps.content.fetch(&self.log).await;

        self.advance(SessionState::Composing);
        let lesson = raw.as_deref().map(parse_lesson).unwrap_or_default();
        let instructions = compose(
            &self.deps.persona,
            &lesson.vocabulary_focus,
            &lesson.digest,
        );
        self.record(
            LogLevel::Info,
            "Instructions composed",
            json!({
                "characters": instructions.chars().count(),
                "vocabulary": !lesson.vocabulary_focus.trim().is_empty(),
                "digest": !lesson.digest.trim().is_empty(),
            }),
        )
        .await;

        self.advance(SessionState::Starting);
        let config = GenericSessionConfig {
            instructions,
            video_enabled: self.deps.video_enabled,
        };
        let trigger = match engine.start(config).await {
            Ok(channels) => self.converse(room, engine.as_mut(), channels).await,
            Err(e) => {
                self.record(
                    LogLevel::Error,
                    "Failed to start conversational engine",
                    json!({ "error": format!("{e:#}") }),
                )
                .await;
                self.advance(SessionState::Draining);
                TerminationTrigger::EngineStartFailed
            }
        };

        self.advance(SessionState::Reporting);
        let report_sent = {
            let mut log = self.log.lock().await;
            let sent = self.deps.reporter.dispatch(&log).await;
            log.clear();
            sent
        };
        self.advance(SessionState::Closed);

        info!(trigger = trigger.as_str(), report_sent, "Session closed");
        SessionOutcome {
            session_id: self.id,
            trigger,
            report_sent,
            final_state: self.state(),
        }
    }

    async fn converse(
        &mut self,
        room: Arc<dyn Room>,
        engine: &mut dyn RealtimeEngine,
        channels: EngineChannels,
    ) -> TerminationTrigger {
        let EngineChannels { events, input } = channels;

        let forwarder = room.take_media().map(|media| {
            tokio::spawn(forward_media(media, input, self.deps.video_enabled).in_current_span())
        });
        let (done_tx, mut engine_done) = watch::channel(false);
        let pump = tokio::spawn(
            pump_events(
                events,
                room.clone(),
                SessionEventMonitor::new(self.log.clone()),
                done_tx,
            )
            .in_current_span(),
        );

        self.advance(SessionState::Active);
        self.record(
            LogLevel::Info,
            "Conversational engine started",
            json!({ "video_enabled": self.deps.video_enabled }),
        )
        .await;

        if let Err(e) = engine.generate_reply(&self.deps.greeting).await {
            self.record(
                LogLevel::Warning,
                "Greeting generation failed",
                json!({ "error": format!("{e:#}") }),
            )
            .await;
        }

        let trigger = self
            .wait_for_termination(room.as_ref(), &mut engine_done)
            .await;
        self.record(
            LogLevel::Info,
            "Session ending",
            json!({ "trigger": trigger.as_str() }),
        )
        .await;

        if trigger == TerminationTrigger::HostShutdown {
            self.advance(SessionState::ShutdownRequested);
        } else {
            self.advance(SessionState::Draining);
        }

        if let Err(e) = engine.close().await {
            warn!(error = %e, "Failed to close conversational engine");
        }
        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }

        if trigger == TerminationTrigger::HostShutdown {
            pump.abort();
        } else {
            let abort = pump.abort_handle();
            if tokio::time::timeout(DRAIN_TIMEOUT, pump).await.is_err() {
                warn!("Engine events did not drain in time");
                abort.abort();
            }
        }
        trigger
    }

    /// Waits for the first trigger. The host callback is checked first, so it
    /// wins when several triggers are ready at once.
    async fn wait_for_termination(
        &mut self,
        room: &dyn Room,
        engine_done: &mut watch::Receiver<bool>,
    ) -> TerminationTrigger {
        let poll = self.deps.termination == TerminationStrategy::Poll;
        let mut ticker = tokio::time::interval(self.deps.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = &mut self.shutdown;

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => return TerminationTrigger::HostShutdown,
                _ = engine_done.wait_for(|done| *done) => return TerminationTrigger::EngineFinished,
                _ = ticker.tick(), if poll => {
                    if room.remote_participant_count() == 0 {
                        info!(room = room.name(), "No participants left in room");
                        return TerminationTrigger::ParticipantsLeft;
                    }
                }
            }
        }
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // A dropped handle can never request shutdown.
    if shutdown.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn forward_media(
    mut media: mpsc::Receiver<GenericClientInput>,
    input: mpsc::Sender<GenericClientInput>,
    video_enabled: bool,
) {
    while let Some(item) = media.recv().await {
        if !video_enabled && matches!(item, GenericClientInput::VideoFrame { .. }) {
            continue;
        }
        if input.send(item).await.is_err() {
            break;
        }
    }
}

async fn pump_events(
    mut events: mpsc::Receiver<GenericServerEvent>,
    room: Arc<dyn Room>,
    monitor: SessionEventMonitor,
    done: watch::Sender<bool>,
) {
    while let Some(event) = events.recv().await {
        monitor.handle(&event).await;
        if event == GenericServerEvent::Closed {
            break;
        }
        room.publish(&event).await;
    }
    done.send_replace(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::report::test_support::MockSmtpRelay;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tutor_core::activity::ActivityLog;
    use tutor_core::generic_types::{ConversationItem, Role};
    use tutor_core::instructions::{DIGEST_HEADING, VOCABULARY_HEADING};

    const PERSONA: &str = "You are a patient English tutor.";

    struct FixedContent(Option<&'static str>);

    #[async_trait]
    impl ContentSource for FixedContent {
        async fn fetch(&self, log: &SharedActivityLog) -> Option<String> {
            if self.0.is_none() {
                log.lock().await.warning("Lesson content source is not configured");
            }
            self.0.map(str::to_string)
        }
    }

    struct FakeRoom {
        participants: AtomicUsize,
        published: StdMutex<Vec<GenericServerEvent>>,
        media: StdMutex<Option<mpsc::Receiver<GenericClientInput>>>,
    }

    impl FakeRoom {
        fn with_participants(count: usize) -> Arc<Self> {
            Arc::new(Self {
                participants: AtomicUsize::new(count),
                published: StdMutex::new(Vec::new()),
                media: StdMutex::new(None),
            })
        }
    }

    #[async_trait]
    impl Room for FakeRoom {
        fn name(&self) -> &str {
            "test-room"
        }

        fn remote_participant_count(&self) -> usize {
            self.participants.load(Ordering::SeqCst)
        }

        async fn publish(&self, event: &GenericServerEvent) {
            self.published.lock().unwrap().push(event.clone());
        }

        fn take_media(&self) -> Option<mpsc::Receiver<GenericClientInput>> {
            self.media.lock().unwrap().take()
        }
    }

    #[derive(Default)]
    struct EngineProbe {
        config: StdMutex<Option<GenericSessionConfig>>,
        greeting: StdMutex<Option<String>>,
        closed: AtomicBool,
    }

    struct FakeEngine {
        fail_start: bool,
        fail_greeting: bool,
        script: Vec<GenericServerEvent>,
        finish_after_script: bool,
        probe: Arc<EngineProbe>,
        events: Option<mpsc::Sender<GenericServerEvent>>,
        input: Option<mpsc::Receiver<GenericClientInput>>,
    }

    impl FakeEngine {
        fn new(probe: Arc<EngineProbe>) -> Self {
            Self {
                fail_start: false,
                fail_greeting: false,
                script: Vec::new(),
                finish_after_script: false,
                probe,
                events: None,
                input: None,
            }
        }
    }

    #[async_trait]
    impl RealtimeEngine for FakeEngine {
        async fn start(&mut self, config: GenericSessionConfig) -> anyhow::Result<EngineChannels> {
            *self.probe.config.lock().unwrap() = Some(config);
            if self.fail_start {
                return Err(anyhow!("live endpoint refused the connection"));
            }
            let (event_tx, event_rx) = mpsc::channel(64);
            for event in self.script.drain(..) {
                event_tx.try_send(event).unwrap();
            }
            if !self.finish_after_script {
                self.events = Some(event_tx);
            }
            let (input_tx, input_rx) = mpsc::channel(64);
            self.input = Some(input_rx);
            Ok(EngineChannels {
                events: event_rx,
                input: input_tx,
            })
        }

        async fn generate_reply(&mut self, instructions: &str) -> anyhow::Result<()> {
            *self.probe.greeting.lock().unwrap() = Some(instructions.to_string());
            if self.fail_greeting {
                return Err(anyhow!("model refused to speak"));
            }
            Ok(())
        }

        async fn close(&mut self) -> anyhow::Result<()> {
            self.probe.closed.store(true, Ordering::SeqCst);
            self.events = None;
            Ok(())
        }
    }

    /// A mailer expecting exactly one report; bodies land in the returned vector.
    fn reporter() -> (ReportDispatcher, Arc<StdMutex<Vec<String>>>) {
        let bodies = Arc::new(StdMutex::new(Vec::new()));
        let sink = bodies.clone();
        let mut mailer = MockSmtpRelay::new();
        mailer.expect_send().times(1).returning(move |email| {
            sink.lock().unwrap().push(email.body.clone());
            Ok(())
        });
        (
            ReportDispatcher::new(Arc::new(mailer), Some("admin@example.com".into())),
            bodies,
        )
    }

    fn deps(
        content: Option<&'static str>,
        termination: TerminationStrategy,
        reporter: ReportDispatcher,
    ) -> SessionDeps {
        SessionDeps {
            content: Arc::new(FixedContent(content)),
            reporter,
            persona: Arc::from(PERSONA),
            greeting: Arc::from("Greet the student warmly."),
            termination,
            poll_interval: Duration::from_millis(10),
            video_enabled: false,
        }
    }

    #[tokio::test]
    async fn test_shutdown_racing_empty_room_reports_exactly_once() {
        let (reporter, bodies) = reporter();
        let log = ActivityLog::shared();
        let (orchestrator, handle) = SessionOrchestrator::new(
            Uuid::new_v4(),
            deps(None, TerminationStrategy::Poll, reporter),
            log.clone(),
        );
        let probe = Arc::new(EngineProbe::default());

        // Both triggers are ready the moment the session becomes active.
        handle.request_shutdown();
        let outcome = orchestrator
            .run(FakeRoom::with_participants(0), Box::new(FakeEngine::new(probe.clone())))
            .await;

        assert_eq!(outcome.trigger, TerminationTrigger::HostShutdown);
        assert_eq!(outcome.final_state, SessionState::Closed);
        assert!(outcome.report_sent);
        assert_eq!(bodies.lock().unwrap().len(), 1);
        assert!(probe.closed.load(Ordering::SeqCst));
        assert!(log.lock().await.is_empty());

        handle.request_shutdown();
        assert_eq!(handle.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_participants_leaving_drains_events_into_report() {
        let (reporter, bodies) = reporter();
        let (orchestrator, handle) = SessionOrchestrator::new(
            Uuid::new_v4(),
            deps(None, TerminationStrategy::Poll, reporter),
            ActivityLog::shared(),
        );
        let probe = Arc::new(EngineProbe::default());
        let mut engine = FakeEngine::new(probe.clone());
        engine.script = vec![
            GenericServerEvent::Transcription {
                text: Some("Hi".into()),
                is_final: Some(false),
            },
            GenericServerEvent::Transcription {
                text: Some("Hi there".into()),
                is_final: Some(true),
            },
            GenericServerEvent::ConversationItemAdded(ConversationItem {
                role: Some(Role::Assistant),
                text: Some("Hello! Ready for today's words?".into()),
                interrupted: Some(false),
            }),
        ];

        let room = FakeRoom::with_participants(1);
        let session = tokio::spawn(orchestrator.run(room.clone(), Box::new(engine)));

        let mut states = handle.subscribe();
        states
            .wait_for(|s| *s == SessionState::Active)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        room.participants.store(0, Ordering::SeqCst);

        let outcome = session.await.unwrap();
        assert_eq!(outcome.trigger, TerminationTrigger::ParticipantsLeft);
        assert!(outcome.report_sent);

        let bodies = bodies.lock().unwrap();
        let report = &bodies[0];
        assert!(report.contains("[INFO] Session started"));
        assert!(report.contains("[WARNING] Lesson content source is not configured"));
        assert!(report.contains("[INFO] User said: Hi there"));
        assert!(!report.contains("User said: Hi |"));
        assert!(report.contains("Hello! Ready for today's words?"));
        assert!(report.contains("participants_left"));

        assert_eq!(room.published.lock().unwrap().len(), 3);
        assert_eq!(
            probe.greeting.lock().unwrap().as_deref(),
            Some("Greet the student warmly.")
        );
    }

    #[tokio::test]
    async fn test_missing_content_degrades_to_persona_only() {
        let (reporter, _bodies) = reporter();
        let (orchestrator, handle) = SessionOrchestrator::new(
            Uuid::new_v4(),
            deps(None, TerminationStrategy::Callback, reporter),
            ActivityLog::shared(),
        );
        let probe = Arc::new(EngineProbe::default());
        handle.request_shutdown();

        orchestrator
            .run(FakeRoom::with_participants(1), Box::new(FakeEngine::new(probe.clone())))
            .await;

        let config = probe.config.lock().unwrap().clone().unwrap();
        assert_eq!(config.instructions, PERSONA);
        assert!(!config.video_enabled);
    }

    #[tokio::test]
    async fn test_lesson_content_is_composed_into_instructions() {
        let (reporter, _bodies) = reporter();
        let (orchestrator, handle) = SessionOrchestrator::new(
            Uuid::new_v4(),
            deps(
                Some("Vocabulary Focus:\n- apple (яблоко)\n---START_OF_DIGEST---\n1. TITLE: AI jobs\n   SUMMARY: Robots are hiring."),
                TerminationStrategy::Callback,
                reporter,
            ),
            ActivityLog::shared(),
        );
        let probe = Arc::new(EngineProbe::default());
        handle.request_shutdown();

        orchestrator
            .run(FakeRoom::with_participants(1), Box::new(FakeEngine::new(probe.clone())))
            .await;

        let instructions = probe.config.lock().unwrap().clone().unwrap().instructions;
        let vocabulary = instructions.find(VOCABULARY_HEADING).unwrap();
        let digest = instructions.find(DIGEST_HEADING).unwrap();
        assert!(instructions.starts_with(PERSONA));
        assert!(vocabulary < digest);
        assert!(instructions.contains("apple (яблоко)"));
        assert!(instructions.contains("AI jobs"));
        assert!(!instructions.contains("---START_OF_DIGEST---"));
    }

    #[tokio::test]
    async fn test_greeting_failure_is_a_warning_not_fatal() {
        let (reporter, bodies) = reporter();
        let (orchestrator, handle) = SessionOrchestrator::new(
            Uuid::new_v4(),
            deps(None, TerminationStrategy::Callback, reporter),
            ActivityLog::shared(),
        );
        let mut engine = FakeEngine::new(Arc::new(EngineProbe::default()));
        engine.fail_greeting = true;

        let session = tokio::spawn(orchestrator.run(FakeRoom::with_participants(1), Box::new(engine)));
        handle
            .subscribe()
            .wait_for(|s| *s == SessionState::Active)
            .await
            .unwrap();
        handle.shutdown().await;

        let outcome = session.await.unwrap();
        assert_eq!(outcome.trigger, TerminationTrigger::HostShutdown);
        let bodies = bodies.lock().unwrap();
        assert!(bodies[0].contains("[WARNING] Greeting generation failed"));
        assert!(bodies[0].contains("model refused to speak"));
    }

    #[tokio::test]
    async fn test_engine_start_failure_still_reports_once() {
        let (reporter, bodies) = reporter();
        let (orchestrator, handle) = SessionOrchestrator::new(
            Uuid::new_v4(),
            deps(None, TerminationStrategy::Poll, reporter),
            ActivityLog::shared(),
        );
        let probe = Arc::new(EngineProbe::default());
        let mut engine = FakeEngine::new(probe.clone());
        engine.fail_start = true;

        let states = handle.subscribe();
        let outcome = orchestrator
            .run(FakeRoom::with_participants(1), Box::new(engine))
            .await;

        assert_eq!(outcome.trigger, TerminationTrigger::EngineStartFailed);
        assert_eq!(outcome.final_state, SessionState::Closed);
        assert!(outcome.report_sent);
        assert!(probe.greeting.lock().unwrap().is_none());
        assert!(bodies.lock().unwrap()[0].contains("[ERROR] Failed to start conversational engine"));
        assert_eq!(*states.borrow(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_engine_completion_drains_under_callback_strategy() {
        let (reporter, bodies) = reporter();
        let (orchestrator, _handle) = SessionOrchestrator::new(
            Uuid::new_v4(),
            deps(None, TerminationStrategy::Callback, reporter),
            ActivityLog::shared(),
        );
        let mut engine = FakeEngine::new(Arc::new(EngineProbe::default()));
        engine.script = vec![GenericServerEvent::Error {
            message: Some("quota exhausted".into()),
            recoverable: Some(false),
        }];
        engine.finish_after_script = true;

        // An empty room is ignored under the callback strategy.
        let outcome = orchestrator
            .run(FakeRoom::with_participants(0), Box::new(engine))
            .await;

        assert_eq!(outcome.trigger, TerminationTrigger::EngineFinished);
        assert!(bodies.lock().unwrap()[0].contains("[ERROR] Engine error: quota exhausted"));
    }

    #[tokio::test]
    async fn test_handle_shutdown_resolves_after_close() {
        let (reporter, bodies) = reporter();
        let (orchestrator, handle) = SessionOrchestrator::new(
            Uuid::new_v4(),
            deps(None, TerminationStrategy::Poll, reporter),
            ActivityLog::shared(),
        );
        assert_eq!(orchestrator.state(), SessionState::Init);

        let session = tokio::spawn(orchestrator.run(
            FakeRoom::with_participants(1),
            Box::new(FakeEngine::new(Arc::new(EngineProbe::default()))),
        ));
        handle.shutdown().await;

        assert_eq!(handle.state(), SessionState::Closed);
        assert_eq!(bodies.lock().unwrap().len(), 1);
        assert!(session.await.unwrap().report_sent);
    }

    #[tokio::test]
    async fn test_video_frames_dropped_when_disabled() {
        let (media_tx, media_rx) = mpsc::channel(8);
        let (input_tx, mut input_rx) = mpsc::channel(8);
        media_tx
            .send(GenericClientInput::VideoFrame {
                mime_type: "image/jpeg".into(),
                data: "AAA=".into(),
            })
            .await
            .unwrap();
        media_tx
            .send(GenericClientInput::Audio(vec![1, 2]))
            .await
            .unwrap();
        drop(media_tx);

        forward_media(media_rx, input_tx, false).await;
        assert_eq!(input_rx.recv().await, Some(GenericClientInput::Audio(vec![1, 2])));
        assert_eq!(input_rx.recv().await, None);
    }
}
