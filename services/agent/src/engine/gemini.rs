//! Gemini Live implementation of [`RealtimeEngine`].

use super::{EngineChannels, RealtimeEngine, tools::ToolBridge};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use gemini_realtime::{
    AudioTranscriptionConfig, Content, FunctionDeclaration, FunctionResponse, GenerationConfig,
    LiveError, LiveReceiver, LiveSender, ResponseModality, ServerContent, ServerMessage, Setup,
    SpeechConfig, Tool,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};
use tutor_core::generic_types::{
    ConversationItem, GenericClientInput, GenericServerEvent, GenericSessionConfig, Role,
};
use tutor_core::tools::ToolRegistry;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Connection parameters for one Live session.
#[derive(Clone, Debug)]
pub struct GeminiSettings {
    pub endpoint: String,
    pub api_key: SecretString,
    pub model: String,
    pub voice: String,
    pub temperature: f32,
}

enum EngineCommand {
    Reply(String),
    Close,
}

pub struct GeminiEngine {
    settings: GeminiSettings,
    tools: Option<ToolRegistry>,
    commands: Option<mpsc::Sender<EngineCommand>>,
    task: Option<JoinHandle<()>>,
}

impl GeminiEngine {
    pub fn new(settings: GeminiSettings, tools: ToolRegistry) -> Self {
        Self {
            settings,
            tools: Some(tools),
            commands: None,
            task: None,
        }
    }

    fn setup(&self, config: &GenericSessionConfig, declarations: Vec<FunctionDeclaration>) -> Setup {
        Setup {
            model: self.settings.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec![ResponseModality::Audio],
                temperature: Some(self.settings.temperature),
                speech_config: Some(SpeechConfig::prebuilt(&self.settings.voice)),
            },
            system_instruction: Some(Content::text(None, config.instructions.clone())),
            tools: if declarations.is_empty() {
                Vec::new()
            } else {
                vec![Tool {
                    function_declarations: declarations,
                }]
            },
            input_audio_transcription: Some(AudioTranscriptionConfig {}),
            output_audio_transcription: Some(AudioTranscriptionConfig {}),
        }
    }
}

#[async_trait]
impl RealtimeEngine for GeminiEngine {
    async fn start(&mut self, config: GenericSessionConfig) -> Result<EngineChannels> {
        let registry = self
            .tools
            .take()
            .context("Gemini engine has already been started")?;
        let bridge = ToolBridge::start(registry)
            .await
            .context("Failed to start the session tool server")?;
        let declarations = bridge.declarations().await?;
        info!(tools = declarations.len(), "Declaring tools to Gemini");

        let setup = self.setup(&config, declarations);
        let (sender, receiver) = gemini_realtime::connect(
            &self.settings.endpoint,
            self.settings.api_key.expose_secret(),
            setup,
        )
        .await
        .context("Failed to open Gemini Live session")?;

        let (event_tx, event_rx) = mpsc::channel(256);
        let (input_tx, input_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(8);

        let live = LiveLoop {
            sender,
            receiver,
            bridge: Arc::new(bridge),
            events: event_tx,
            video_enabled: config.video_enabled,
            turn: TurnState::default(),
        };
        self.task = Some(tokio::spawn(
            live.run(input_rx, command_rx).in_current_span(),
        ));
        self.commands = Some(command_tx);

        Ok(EngineChannels {
            events: event_rx,
            input: input_tx,
        })
    }

    async fn generate_reply(&mut self, instructions: &str) -> Result<()> {
        let commands = self
            .commands
            .as_ref()
            .context("Gemini engine is not started")?;
        commands
            .send(EngineCommand::Reply(instructions.to_string()))
            .await
            .map_err(|_| anyhow!("Gemini session has already ended"))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(EngineCommand::Close).await;
        }
        if let Some(task) = self.task.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(CLOSE_TIMEOUT, task).await.is_err() {
                warn!("Gemini session did not close in time, aborting");
                abort.abort();
            }
        }
        Ok(())
    }
}

/// Owns the Live connection once the session has started.
struct LiveLoop {
    sender: LiveSender,
    receiver: LiveReceiver,
    bridge: Arc<ToolBridge>,
    events: mpsc::Sender<GenericServerEvent>,
    video_enabled: bool,
    turn: TurnState,
}

impl LiveLoop {
    async fn run(
        mut self,
        mut input: mpsc::Receiver<GenericClientInput>,
        mut commands: mpsc::Receiver<EngineCommand>,
    ) {
        let (tool_tx, mut tool_results) = mpsc::channel::<Vec<FunctionResponse>>(8);

        loop {
            let result = tokio::select! {
                command = commands.recv() => match command {
                    Some(EngineCommand::Reply(text)) => self.sender.send_user_turn(&text).await,
                    Some(EngineCommand::Close) | None => break,
                },
                Some(item) = input.recv() => self.forward(item).await,
                Some(responses) = tool_results.recv() => {
                    self.sender.send_tool_responses(responses).await
                }
                message = self.receiver.next() => match message {
                    Some(Ok(message)) => {
                        self.on_server_message(message, &tool_tx).await;
                        Ok(())
                    }
                    Some(Err(e)) => Err(e),
                    None => {
                        info!("Gemini Live stream ended");
                        break;
                    }
                },
            };

            if let Err(e) = result {
                error!(error = %e, "Gemini Live session failed");
                self.emit(GenericServerEvent::Error {
                    message: Some(e.to_string()),
                    recoverable: Some(false),
                })
                .await;
                break;
            }
        }

        if let Err(e) = self.sender.close().await {
            debug!(error = %e, "Gemini socket was already closed");
        }
        self.emit(GenericServerEvent::Closed).await;
    }

    async fn forward(&mut self, item: GenericClientInput) -> Result<(), LiveError> {
        match item {
            GenericClientInput::Audio(pcm) => self.sender.send_audio(&pcm).await,
            GenericClientInput::VideoFrame { mime_type, data } if self.video_enabled => {
                self.sender.send_video(&mime_type, &data).await
            }
            GenericClientInput::VideoFrame { .. } => Ok(()),
            GenericClientInput::Text(text) => self.sender.send_user_turn(&text).await,
        }
    }

    async fn on_server_message(
        &mut self,
        message: ServerMessage,
        tool_tx: &mpsc::Sender<Vec<FunctionResponse>>,
    ) {
        if let Some(content) = message.server_content {
            for event in self.turn.absorb(content) {
                self.emit(event).await;
            }
        }

        if let Some(call) = message.tool_call {
            // Tool calls can take tens of seconds; run them off the media path.
            let bridge = self.bridge.clone();
            let tool_tx = tool_tx.clone();
            tokio::spawn(
                async move {
                    let mut responses = Vec::with_capacity(call.function_calls.len());
                    for call in call.function_calls {
                        let spoken = bridge.call(&call.name, call.args).await;
                        responses.push(FunctionResponse {
                            id: call.id,
                            name: call.name,
                            response: json!({ "result": spoken }),
                        });
                    }
                    if !responses.is_empty() {
                        let _ = tool_tx.send(responses).await;
                    }
                }
                .in_current_span(),
            );
        }

        if let Some(cancelled) = message.tool_call_cancellation {
            debug!(?cancelled, "Gemini cancelled pending tool calls");
        }
        if let Some(go_away) = message.go_away {
            warn!(time_left = ?go_away.time_left, "Gemini will end the session soon");
        }
    }

    async fn emit(&self, event: GenericServerEvent) {
        let _ = self.events.send(event).await;
    }
}

/// Accumulates streamed transcription chunks into whole turns.
#[derive(Debug, Default)]
struct TurnState {
    user: String,
    assistant: String,
    speaking: bool,
}

impl TurnState {
    fn absorb(&mut self, content: ServerContent) -> Vec<GenericServerEvent> {
        let mut events = Vec::new();

        if let Some(transcription) = content.input_transcription {
            if let Some(text) = transcription.text.filter(|t| !t.is_empty()) {
                self.user.push_str(&text);
                events.push(GenericServerEvent::Transcription {
                    text: Some(text),
                    is_final: Some(false),
                });
            }
            if transcription.finished == Some(true) {
                self.finish_user_turn(&mut events);
            }
        }

        // The model answering means the user has stopped talking.
        if content.model_turn.is_some() || content.output_transcription.is_some() {
            self.finish_user_turn(&mut events);
        }

        if let Some(turn) = content.model_turn {
            for blob in turn.parts.into_iter().filter_map(|p| p.inline_data) {
                if !self.speaking {
                    self.speaking = true;
                    events.push(GenericServerEvent::Speaking);
                }
                events.push(GenericServerEvent::AudioChunk(blob.data));
            }
        }

        if let Some(text) = content.output_transcription.and_then(|t| t.text) {
            self.assistant.push_str(&text);
        }

        if content.interrupted == Some(true) {
            self.finish_model_turn(true, &mut events);
        } else if content.turn_complete == Some(true) {
            self.finish_model_turn(false, &mut events);
        }

        events
    }

    fn finish_user_turn(&mut self, events: &mut Vec<GenericServerEvent>) {
        let text = std::mem::take(&mut self.user).trim().to_string();
        if text.is_empty() {
            return;
        }
        events.push(GenericServerEvent::Transcription {
            text: Some(text.clone()),
            is_final: Some(true),
        });
        events.push(GenericServerEvent::ConversationItemAdded(ConversationItem {
            role: Some(Role::User),
            text: Some(text),
            interrupted: Some(false),
        }));
    }

    fn finish_model_turn(&mut self, interrupted: bool, events: &mut Vec<GenericServerEvent>) {
        if self.speaking {
            self.speaking = false;
            events.push(GenericServerEvent::SpeakingDone);
        }
        let text = std::mem::take(&mut self.assistant).trim().to_string();
        if !text.is_empty() {
            events.push(GenericServerEvent::ConversationItemAdded(ConversationItem {
                role: Some(Role::Assistant),
                text: Some(text),
                interrupted: Some(interrupted),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use gemini_realtime::{Blob, Part, Transcription};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};
    use tutor_core::activity::{ActivityLog, SharedActivityLog};
    use tutor_core::lesson::ContentSource;
    use tutor_core::mail::DisabledMailer;
    use tutor_core::tools::{ToolClients, ToolSettings};

    fn transcript(text: &str, finished: Option<bool>) -> Option<Transcription> {
        Some(Transcription {
            text: Some(text.to_string()),
            finished,
        })
    }

    #[test]
    fn test_user_transcription_accumulates_into_one_final() {
        let mut turn = TurnState::default();

        let events = turn.absorb(ServerContent {
            input_transcription: transcript("Hello ", None),
            ..Default::default()
        });
        assert_eq!(
            events,
            vec![GenericServerEvent::Transcription {
                text: Some("Hello ".into()),
                is_final: Some(false)
            }]
        );

        turn.absorb(ServerContent {
            input_transcription: transcript("there", None),
            ..Default::default()
        });

        let events = turn.absorb(ServerContent {
            output_transcription: transcript("Hi!", None),
            ..Default::default()
        });
        assert_eq!(
            events,
            vec![
                GenericServerEvent::Transcription {
                    text: Some("Hello there".into()),
                    is_final: Some(true)
                },
                GenericServerEvent::ConversationItemAdded(ConversationItem {
                    role: Some(Role::User),
                    text: Some("Hello there".into()),
                    interrupted: Some(false),
                }),
            ]
        );
    }

    #[test]
    fn test_model_turn_speaks_and_commits_item() {
        let mut turn = TurnState::default();
        let audio = |data: &str| {
            Some(Content {
                role: Some("model".into()),
                parts: vec![Part {
                    text: None,
                    inline_data: Some(Blob {
                        mime_type: "audio/pcm;rate=24000".into(),
                        data: data.into(),
                    }),
                }],
            })
        };

        let events = turn.absorb(ServerContent {
            model_turn: audio("AAA="),
            output_transcription: transcript("Good ", None),
            ..Default::default()
        });
        assert_eq!(
            events,
            vec![
                GenericServerEvent::Speaking,
                GenericServerEvent::AudioChunk("AAA=".into())
            ]
        );

        let events = turn.absorb(ServerContent {
            model_turn: audio("BBB="),
            output_transcription: transcript("morning", None),
            ..Default::default()
        });
        assert_eq!(events, vec![GenericServerEvent::AudioChunk("BBB=".into())]);

        let events = turn.absorb(ServerContent {
            turn_complete: Some(true),
            ..Default::default()
        });
        assert_eq!(
            events,
            vec![
                GenericServerEvent::SpeakingDone,
                GenericServerEvent::ConversationItemAdded(ConversationItem {
                    role: Some(Role::Assistant),
                    text: Some("Good morning".into()),
                    interrupted: Some(false),
                }),
            ]
        );
    }

    #[test]
    fn test_interruption_marks_assistant_item() {
        let mut turn = TurnState::default();
        turn.absorb(ServerContent {
            output_transcription: transcript("Let me explain", None),
            ..Default::default()
        });
        let events = turn.absorb(ServerContent {
            interrupted: Some(true),
            ..Default::default()
        });
        assert_eq!(
            events,
            vec![GenericServerEvent::ConversationItemAdded(ConversationItem {
                role: Some(Role::Assistant),
                text: Some("Let me explain".into()),
                interrupted: Some(true),
            })]
        );
    }

    struct NoContent;

    #[async_trait]
    impl ContentSource for NoContent {
        async fn fetch(&self, _log: &SharedActivityLog) -> Option<String> {
            None
        }
    }

    fn engine(endpoint: String) -> GeminiEngine {
        let clients = ToolClients {
            http: reqwest::Client::new(),
            settings: ToolSettings::default(),
            mailer: Arc::new(DisabledMailer),
            news: Arc::new(NoContent),
        };
        GeminiEngine::new(
            GeminiSettings {
                endpoint,
                api_key: SecretString::from("test-key".to_string()),
                model: "models/test-live".into(),
                voice: "Aoede".into(),
                temperature: 0.7,
            },
            ToolRegistry::new(Arc::new(clients), ActivityLog::shared()),
        )
    }

    async fn next_json<S>(ws: &mut S) -> serde_json::Value
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        let frame = ws.next().await.unwrap().unwrap();
        serde_json::from_str(frame.to_text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_engine_session_against_fake_live_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();

            let setup = next_json(&mut ws).await;
            assert_eq!(setup["setup"]["model"], "models/test-live");
            assert_eq!(
                setup["setup"]["systemInstruction"]["parts"][0]["text"],
                "Be a tutor."
            );
            let declared: Vec<&str> = setup["setup"]["tools"][0]["functionDeclarations"]
                .as_array()
                .unwrap()
                .iter()
                .map(|d| d["name"].as_str().unwrap())
                .collect();
            assert!(declared.contains(&"get_today_news"));
            ws.send(Message::Text(r#"{"setupComplete": {}}"#.into()))
                .await
                .unwrap();

            let greeting = next_json(&mut ws).await;
            assert_eq!(
                greeting["clientContent"]["turns"][0]["parts"][0]["text"],
                "Say hello."
            );

            ws.send(Message::Text(
                r#"{"toolCall": {"functionCalls": [{"id": "c1", "name": "get_today_news", "args": {}}]}}"#
                    .into(),
            ))
            .await
            .unwrap();
            let response = next_json(&mut ws).await;
            let answer = &response["toolResponse"]["functionResponses"][0];
            assert_eq!(answer["id"], "c1");
            assert_eq!(
                answer["response"]["result"],
                "News service is currently unavailable."
            );

            ws.send(Message::Text(
                r#"{"serverContent": {"inputTranscription": {"text": "How are you?", "finished": true}}}"#
                    .into(),
            ))
            .await
            .unwrap();
            ws.close(None).await.unwrap();
        });

        let mut engine = engine(format!("ws://{addr}"));
        let mut channels = engine
            .start(GenericSessionConfig {
                instructions: "Be a tutor.".into(),
                video_enabled: false,
            })
            .await
            .unwrap();
        engine.generate_reply("Say hello.").await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = channels.events.recv().await {
            events.push(event);
        }
        server.await.unwrap();

        assert!(events.contains(&GenericServerEvent::Transcription {
            text: Some("How are you?".into()),
            is_final: Some(true),
        }));
        assert_eq!(events.last(), Some(&GenericServerEvent::Closed));
        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_fails_when_live_endpoint_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut engine = engine(format!("ws://{addr}"));
        let result = engine.start(GenericSessionConfig::default()).await;
        assert!(result.is_err());
        assert!(engine.generate_reply("hello").await.is_err());
    }
}
