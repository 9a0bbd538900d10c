//! Client for the Gemini Live bidirectional streaming API.
//!
//! [`connect`] opens the WebSocket, sends the session [`Setup`] and waits for
//! `setupComplete`. The connection is then split into a [`LiveSender`] for
//! client messages and a [`LiveReceiver`] yielding parsed [`ServerMessage`]s.

pub mod types;

use base64::{Engine, engine::general_purpose::STANDARD};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use tracing::{debug, info, warn};
use url::Url;

pub use types::*;

pub const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const INPUT_AUDIO_MIME: &str = "audio/pcm;rate=16000";
pub const SETUP_TIMEOUT: Duration = Duration::from_secs(15);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("timed out waiting for setupComplete")]
    SetupTimeout,
    #[error("connection closed before setup completed")]
    ClosedDuringSetup,
    #[error("invalid Live endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

/// The endpoint with the API key appended as an encoded `key` query parameter.
pub fn endpoint_url(endpoint: &str, api_key: &str) -> Result<Url, LiveError> {
    let mut url = Url::parse(endpoint)?;
    url.query_pairs_mut().append_pair("key", api_key);
    Ok(url)
}

/// Opens a Live session and completes the setup handshake.
pub async fn connect(
    endpoint: &str,
    api_key: &str,
    setup: Setup,
) -> Result<(LiveSender, LiveReceiver), LiveError> {
    let url = endpoint_url(endpoint, api_key)?;
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    info!(model = %setup.model, "Connected to Gemini Live WebSocket");
    let (sink, stream) = ws_stream.split();
    let mut sender = LiveSender { sink };
    let mut receiver = LiveReceiver { stream };

    sender.send(&ClientMessage::Setup(setup)).await?;

    tokio::time::timeout(SETUP_TIMEOUT, async {
        loop {
            match receiver.next().await {
                Some(Ok(msg)) if msg.setup_complete.is_some() => return Ok(()),
                Some(Ok(msg)) => warn!(?msg, "Unexpected message during Gemini setup"),
                Some(Err(e)) => return Err(e),
                None => return Err(LiveError::ClosedDuringSetup),
            }
        }
    })
    .await
    .map_err(|_| LiveError::SetupTimeout)??;

    info!("Gemini session setup is complete");
    Ok((sender, receiver))
}

/// Write half of a Live session.
pub struct LiveSender {
    sink: SplitSink<WsStream, Message>,
}

impl LiveSender {
    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), LiveError> {
        let payload = serde_json::to_string(message)?;
        self.sink.send(Message::Text(payload.into())).await?;
        Ok(())
    }

    /// Streams raw PCM16 mono audio at 16 kHz.
    pub async fn send_audio(&mut self, pcm: &[u8]) -> Result<(), LiveError> {
        self.send(&ClientMessage::RealtimeInput(RealtimeInput {
            audio: Some(Blob {
                mime_type: INPUT_AUDIO_MIME.to_string(),
                data: STANDARD.encode(pcm),
            }),
            ..Default::default()
        }))
        .await
    }

    /// Streams one already base64-encoded video frame.
    pub async fn send_video(&mut self, mime_type: &str, data: &str) -> Result<(), LiveError> {
        self.send(&ClientMessage::RealtimeInput(RealtimeInput {
            video: Some(Blob {
                mime_type: mime_type.to_string(),
                data: data.to_string(),
            }),
            ..Default::default()
        }))
        .await
    }

    /// Adds a complete user turn, prompting the model to respond.
    pub async fn send_user_turn(&mut self, text: &str) -> Result<(), LiveError> {
        self.send(&ClientMessage::ClientContent(ClientContent {
            turns: vec![Content::text(Some("user"), text)],
            turn_complete: true,
        }))
        .await
    }

    pub async fn send_tool_responses(
        &mut self,
        function_responses: Vec<FunctionResponse>,
    ) -> Result<(), LiveError> {
        self.send(&ClientMessage::ToolResponse(ToolResponse { function_responses }))
            .await
    }

    pub async fn close(&mut self) -> Result<(), LiveError> {
        self.sink.close().await?;
        Ok(())
    }
}

/// Read half of a Live session.
pub struct LiveReceiver {
    stream: SplitStream<WsStream>,
}

impl LiveReceiver {
    /// Next parsed server message, or `None` once the connection is closed.
    ///
    /// The API delivers JSON in both text and binary frames.
    pub async fn next(&mut self) -> Option<Result<ServerMessage, LiveError>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(e.into())),
            };
            let parsed = match frame {
                Message::Text(text) => serde_json::from_str(text.as_ref()),
                Message::Binary(bytes) => serde_json::from_slice(bytes.as_ref()),
                Message::Close(frame) => {
                    info!(?frame, "Gemini closed the connection");
                    return None;
                }
                _ => continue,
            };
            match parsed {
                Ok(msg) => return Some(Ok(msg)),
                Err(e) => debug!(error = %e, "Skipping unparseable Gemini message"),
            }
        }
    }
}
