//! Manages the WebSocket connection lifecycle for one tutoring session.

use super::protocol::{ClientMessage, ServerMessage};
use super::room::{SocketSink, WsRoom, send_msg};
use crate::state::AppState;
use anyhow::{Result, anyhow};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitStream};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{Instrument, error, info, instrument, warn};
use uuid::Uuid;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual WebSocket connection.
///
/// Waits for the participant's `init`, confirms with `ready`, then runs the
/// session with this socket as its room until the session closes.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = Uuid::new_v4();
    tracing::Span::current().record("session_id", session_id.to_string());
    info!("New WebSocket connection. Awaiting initialization...");

    let (socket_tx, mut socket_rx) = socket.split();
    let socket_tx: SocketSink = Arc::new(Mutex::new(socket_tx));

    let video_enabled = match await_init(&mut socket_rx).await {
        Ok(Some(video_enabled)) => video_enabled.unwrap_or(state.config.video_enabled),
        Ok(None) => {
            info!("Client disconnected before sending init message.");
            return;
        }
        Err(e) => {
            error!("Session initialization failed: {:?}", e);
            let _ = send_msg(
                &mut *socket_tx.lock().await,
                ServerMessage::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };

    if send_msg(
        &mut *socket_tx.lock().await,
        ServerMessage::Ready { session_id },
    )
    .await
    .is_err()
    {
        error!("Failed to send Ready message to client.");
        return;
    }

    let (room, reader) = WsRoom::new(format!("ws-{session_id}"), socket_tx.clone(), socket_rx);
    let outcome = state
        .run_session(session_id, room, video_enabled)
        .instrument(tracing::info_span!("session", %session_id))
        .await;
    reader.abort();

    if let Err(e) = socket_tx.lock().await.close().await {
        warn!(error = %e, "Failed to close participant socket");
    }
    info!(
        trigger = outcome.trigger.as_str(),
        report_sent = outcome.report_sent,
        "Session finished."
    );
}

/// Reads the first frame. `Ok(None)` means the client went away first; on
/// success yields the optional video override from `init`.
async fn await_init(socket_rx: &mut SplitStream<WebSocket>) -> Result<Option<Option<bool>>> {
    let Some(Ok(frame)) = socket_rx.next().await else {
        return Ok(None);
    };
    match frame {
        Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text)? {
            ClientMessage::Init { video_enabled } => Ok(Some(video_enabled)),
            _ => Err(anyhow!("First message must be `init`")),
        },
        Message::Close(_) => Ok(None),
        _ => Err(anyhow!("First message was not a text `init` message.")),
    }
}
