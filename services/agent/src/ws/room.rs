//! A [`Room`] backed by one browser WebSocket.

use super::protocol::{ClientMessage, ServerMessage};
use crate::room::Room;
use anyhow::Result;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use tutor_core::generic_types::{GenericClientInput, GenericServerEvent};

pub type SocketSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Serializes a message onto the socket.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}

pub struct WsRoom {
    name: String,
    sink: SocketSink,
    participants: Arc<AtomicUsize>,
    media: std::sync::Mutex<Option<mpsc::Receiver<GenericClientInput>>>,
}

impl WsRoom {
    /// Wraps a joined socket. The returned reader task feeds participant media
    /// into the room until the participant leaves.
    pub fn new(
        name: String,
        sink: SocketSink,
        socket_rx: SplitStream<WebSocket>,
    ) -> (Arc<Self>, tokio::task::JoinHandle<()>) {
        let (media_tx, media_rx) = mpsc::channel(256);
        let participants = Arc::new(AtomicUsize::new(1));
        let room = Arc::new(Self {
            name,
            sink,
            participants: participants.clone(),
            media: std::sync::Mutex::new(Some(media_rx)),
        });
        let reader = tokio::spawn(read_participant(socket_rx, media_tx, participants));
        (room, reader)
    }
}

#[async_trait]
impl Room for WsRoom {
    fn name(&self) -> &str {
        &self.name
    }

    fn remote_participant_count(&self) -> usize {
        self.participants.load(Ordering::SeqCst)
    }

    async fn publish(&self, event: &GenericServerEvent) {
        let Some(msg) = ServerMessage::from_event(event) else {
            return;
        };
        if self.remote_participant_count() == 0 {
            return;
        }
        if let Err(e) = send_msg(&mut *self.sink.lock().await, msg).await {
            debug!(room = %self.name, error = %e, "Failed to publish to participant");
        }
    }

    fn take_media(&self) -> Option<mpsc::Receiver<GenericClientInput>> {
        match self.media.lock() {
            Ok(mut media) => media.take(),
            Err(_) => None,
        }
    }
}

/// Reads the participant's frames until they leave, then marks the room empty.
async fn read_participant(
    mut socket_rx: SplitStream<WebSocket>,
    media: mpsc::Sender<GenericClientInput>,
    participants: Arc<AtomicUsize>,
) {
    while let Some(frame) = socket_rx.next().await {
        let input = match frame {
            Ok(Message::Binary(pcm)) => GenericClientInput::Audio(pcm.to_vec()),
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::VideoFrame { mime_type, data }) => {
                    GenericClientInput::VideoFrame { mime_type, data }
                }
                Ok(ClientMessage::UserMessage { text }) => GenericClientInput::Text(text),
                Ok(ClientMessage::Leave) => {
                    info!("Participant left the room");
                    break;
                }
                Ok(ClientMessage::Init { .. }) => {
                    debug!("Ignoring repeated init message");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Ignoring unrecognised client message");
                    continue;
                }
            },
            Ok(Message::Close(_)) => {
                info!("Participant closed the connection");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "Participant socket error");
                break;
            }
        };
        // A full queue means the engine is not keeping up; drop media rather than stall.
        if let Err(mpsc::error::TrySendError::Closed(_)) = media.try_send(input) {
            break;
        }
    }
    participants.store(0, Ordering::SeqCst);
}
