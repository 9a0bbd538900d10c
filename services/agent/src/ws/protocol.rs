//! Defines the WebSocket message protocol between the browser room and the worker.
//!
//! Microphone audio travels as binary frames of raw PCM16 (16 kHz mono); every
//! other message is JSON text tagged by `type`.

use serde::{Deserialize, Serialize};
use tutor_core::generic_types::{GenericServerEvent, Role};
use uuid::Uuid;

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Joins the room. This must be the first message.
    Init {
        /// Overrides the worker's default for forwarding camera frames.
        video_enabled: Option<bool>,
    },
    /// One encoded camera frame.
    VideoFrame { mime_type: String, data: String },
    /// A typed message from the participant.
    UserMessage { text: String },
    /// The participant is leaving the room.
    Leave,
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the participant joined and the session is starting.
    Ready { session_id: Uuid },
    /// An update on the user's speech-to-text transcription.
    Transcription { text: String, is_final: bool },
    /// A committed conversation turn.
    Transcript {
        role: Role,
        text: String,
        interrupted: bool,
    },
    /// A chunk of audio data (base64 encoded PCM16, 24 kHz) for the AI's voice.
    AudioChunk { data: String },
    /// Signals that the AI has started speaking.
    AiSpeakingStart,
    /// Signals that the AI has finished speaking.
    AiSpeakingEnd,
    /// Reports an error to the client.
    Error { message: String },
}

impl ServerMessage {
    /// Maps an engine event onto the client protocol. Events the browser has no
    /// use for yield `None`.
    pub fn from_event(event: &GenericServerEvent) -> Option<Self> {
        match event {
            GenericServerEvent::Transcription { text, is_final } => Some(Self::Transcription {
                text: text.clone().unwrap_or_default(),
                is_final: is_final.unwrap_or(false),
            }),
            GenericServerEvent::ConversationItemAdded(item) => {
                let role = item.role?;
                Some(Self::Transcript {
                    role,
                    text: item.text.clone().unwrap_or_default(),
                    interrupted: item.interrupted.unwrap_or(false),
                })
            }
            GenericServerEvent::AudioChunk(data) => Some(Self::AudioChunk { data: data.clone() }),
            GenericServerEvent::Speaking => Some(Self::AiSpeakingStart),
            GenericServerEvent::SpeakingDone => Some(Self::AiSpeakingEnd),
            GenericServerEvent::Error { message, .. } => Some(Self::Error {
                message: message
                    .clone()
                    .unwrap_or_else(|| "The voice engine reported an error.".to_string()),
            }),
            GenericServerEvent::Closed => None,
        }
    }
}
