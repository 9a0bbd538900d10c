use serde::{Deserialize, Serialize};

/// Generic configuration for starting a real-time session with any engine.
#[derive(Debug, Clone, Default)]
pub struct GenericSessionConfig {
    /// The composed instructions; captured once at start and never changed.
    pub instructions: String,
    /// Whether video frames from the room are forwarded to the engine.
    pub video_enabled: bool,
}

/// Who produced a conversation item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A completed conversation turn as reported by the engine.
///
/// Fields are optional because engines report them inconsistently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    pub role: Option<Role>,
    pub text: Option<String>,
    pub interrupted: Option<bool>,
}

/// Generic events that any real-time engine can emit back to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum GenericServerEvent {
    /// A transcription of the user's speech.
    Transcription {
        text: Option<String>,
        is_final: Option<bool>,
    },
    /// A turn was committed to the conversation history.
    ConversationItemAdded(ConversationItem),
    /// A chunk of spoken audio from the AI (base64 encoded PCM16).
    AudioChunk(String),
    /// The AI is about to start speaking.
    Speaking,
    /// The AI has finished speaking.
    SpeakingDone,
    /// An error from the engine.
    Error {
        message: Option<String>,
        recoverable: Option<bool>,
    },
    /// The connection was closed.
    Closed,
}

/// Media and text flowing from the room into the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum GenericClientInput {
    /// Raw PCM16 little-endian mono audio at 16 kHz.
    Audio(Vec<u8>),
    /// A single encoded video frame (base64 payload).
    VideoFrame { mime_type: String, data: String },
    /// A typed user message.
    Text(String),
}
