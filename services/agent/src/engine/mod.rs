//! Real-time conversational engines.
//!
//! The session orchestrator only sees [`RealtimeEngine`]; the Gemini Live
//! implementation lives in [`gemini`], and [`tools`] bridges the engine's
//! function calls onto the session's MCP tool server.

pub mod gemini;
pub mod tools;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tutor_core::generic_types::{GenericClientInput, GenericServerEvent, GenericSessionConfig};

pub use gemini::{GeminiEngine, GeminiSettings};
pub use tools::ToolBridge;

/// The streams a started engine exposes to the session.
pub struct EngineChannels {
    /// Events produced by the engine. Closes when the engine stops.
    pub events: mpsc::Receiver<GenericServerEvent>,
    /// Media and text forwarded from the room.
    pub input: mpsc::Sender<GenericClientInput>,
}

#[async_trait]
pub trait RealtimeEngine: Send {
    /// Opens the engine session with the instructions captured in `config`.
    async fn start(&mut self, config: GenericSessionConfig) -> anyhow::Result<EngineChannels>;

    /// Asks the engine to speak first, following `instructions`.
    async fn generate_reply(&mut self, instructions: &str) -> anyhow::Result<()>;

    async fn close(&mut self) -> anyhow::Result<()>;
}
