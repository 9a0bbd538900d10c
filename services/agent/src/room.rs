//! The room a session runs in: whatever carries the participant's media to the
//! worker and the engine's output back to the participant.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tutor_core::generic_types::{GenericClientInput, GenericServerEvent};

#[async_trait]
pub trait Room: Send + Sync {
    fn name(&self) -> &str;

    /// Number of participants still connected, excluding the agent itself.
    fn remote_participant_count(&self) -> usize;

    /// Delivers one engine event to the participants.
    async fn publish(&self, event: &GenericServerEvent);

    /// Hands over the participant media stream. Yields `Some` only once.
    fn take_media(&self) -> Option<mpsc::Receiver<GenericClientInput>>;
}
