//! Forwards salient engine events into the session's activity log.

use serde_json::json;
use tutor_core::activity::{LogLevel, SharedActivityLog};
use tutor_core::generic_types::{ConversationItem, GenericServerEvent, Role};

pub struct SessionEventMonitor {
    log: SharedActivityLog,
}

impl SessionEventMonitor {
    pub fn new(log: SharedActivityLog) -> Self {
        Self { log }
    }

    /// Records finalized transcriptions, committed conversation items and errors.
    /// Every other event kind is ignored.
    pub async fn handle(&self, event: &GenericServerEvent) {
        match event {
            GenericServerEvent::Transcription { text, is_final } => {
                if is_final.unwrap_or(false) {
                    self.user_transcribed(text.as_deref().unwrap_or_default())
                        .await;
                }
            }
            GenericServerEvent::ConversationItemAdded(item) => self.item_added(item).await,
            GenericServerEvent::Error {
                message,
                recoverable,
            } => {
                self.log.lock().await.add_log(
                    LogLevel::Error,
                    format!(
                        "Engine error: {}",
                        message.as_deref().unwrap_or("unknown error")
                    ),
                    Some(json!({ "recoverable": recoverable.unwrap_or(false) })),
                );
            }
            _ => {}
        }
    }

    async fn user_transcribed(&self, text: &str) {
        self.log.lock().await.add_log(
            LogLevel::Info,
            format!("User said: {text}"),
            Some(json!({ "is_final": true })),
        );
    }

    async fn item_added(&self, item: &ConversationItem) {
        let role = match item.role {
            Some(Role::User) => "user",
            Some(Role::Assistant) => "assistant",
            None => "unknown",
        };
        self.log.lock().await.add_log(
            LogLevel::Info,
            "Conversation item added",
            Some(json!({
                "role": role,
                "content": item.text.as_deref().unwrap_or_default(),
                "interrupted": item.interrupted.unwrap_or(false),
            })),
        );
    }
}
