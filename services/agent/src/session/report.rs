use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tutor_core::activity::ActivityLog;
use tutor_core::mail::{DEFAULT_SEND_TIMEOUT, Mailer, OutgoingEmail};

/// Sends the compiled activity log to the administrator.
#[derive(Clone)]
pub struct ReportDispatcher {
    mailer: Arc<dyn Mailer>,
    recipient: Option<String>,
    timeout: Duration,
}

impl ReportDispatcher {
    pub fn new(mailer: Arc<dyn Mailer>, recipient: Option<String>) -> Self {
        Self {
            mailer,
            recipient,
            timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn subject() -> String {
        format!(
            "Voice Tutor Session Report - {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )
    }

    /// Makes one delivery attempt and reports whether it succeeded.
    ///
    /// Failures are logged, never retried.
    pub async fn dispatch(&self, log: &ActivityLog) -> bool {
        let Some(recipient) = self.recipient.as_deref() else {
            warn!("ADMIN_EMAIL is not set, session report not sent");
            return false;
        };

        let email = OutgoingEmail {
            to: recipient.to_string(),
            cc: None,
            subject: Self::subject(),
            body: log.get_summary(),
        };

        match tokio::time::timeout(self.timeout, self.mailer.send(&email)).await {
            Ok(Ok(())) => {
                info!(to = %recipient, entries = log.len(), "Session report sent");
                true
            }
            Ok(Err(e)) => {
                error!(to = %recipient, error = %e, "Failed to send session report");
                false
            }
            Err(_) => {
                error!(to = %recipient, "Timed out sending session report");
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use tutor_core::mail::{MailError, Mailer, OutgoingEmail};

    mockall::mock! {
        pub SmtpRelay {}

        #[async_trait]
        impl Mailer for SmtpRelay {
            async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
        }
    }
}
