//! Outbound Mail
//!
//! A small abstraction over message delivery used both by the `send_email` tool
//! and by the end-of-session report. Three implementations exist: SMTP delivery
//! over STARTTLS, a demo mode that writes messages to disk, and a disabled
//! mailer for deployments without credentials.

use async_trait::async_trait;
use chrono::Local;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

pub const SMTP_PORT: u16 = 587;
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(20);

/// A fully composed outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub cc: Option<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("email delivery is not configured")]
    NotConfigured,
    #[error("invalid email address: {0}")]
    InvalidAddress(String),
    #[error("SMTP authentication failed")]
    Auth,
    #[error("recipient refused: {0}")]
    Rejected(String),
    #[error("SMTP transport error: {0}")]
    Transport(String),
    #[error("email send timed out")]
    Timeout,
    #[error("failed to write email file: {0}")]
    Io(#[from] std::io::Error),
}

/// Delivers one message.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

/// Minimal shape check: one `@` with a dotted domain after it.
pub fn is_valid_email(address: &str) -> bool {
    match address.trim().split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Supported SMTP providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailProvider {
    Gmail,
    Outlook,
    Yandex,
    Mail,
}

impl EmailProvider {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "gmail" => Some(Self::Gmail),
            "outlook" => Some(Self::Outlook),
            "yandex" => Some(Self::Yandex),
            "mail" => Some(Self::Mail),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::Outlook => "outlook",
            Self::Yandex => "yandex",
            Self::Mail => "mail",
        }
    }

    pub fn smtp_host(self) -> &'static str {
        match self {
            Self::Gmail => "smtp.gmail.com",
            Self::Outlook => "smtp-mail.outlook.com",
            Self::Yandex => "smtp.yandex.ru",
            Self::Mail => "smtp.mail.ru",
        }
    }

    /// Environment variables holding `(user, password)` for this provider.
    pub fn credential_vars(self) -> (&'static str, &'static str) {
        match self {
            Self::Gmail => ("GMAIL_USER", "GMAIL_APP_PASSWORD"),
            Self::Outlook => ("OUTLOOK_USER", "OUTLOOK_PASSWORD"),
            Self::Yandex => ("YANDEX_USER", "YANDEX_PASSWORD"),
            Self::Mail => ("MAIL_USER", "MAIL_PASSWORD"),
        }
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    if !is_valid_email(address) {
        return Err(MailError::InvalidAddress(address.to_string()));
    }
    address
        .trim()
        .parse()
        .map_err(|_| MailError::InvalidAddress(address.to_string()))
}

/// Delivers mail through a provider's SMTP relay using STARTTLS.
pub struct SmtpMailer {
    provider: EmailProvider,
    from: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(
        provider: EmailProvider,
        user: String,
        password: SecretString,
        timeout: Duration,
    ) -> Result<Self, MailError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(provider.smtp_host())
            .map_err(|e| MailError::Transport(e.to_string()))?
            .port(SMTP_PORT)
            .credentials(Credentials::new(
                user.clone(),
                password.expose_secret().to_string(),
            ))
            .timeout(Some(timeout))
            .build();

        Ok(Self {
            provider,
            from: user,
            transport,
            timeout,
        })
    }

    fn build_message(&self, email: &OutgoingEmail) -> Result<Message, MailError> {
        let mut builder = Message::builder()
            .from(parse_mailbox(&self.from)?)
            .to(parse_mailbox(&email.to)?)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN);
        if let Some(cc) = email.cc.as_deref().filter(|cc| !cc.trim().is_empty()) {
            builder = builder.cc(parse_mailbox(cc)?);
        }
        builder
            .body(email.body.clone())
            .map_err(|e| MailError::Transport(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let message = self.build_message(email)?;
        info!(provider = self.provider.name(), to = %email.to, "Sending email via SMTP");

        match tokio::time::timeout(self.timeout, self.transport.send(message)).await {
            Err(_) => Err(MailError::Timeout),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => {
                warn!(error = %err, "SMTP send failed");
                let code = err.status().map(|c| c.to_string()).unwrap_or_default();
                if err.is_timeout() {
                    Err(MailError::Timeout)
                } else if code.starts_with("535") || code.starts_with("534") {
                    Err(MailError::Auth)
                } else if err.is_permanent() {
                    Err(MailError::Rejected(err.to_string()))
                } else {
                    Err(MailError::Transport(err.to_string()))
                }
            }
        }
    }
}

/// Writes each message to `demo_email_<timestamp>.txt` instead of sending it.
pub struct DemoMailer {
    dir: PathBuf,
}

impl DemoMailer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Mailer for DemoMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        parse_mailbox(&email.to)?;
        if let Some(cc) = email.cc.as_deref().filter(|cc| !cc.trim().is_empty()) {
            parse_mailbox(cc)?;
        }

        let now = Local::now();
        let path = self
            .dir
            .join(format!("demo_email_{}.txt", now.format("%Y%m%d_%H%M%S_%6f")));
        let mut contents = format!("To: {}\n", email.to);
        if let Some(cc) = &email.cc {
            contents.push_str(&format!("CC: {cc}\n"));
        }
        contents.push_str(&format!(
            "Subject: {}\nDate: {}\n\n{}\n",
            email.subject,
            now.to_rfc2822(),
            email.body
        ));

        tokio::fs::write(&path, contents).await?;
        info!(path = %path.display(), "Demo email written");
        Ok(())
    }
}

/// Used when no provider credentials are available.
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, _email: &OutgoingEmail) -> Result<(), MailError> {
        Err(MailError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(to: &str) -> OutgoingEmail {
        OutgoingEmail {
            to: to.to_string(),
            cc: Some("boss@example.org".to_string()),
            subject: "Weekly summary".to_string(),
            body: "All good.".to_string(),
        }
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("student@example.com"));
        assert!(is_valid_email("  a.b@mail.co.uk "));
        assert!(!is_valid_email("no-at-sign.com"));
        assert!(!is_valid_email("user@localhost"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a@b@c.com"));
    }

    #[test]
    fn test_provider_table() {
        assert_eq!(EmailProvider::from_name("Gmail"), Some(EmailProvider::Gmail));
        assert_eq!(EmailProvider::from_name("carrier-pigeon"), None);
        assert_eq!(EmailProvider::Outlook.smtp_host(), "smtp-mail.outlook.com");
        assert_eq!(
            EmailProvider::Yandex.credential_vars(),
            ("YANDEX_USER", "YANDEX_PASSWORD")
        );
    }

    #[tokio::test]
    async fn test_demo_mailer_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mailer = DemoMailer::new(dir.path());

        mailer.send(&email("student@example.com")).await.unwrap();

        let mut files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let path = files.pop().unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("demo_email_") && name.ends_with(".txt"));

        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.starts_with("To: student@example.com\nCC: boss@example.org\n"));
        assert!(contents.contains("Subject: Weekly summary"));
        assert!(contents.ends_with("All good.\n"));
    }

    #[tokio::test]
    async fn test_demo_mailer_rejects_bad_address() {
        let dir = tempfile::tempdir().unwrap();
        let result = DemoMailer::new(dir.path()).send(&email("nobody")).await;
        assert!(matches!(result, Err(MailError::InvalidAddress(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_mailer() {
        let result = DisabledMailer.send(&email("student@example.com")).await;
        assert!(matches!(result, Err(MailError::NotConfigured)));
    }

    #[test]
    fn test_smtp_message_building() {
        let mailer = SmtpMailer::new(
            EmailProvider::Gmail,
            "tutor@gmail.com".to_string(),
            SecretString::from("app-password".to_string()),
            DEFAULT_SEND_TIMEOUT,
        )
        .unwrap();

        let message = mailer.build_message(&email("student@example.com")).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("From: tutor@gmail.com"));
        assert!(raw.contains("Cc: boss@example.org"));
        assert!(raw.contains("Subject: Weekly summary"));

        let bad = mailer.build_message(&email("bogus"));
        assert!(matches!(bad, Err(MailError::InvalidAddress(_))));
    }
}
