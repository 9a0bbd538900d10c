use super::{ToolClients, ToolFailure};
use crate::mail::{DEFAULT_SEND_TIMEOUT, MailError, OutgoingEmail, is_valid_email};
use chrono::Local;
use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Deserialize, JsonSchema, Debug)]
pub struct SendEmailArgs {
    /// Recipient email address.
    pub to_email: String,
    /// Subject line.
    pub subject: String,
    /// Body text.
    pub message: String,
    /// Optional address to copy.
    pub cc_email: Option<String>,
}

fn failure(err: MailError, to: &str) -> ToolFailure {
    let (kind, spoken) = match err {
        MailError::NotConfigured => (
            "not_configured",
            "I'm afraid I cannot send email right now because the email service is not configured."
                .to_string(),
        ),
        MailError::InvalidAddress(address) => (
            "invalid_argument",
            format!("The email address '{address}' doesn't look quite right."),
        ),
        MailError::Auth => (
            "auth",
            "I'm having trouble with email authentication. Please check the email credentials."
                .to_string(),
        ),
        MailError::Rejected(_) => (
            "rejected",
            format!("The email address {to} was refused. It may not be valid."),
        ),
        MailError::Timeout => (
            "timeout",
            "Sending the email timed out. Please try again.".to_string(),
        ),
        MailError::Transport(_) | MailError::Io(_) => (
            "transport",
            "I encountered an error while sending the email. Please try again later.".to_string(),
        ),
    };
    ToolFailure::new(kind, spoken)
}

pub async fn run(clients: &ToolClients, args: SendEmailArgs) -> Result<String, ToolFailure> {
    let to = args.to_email.trim().to_string();
    let cc = args
        .cc_email
        .map(|cc| cc.trim().to_string())
        .filter(|cc| !cc.is_empty());

    for address in std::iter::once(&to).chain(cc.iter()) {
        if !is_valid_email(address) {
            return Err(failure(MailError::InvalidAddress(address.clone()), &to));
        }
    }

    let body = format!(
        "{}\n\n---\nSent via AI Voice Assistant at {}",
        args.message,
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    let email = OutgoingEmail {
        to: to.clone(),
        cc: cc.clone(),
        subject: args.subject,
        body,
    };

    match tokio::time::timeout(
        clients.timeout(DEFAULT_SEND_TIMEOUT),
        clients.mailer.send(&email),
    )
    .await
    {
        Err(_) => Err(failure(MailError::Timeout, &to)),
        Ok(Err(err)) => Err(failure(err, &to)),
        Ok(Ok(())) => Ok(match cc {
            Some(cc) => format!("Email sent successfully to {to} with copy to {cc}."),
            None => format!("Email sent successfully to {to}."),
        }),
    }
}
