//! Shared HTTP plumbing for the lesson source and the webhook-backed tools.
//!
//! Every outbound call goes through [`get_json`] or [`post_json`], which enforce a
//! timeout and collapse every failure into a [`ServiceError`] variant.

use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;

pub const USER_AGENT: &str = "VoiceTutor-Agent/1.0";

/// Failure classes of a single outbound call.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service is not configured")]
    NotConfigured,
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("malformed JSON response: {0}")]
    MalformedJson(String),
    #[error("service reported failure: {0}")]
    Rejected(String),
}

impl ServiceError {
    /// Short machine-readable label used in activity log data.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::NotConfigured => "not_configured",
            ServiceError::Timeout => "timeout",
            ServiceError::Connection(_) => "connection",
            ServiceError::Status(_) => "status",
            ServiceError::MalformedJson(_) => "malformed_json",
            ServiceError::Rejected(_) => "rejected",
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::Timeout
        } else if err.is_decode() {
            ServiceError::MalformedJson(err.to_string())
        } else if let Some(status) = err.status() {
            ServiceError::Status(status.as_u16())
        } else {
            ServiceError::Connection(err.to_string())
        }
    }
}

/// Issues a GET and parses the body as JSON.
pub async fn get_json(
    client: &Client,
    url: &str,
    query: &[(&str, String)],
    timeout: Duration,
) -> Result<Value, ServiceError> {
    send(client.get(url).query(query), timeout).await
}

/// Issues a POST with a JSON body and parses the response as JSON.
pub async fn post_json(
    client: &Client,
    url: &str,
    body: &Value,
    timeout: Duration,
) -> Result<Value, ServiceError> {
    send(client.post(url).json(body), timeout).await
}

async fn send(request: RequestBuilder, timeout: Duration) -> Result<Value, ServiceError> {
    let response = request
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .timeout(timeout)
        .send()
        .await
        .map_err(ServiceError::from_reqwest)?;

    let status = response.status();
    if status != StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), body = %truncate(&body, 200), "Non-200 response");
        return Err(ServiceError::Status(status.as_u16()));
    }

    let text = response.text().await.map_err(ServiceError::from_reqwest)?;
    serde_json::from_str(&text).map_err(|e| ServiceError::MalformedJson(e.to_string()))
}

/// Truncates to at most `max` characters without splitting a code point.
pub fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
