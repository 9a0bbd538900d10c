//! Lesson Content
//!
//! Fetches the day's lesson text from an external source and splits it into a
//! vocabulary section and a news digest section.

use crate::activity::{LogLevel, SharedActivityLog};
use crate::http::{self, ServiceError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::info;

/// Marker opening the vocabulary section. Matched case-insensitively.
pub const VOCABULARY_MARKER: &str = "Vocabulary Focus:";
/// Marker opening the digest section. Matched exactly.
pub const DIGEST_MARKER: &str = "---START_OF_DIGEST---";

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Parsed lesson text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LessonContent {
    pub vocabulary_focus: String,
    pub digest: String,
}

/// Splits raw lesson text into `(vocabulary_focus, digest)`.
///
/// The vocabulary section runs from the vocabulary marker to the digest marker
/// (or the end of the text); both are matched ignoring ASCII case there. The
/// digest is everything after the exact digest marker; without that marker the
/// whole raw text is the digest.
pub fn parse_lesson(raw: &str) -> LessonContent {
    let vocabulary_focus = find_ascii_case_insensitive(raw, VOCABULARY_MARKER)
        .map(|start| {
            let body = &raw[start + VOCABULARY_MARKER.len()..];
            let end = find_ascii_case_insensitive(body, DIGEST_MARKER).unwrap_or(body.len());
            body[..end].trim().to_string()
        })
        .unwrap_or_default();

    let digest = match raw.find(DIGEST_MARKER) {
        Some(start) => raw[start + DIGEST_MARKER.len()..].trim().to_string(),
        None => raw.to_string(),
    };

    LessonContent {
        vocabulary_focus,
        digest,
    }
}

/// Byte offset of the first ASCII-case-insensitive occurrence of `needle`.
///
/// `needle` must be ASCII, so any match starts on a char boundary.
fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

/// Returns the first `count` sentences of `text`, split after `.`, `!` or `?`
/// followed by whitespace.
pub fn summarize_text(text: &str, count: usize) -> String {
    let text = text.trim();
    let mut sentences: Vec<&str> = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if sentences.len() == count {
            break;
        }
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let Some(&(boundary, next)) = chars.peek() else {
            break;
        };
        if !next.is_whitespace() {
            continue;
        }
        sentences.push(&text[start..boundary]);
        while let Some(&(_, ws)) = chars.peek() {
            if !ws.is_whitespace() {
                break;
            }
            chars.next();
        }
        start = chars.peek().map(|&(idx, _)| idx).unwrap_or(text.len());
    }

    if sentences.len() < count && start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences.join(" ")
}

/// Turns a JSON payload from the lesson source into lesson text.
///
/// Accepts `{content}`, `{text}`, `{data: [...]}`, or a list of `{title, text}`
/// items, which become a numbered digest.
pub fn materialize_content(payload: &Value) -> Option<String> {
    if let Some(obj) = payload.as_object() {
        for key in ["content", "text"] {
            if let Some(text) = obj.get(key).and_then(Value::as_str) {
                return (!text.trim().is_empty()).then(|| text.to_string());
            }
        }
        if let Some(items) = obj.get("data").and_then(Value::as_array) {
            return format_digest(items);
        }
        return format_digest(std::slice::from_ref(payload));
    }
    payload.as_array().and_then(|items| format_digest(items))
}

fn format_digest(items: &[Value]) -> Option<String> {
    let formatted: Vec<String> = items
        .iter()
        .filter_map(Value::as_object)
        .filter(|item| item.contains_key("title") || item.contains_key("text"))
        .enumerate()
        .map(|(i, item)| {
            let title = item
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("No Title");
            let text = item.get("text").and_then(Value::as_str).unwrap_or("");
            format!(
                "{}. TITLE: {}\n   SUMMARY: {}\n",
                i + 1,
                title,
                summarize_text(text, 4)
            )
        })
        .collect();

    (!formatted.is_empty()).then(|| formatted.join("\n"))
}

/// Defines the contract for anything that can supply today's lesson text.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Returns the raw lesson text, or `None` when the source is unconfigured,
    /// unreachable, or has nothing to offer. Failures are recorded in `log`.
    async fn fetch(&self, log: &SharedActivityLog) -> Option<String>;
}

/// Lesson source backed by an HTTP endpoint returning JSON.
pub struct HttpContentSource {
    client: Client,
    url: Option<String>,
    timeout: Duration,
}

impl HttpContentSource {
    pub fn new(client: Client, url: Option<String>) -> Self {
        Self {
            client,
            url,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn fetch(&self, log: &SharedActivityLog) -> Option<String> {
        let Some(url) = self.url.as_deref() else {
            log.lock().await.add_log(
                LogLevel::Warning,
                "Lesson content source is not configured",
                None,
            );
            return None;
        };

        info!(%url, "Fetching lesson content");
        let outcome = http::get_json(&self.client, url, &[], self.timeout)
            .await
            .and_then(|payload| {
                materialize_content(&payload)
                    .ok_or_else(|| ServiceError::Rejected("no content available".to_string()))
            });

        let mut log = log.lock().await;
        match outcome {
            Ok(text) => {
                log.add_log(
                    LogLevel::Info,
                    "Fetched lesson content",
                    Some(json!({ "chars": text.chars().count() })),
                );
                Some(text)
            }
            Err(ServiceError::Rejected(reason)) => {
                log.add_log(
                    LogLevel::Warning,
                    format!("Lesson source returned {reason}"),
                    Some(json!({ "url": url })),
                );
                None
            }
            Err(err) => {
                log.add_log(
                    LogLevel::Error,
                    format!("Failed to fetch lesson content: {err}"),
                    Some(json!({ "kind": err.kind(), "url": url })),
                );
                None
            }
        }
    }
}
