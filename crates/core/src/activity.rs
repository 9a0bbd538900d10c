//! Session Activity Log
//!
//! An append-only, timestamped record of everything notable that happens during
//! one tutoring session. The log is owned by a single session and is compiled
//! into the end-of-session report before being cleared.

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Text returned by [`ActivityLog::get_summary`] when nothing was recorded.
pub const NO_ACTIVITY: &str = "No activity recorded in this session.";

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARNING"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// A single recorded event.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
    pub data: Map<String, Value>,
}

impl LogEntry {
    /// Renders the entry as one report line: `[HH:MM:SS] [LEVEL] message | Data: {...}`.
    pub fn to_line(&self) -> String {
        let mut line = format!(
            "[{}] [{}] {}",
            self.timestamp.format("%H:%M:%S"),
            self.level,
            self.message
        );
        if !self.data.is_empty() {
            line.push_str(&format!(" | Data: {}", Value::Object(self.data.clone())));
        }
        line
    }
}

/// Ordered sequence of entries for one session.
///
/// Insertion order is chronological order; entries are never reordered or
/// removed individually.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    entries: Vec<LogEntry>,
    session_start: DateTime<Local>,
}

/// Per-session handle shared between the orchestrator, the event monitor, and tools.
pub type SharedActivityLog = Arc<Mutex<ActivityLog>>;

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityLog {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            session_start: Local::now(),
        }
    }

    /// Creates a fresh log wrapped in a shareable handle.
    pub fn shared() -> SharedActivityLog {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Appends an entry stamped with the current local time.
    ///
    /// Object `data` is stored as-is; any other JSON value is wrapped as `{"value": data}`.
    pub fn add_log(&mut self, level: LogLevel, message: impl Into<String>, data: Option<Value>) {
        let message = message.into();
        let data = match data {
            Some(Value::Object(map)) => map,
            Some(Value::Null) | None => Map::new(),
            Some(other) => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        match level {
            LogLevel::Info => tracing::info!(activity = %message),
            LogLevel::Warning => tracing::warn!(activity = %message),
            LogLevel::Error => tracing::error!(activity = %message),
        }

        self.entries.push(LogEntry {
            timestamp: Local::now(),
            level,
            message,
            data,
        });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.add_log(LogLevel::Info, message, None);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.add_log(LogLevel::Warning, message, None);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.add_log(LogLevel::Error, message, None);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn session_start(&self) -> DateTime<Local> {
        self.session_start
    }

    /// Formats every entry, in insertion order, under a report header.
    pub fn get_summary(&self) -> String {
        if self.entries.is_empty() {
            return NO_ACTIVITY.to_string();
        }

        let mut lines = vec![
            format!(
                "--- SESSION REPORT ({}) ---",
                self.session_start.format("%Y-%m-%d %H:%M:%S")
            ),
            String::new(),
        ];
        lines.extend(self.entries.iter().map(LogEntry::to_line));
        lines.join("\n")
    }

    /// Drops all entries and restarts the session clock.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.session_start = Local::now();
    }
}
