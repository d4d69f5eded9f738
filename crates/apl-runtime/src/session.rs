#![forbid(unsafe_code)]

//! Console/session warning channel.
//!
//! Document-authoring mistakes (missing properties, unknown targets,
//! commands refused in fast mode) never surface as errors. They land here as
//! console messages, are mirrored to `tracing`, and the offending command
//! becomes a no-op.

use std::fmt;

/// Severity of a console message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse a `Log` command level name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// One console entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleMessage {
    pub level: LogLevel,
    pub text: String,
}

impl fmt::Display for ConsoleMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.level, self.text)
    }
}

/// Collected console output of one document.
#[derive(Debug, Default)]
pub struct Session {
    messages: Vec<ConsoleMessage>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a document-authoring problem.
    pub fn warn(&mut self, text: impl Into<String>) {
        self.log(LogLevel::Warn, text);
    }

    /// Append a message at `level`.
    pub fn log(&mut self, level: LogLevel, text: impl Into<String>) {
        let text = text.into();
        match level {
            LogLevel::Debug => tracing::debug!(console = %text),
            LogLevel::Info => tracing::info!(console = %text),
            LogLevel::Warn => tracing::warn!(console = %text),
            LogLevel::Error => tracing::error!(console = %text),
        }
        self.messages.push(ConsoleMessage { level, text });
    }

    pub fn messages(&self) -> &[ConsoleMessage] {
        &self.messages
    }

    /// Take and clear every message.
    pub fn take(&mut self) -> Vec<ConsoleMessage> {
        std::mem::take(&mut self.messages)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// True if any message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.messages.iter().any(|m| m.text.contains(needle))
    }
}
