//! Per-stage diagnostic log
//!
//! Every message is emitted as a `tracing` event and also kept as a
//! [`LogRecord`] so it can be returned to the client with the response.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Severity,
    /// `Kind.token`, e.g. `File.1a2b3c4d`
    pub source: String,
    pub message: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.level,
            self.source,
            self.message
        )
    }
}

#[derive(Debug, Clone)]
pub struct StageLog {
    source: String,
    records: Vec<LogRecord>,
}

impl StageLog {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            records: Vec::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.record(Severity::Debug, message.into());
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.record(Severity::Info, message.into());
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.record(Severity::Warning, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.record(Severity::Error, message.into());
    }

    fn record(&mut self, level: Severity, message: String) {
        let source = self.source.as_str();
        match level {
            Severity::Debug => tracing::debug!(stage = %source, "{}", message),
            Severity::Info => tracing::info!(stage = %source, "{}", message),
            Severity::Warning => tracing::warn!(stage = %source, "{}", message),
            Severity::Error => tracing::error!(stage = %source, "{}", message),
        }
        self.records.push(LogRecord {
            timestamp: Utc::now(),
            level,
            source: self.source.clone(),
            message,
        });
    }
}
