//! Diagnostics sink for export runs.
//!
//! Loggers are passed explicitly into sessions, orchestrators, and batch runs
//! so concurrent exports never share verbosity state. Records can be routed to
//! an external callback; otherwise they are printed to stderr, leaving stdout
//! free for exported content.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ExportConfig, Verbosity};

/// Convenience alias for external logging callbacks.
pub type LogCallback = Arc<dyn Fn(&ExportLogRecord) + Send + Sync + 'static>;

#[derive(Clone, Default)]
pub struct LogConfig {
    pub verbose: Verbosity,
    pub external_logger: Option<LogCallback>,
}

impl LogConfig {
    pub fn new(verbose: Verbosity) -> Self {
        Self {
            verbose,
            ..Default::default()
        }
    }

    pub fn should_log(&self, level: LogLevel) -> bool {
        level.as_u8() <= verbosity_to_u8(self.verbose)
    }
}

/// Log severity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

fn verbosity_to_u8(verbose: Verbosity) -> u8 {
    match verbose {
        Verbosity::Minimal => LogLevel::Warn.as_u8(),
        Verbosity::Medium => LogLevel::Info.as_u8(),
        Verbosity::Detailed => LogLevel::Debug.as_u8(),
    }
}

/// Structured log entry shared with external callbacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportLogRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auxiliary: Option<Value>,
}

impl ExportLogRecord {
    pub fn new(
        message: impl Into<String>,
        level: LogLevel,
        category: Option<String>,
        auxiliary: Option<Value>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            level,
            category,
            auxiliary,
        }
    }
}

/// Default printer used when no external logger is configured.
pub fn default_log_handler(record: &ExportLogRecord) {
    let timestamp = record
        .timestamp
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    match &record.category {
        Some(category) => eprintln!(
            "[{}] {:<5} [{}] {}",
            timestamp,
            record.level.label(),
            category,
            record.message
        ),
        None => eprintln!(
            "[{}] {:<5} {}",
            timestamp,
            record.level.label(),
            record.message
        ),
    }
    if let Some(aux) = &record.auxiliary {
        if !aux.is_null() {
            eprintln!("    {}", aux);
        }
    }
}

pub struct ExportLogger {
    config: LogConfig,
    default_handler: LogCallback,
}

impl fmt::Debug for ExportLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportLogger")
            .field("verbosity", &self.config.verbose)
            .field("external_logger", &self.config.external_logger.is_some())
            .finish()
    }
}

impl ExportLogger {
    pub fn with_config(config: LogConfig) -> Self {
        Self {
            config,
            default_handler: Arc::new(default_log_handler),
        }
    }

    /// Logger that forwards every record at or below `verbose` to `callback`.
    pub fn with_callback(verbose: Verbosity, callback: LogCallback) -> Self {
        Self::with_config(LogConfig {
            external_logger: Some(callback),
            ..LogConfig::new(verbose)
        })
    }

    /// Logger honouring the verbosity and callback of an [`ExportConfig`].
    pub fn from_export_config(config: &ExportConfig) -> Self {
        Self::with_config(LogConfig {
            verbose: config.verbose,
            external_logger: config.logger.clone(),
        })
    }

    pub fn log(
        &self,
        message: impl Into<String>,
        level: LogLevel,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) {
        if !self.config.should_log(level) {
            return;
        }

        let record =
            ExportLogRecord::new(message, level, category.map(|c| c.to_string()), auxiliary);

        if let Some(callback) = &self.config.external_logger {
            callback(&record);
        } else {
            (self.default_handler)(&record);
        }
    }

    pub fn error(&self, message: impl Into<String>, category: Option<&str>) {
        self.log(message, LogLevel::Error, category, None);
    }

    pub fn warn(&self, message: impl Into<String>, category: Option<&str>) {
        self.log(message, LogLevel::Warn, category, None);
    }

    pub fn info(&self, message: impl Into<String>, category: Option<&str>) {
        self.log(message, LogLevel::Info, category, None);
    }

    pub fn debug(
        &self,
        message: impl Into<String>,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) {
        self.log(message, LogLevel::Debug, category, auxiliary);
    }
}

/// Logger that records everything it receives; used by tests across the crate.
#[cfg(test)]
pub(crate) fn capture_logger() -> (
    Arc<ExportLogger>,
    Arc<std::sync::Mutex<Vec<ExportLogRecord>>>,
) {
    let records = Arc::new(std::sync::Mutex::new(Vec::new()));
    let capture = Arc::clone(&records);
    let callback: LogCallback = Arc::new(move |record| {
        capture.lock().unwrap().push(record.clone());
    });
    (
        Arc::new(ExportLogger::with_callback(Verbosity::Detailed, callback)),
        records,
    )
}
