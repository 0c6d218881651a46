//! Diagnostic logging
//!
//! Components report diagnostics through the [`LogSink`] trait instead of a
//! global logger. [`RingBufferLog`] is the standard sink: it keeps the most
//! recent entries for display (the CLI `/logs` command) and forwards every
//! record to `tracing`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default number of entries kept by [`RingBufferLog`]
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Verbose diagnostics
    Debug,
    /// Normal operation
    Info,
    /// Something unexpected that was handled
    Warn,
    /// An operation failed
    Error,
}

impl LogLevel {
    /// Lowercase level name
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// One recorded diagnostic
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// Severity
    pub level: LogLevel,
    /// Human-readable message
    pub message: String,
    /// When the record was made
    pub timestamp: DateTime<Utc>,
    /// Optional structured payload
    pub data: Option<Value>,
}

/// Destination for diagnostics
///
/// Recording never fails and never blocks on I/O the caller can observe.
pub trait LogSink: Send + Sync {
    /// Record a diagnostic
    fn record(&self, level: LogLevel, message: &str, data: Option<Value>);

    /// Record at debug level
    fn debug(&self, message: &str, data: Option<Value>) {
        self.record(LogLevel::Debug, message, data);
    }

    /// Record at info level
    fn info(&self, message: &str, data: Option<Value>) {
        self.record(LogLevel::Info, message, data);
    }

    /// Record at warn level
    fn warn(&self, message: &str, data: Option<Value>) {
        self.record(LogLevel::Warn, message, data);
    }

    /// Record at error level
    fn error(&self, message: &str, data: Option<Value>) {
        self.record(LogLevel::Error, message, data);
    }
}

/// Bounded in-memory log that also forwards to `tracing`
///
/// Once `capacity` entries are held, each new entry evicts the oldest.
/// A capacity of 0 means unlimited.
#[derive(Debug)]
pub struct RingBufferLog {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl RingBufferLog {
    /// Create a log keeping at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Copy of the retained entries, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().iter().cloned().collect()
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is retained
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop all retained entries
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RingBufferLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl LogSink for RingBufferLog {
    fn record(&self, level: LogLevel, message: &str, data: Option<Value>) {
        forward_to_tracing(level, message, data.as_ref());

        let mut entries = self.lock();
        entries.push_back(LogEntry {
            level,
            message: message.to_string(),
            timestamp: Utc::now(),
            data,
        });
        if self.capacity > 0 {
            while entries.len() > self.capacity {
                entries.pop_front();
            }
        }
    }
}

fn forward_to_tracing(level: LogLevel, message: &str, data: Option<&Value>) {
    let data = data.map(Value::to_string).unwrap_or_default();
    match level {
        LogLevel::Debug => tracing::debug!(data = %data, "{}", message),
        LogLevel::Info => tracing::info!(data = %data, "{}", message),
        LogLevel::Warn => tracing::warn!(data = %data, "{}", message),
        LogLevel::Error => tracing::error!(data = %data, "{}", message),
    }
}

/// Install the global `tracing` subscriber, filtered by `RUST_LOG`
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
