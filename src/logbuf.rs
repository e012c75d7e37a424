//! Bounded in-memory log sink.
//!
//! Stores recent operational log records for operator inspection and
//! debugging. Uses a fixed-capacity ring buffer to prevent unbounded growth;
//! oldest records are silently evicted at capacity. Every append is mirrored
//! to `tracing` so the sink supplements, rather than replaces, structured
//! logging.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Default ring capacity.
pub const DEFAULT_LOG_CAPACITY: usize = 5000;

/// A timestamped log record. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Time the record was appended.
    pub timestamp: DateTime<Utc>,
    /// Record text.
    pub message: String,
}

impl LogRecord {
    /// Render as `[HH:MM:SS] message`.
    #[must_use]
    pub fn render(&self) -> String {
        format!("[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Append-only log ring with fixed capacity.
#[derive(Debug)]
pub struct LogSink {
    records: Mutex<VecDeque<LogRecord>>,
    capacity: usize,
}

impl LogSink {
    /// Create a sink holding at most `capacity` records.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Append a record, evicting the oldest if at capacity.
    pub fn append(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        if let Ok(mut records) = self.records.lock() {
            if records.len() >= self.capacity {
                records.pop_front();
            }
            records.push_back(LogRecord {
                timestamp: Utc::now(),
                message,
            });
        }
    }

    /// All records, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|records| records.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of records currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    /// Whether the sink holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
