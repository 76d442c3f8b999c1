//! Call recording for the debug console
//!
//! Every outbound request or runtime invocation reports one [`CallRecord`]
//! to a shared [`CallRecorder`]. The recorder is an append-only ring holding
//! the most recent calls; an external console consumes snapshots of it.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Maximum records retained; older entries are dropped
const MAX_RECORDS: usize = 100;

/// One outbound call, write-once
#[derive(Debug, Clone)]
pub struct CallRecord {
    /// HTTP method, or `LOCAL` for runtime invocations
    pub method: String,
    /// Request URL or the invoked command line
    pub target: String,
    /// HTTP status or process exit code; `None` when the call never completed
    pub status: Option<u16>,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: usize,
}

/// Started timer for an in-flight call; finish it to produce the record
#[derive(Debug)]
pub struct CallTimer {
    method: String,
    target: String,
    started: Instant,
}

impl CallTimer {
    pub fn start(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            started: Instant::now(),
        }
    }

    pub fn finish(self, status: Option<u16>, size_bytes: usize) -> CallRecord {
        CallRecord {
            method: self.method,
            target: self.target,
            status,
            duration: self.started.elapsed(),
            timestamp: Utc::now(),
            size_bytes,
        }
    }
}

/// Append-only sink shared by every client; safe for concurrent writers
#[derive(Debug, Clone, Default)]
pub struct CallRecorder {
    records: Arc<Mutex<VecDeque<CallRecord>>>,
}

impl CallRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: CallRecord) {
        if let Ok(mut records) = self.records.lock() {
            if records.len() == MAX_RECORDS {
                records.pop_front();
            }
            records.push_back(record);
        }
    }

    /// Copy of the retained records, oldest first.
    pub fn snapshot(&self) -> Vec<CallRecord> {
        self.records
            .lock()
            .map(|records| records.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }
}
