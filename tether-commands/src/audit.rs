//! Bounded audit log of download outcomes

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    DownloadSuccess,
    DownloadFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: AuditOperation,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Whole percent, 0 when empty
    pub success_rate: u32,
}

/// Ring buffer keeping the newest `capacity` entries
#[derive(Debug)]
pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn record_success(&self) {
        self.push(AuditEntry {
            timestamp: Utc::now(),
            operation: AuditOperation::DownloadSuccess,
            success: true,
            error: None,
        });
    }

    pub fn record_failure(&self, error: impl Into<String>) {
        self.push(AuditEntry {
            timestamp: Utc::now(),
            operation: AuditOperation::DownloadFailed,
            success: false,
            error: Some(error.into()),
        });
    }

    fn push(&self, entry: AuditEntry) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// The newest `n` entries, oldest first
    pub fn recent(&self, n: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Successful downloads still in the log
    pub fn successful_downloads(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.operation == AuditOperation::DownloadSuccess)
            .count()
    }

    pub fn stats(&self) -> AuditStats {
        let entries = self.entries.lock();
        let total = entries.len();
        let successful = entries.iter().filter(|e| e.success).count();
        let success_rate = if total > 0 {
            ((successful as f64 / total as f64) * 100.0).round() as u32
        } else {
            0
        };

        AuditStats {
            total,
            successful,
            failed: total - successful,
            success_rate,
        }
    }
}
