use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Result of checking one replicated update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    /// The update passed verification.
    Verified,
    /// The update failed verification.
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationRecord {
    /// Outcome of the latest check.
    pub status: VerificationStatus,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
}

/// Per-session record of which intentions passed update verification.
///
/// Advisory only: rejected updates are still replicated by the store, the
/// ledger just lets callers flag them.
#[derive(Default)]
pub struct VerificationLedger {
    entries: RwLock<HashMap<String, VerificationRecord>>,
}

impl VerificationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, id: &str, status: VerificationStatus) {
        self.entries.write().insert(
            id.to_string(),
            VerificationRecord {
                status,
                checked_at: Utc::now(),
            },
        );
    }

    pub fn status(&self, id: &str) -> Option<VerificationStatus> {
        self.entries.read().get(id).map(|r| r.status)
    }

    pub fn snapshot(&self) -> HashMap<String, VerificationRecord> {
        self.entries.read().clone()
    }

    pub fn rejected_count(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|r| r.status == VerificationStatus::Rejected)
            .count()
    }
}
