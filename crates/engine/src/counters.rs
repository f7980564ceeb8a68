//! Per-recipient notification counters
//!
//! Owned by the backend that sends notifications and reset by whatever
//! schedule drives it. Configuration never holds these.

use dashmap::DashMap;

/// Concurrent per-recipient counters
#[derive(Debug, Default)]
pub struct NotificationCounters {
    counts: DashMap<String, u64>,
}

impl NotificationCounters {
    /// Empty counter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one to `recipient` and return the new count
    pub fn increment(&self, recipient: &str) -> u64 {
        let mut entry = self.counts.entry(recipient.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Current count for `recipient` (0 if never incremented)
    pub fn get(&self, recipient: &str) -> u64 {
        self.counts.get(recipient).map(|c| *c).unwrap_or(0)
    }

    /// Number of recipients with a count
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether no recipient has been counted
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Forget all counts
    pub fn reset(&self) {
        self.counts.clear();
    }
}
