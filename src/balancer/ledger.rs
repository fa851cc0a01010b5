//! Migration history and blacklist bookkeeping
//!
//! Two per-VM cool-down maps prevent migration thrashing: a successful
//! migration keeps the VM in place for the history window, a failed one
//! for the blacklist window. Entries past their window are treated as
//! absent and pruned once per cycle.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

pub struct MigrationLedger {
    history: HashMap<String, DateTime<Utc>>,
    blacklist: HashMap<String, DateTime<Utc>>,
    history_retention: chrono::Duration,
    blacklist_retention: chrono::Duration,
}

impl MigrationLedger {
    pub fn new(history_retention: Duration, blacklist_retention: Duration) -> Self {
        Self {
            history: HashMap::new(),
            blacklist: HashMap::new(),
            history_retention: chrono::Duration::from_std(history_retention)
                .unwrap_or(chrono::Duration::MAX),
            blacklist_retention: chrono::Duration::from_std(blacklist_retention)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Record a successful migration at the current time.
    pub fn record_success(&mut self, vm_id: &str) {
        self.record_success_at(vm_id, Utc::now());
    }

    pub fn record_success_at(&mut self, vm_id: &str, at: DateTime<Utc>) {
        self.history.insert(vm_id.to_string(), at);
    }

    /// Record a failed or timed-out migration at the current time.
    pub fn record_failure(&mut self, vm_id: &str) {
        self.record_failure_at(vm_id, Utc::now());
    }

    pub fn record_failure_at(&mut self, vm_id: &str, at: DateTime<Utc>) {
        self.blacklist.insert(vm_id.to_string(), at);
    }

    /// Whether the VM was migrated successfully within the history
    /// window and must not move again yet.
    pub fn recently_succeeded(&self, vm_id: &str) -> bool {
        Self::within_window(&self.history, vm_id, self.history_retention, Utc::now())
    }

    /// Whether the VM failed to migrate within the blacklist window and
    /// must not be re-attempted yet.
    pub fn recently_failed(&self, vm_id: &str) -> bool {
        Self::within_window(&self.blacklist, vm_id, self.blacklist_retention, Utc::now())
    }

    fn within_window(
        entries: &HashMap<String, DateTime<Utc>>,
        vm_id: &str,
        window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> bool {
        entries
            .get(vm_id)
            .map(|recorded| now - *recorded < window)
            .unwrap_or(false)
    }

    /// Drop entries older than their retention window.
    pub fn evict_expired(&mut self) {
        let now = Utc::now();
        let history_window = self.history_retention;
        let blacklist_window = self.blacklist_retention;

        let before = self.history.len() + self.blacklist.len();
        self.history.retain(|_, recorded| now - *recorded < history_window);
        self.blacklist
            .retain(|_, recorded| now - *recorded < blacklist_window);
        let evicted = before - self.history.len() - self.blacklist.len();

        if evicted > 0 {
            debug!("Evicted {} expired migration ledger entries", evicted);
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn blacklist_len(&self) -> usize {
        self.blacklist.len()
    }
}
