//! Transfer service metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Transfer counters.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Transfer requests received.
    pub transfers_total: AtomicU64,
    /// Transfers committed.
    pub transfers_success: AtomicU64,
    /// Transfers that failed inside the ledger.
    pub transfers_failed: AtomicU64,
    /// Requests refused by authorization or validation.
    pub transfers_rejected: AtomicU64,
    /// Transfers whose rollback failed as well.
    pub rollback_failures: AtomicU64,
    /// Transfers abandoned at their deadline.
    pub timeouts: AtomicU64,
    /// Transfers currently inside the ledger.
    pub transfers_active: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a received request.
    pub fn transfer_received(&self) {
        self.transfers_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a request refused before reaching the ledger.
    pub fn transfer_rejected(&self) {
        self.transfers_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark a transfer as handed to the ledger.
    pub fn transfer_started(&self) {
        self.transfers_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a committed transfer.
    pub fn transfer_success(&self) {
        self.transfers_success.fetch_add(1, Ordering::Relaxed);
        self.transfers_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a failed transfer.
    pub fn transfer_failed(&self) {
        self.transfers_failed.fetch_add(1, Ordering::Relaxed);
        self.transfers_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a transfer whose rollback failed.
    pub fn rollback_failure(&self) {
        self.rollback_failures.fetch_add(1, Ordering::Relaxed);
        self.transfer_failed();
    }

    /// Record a transfer that hit its deadline.
    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        self.transfer_failed();
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transfers_total: self.transfers_total.load(Ordering::Relaxed),
            transfers_success: self.transfers_success.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
            transfers_rejected: self.transfers_rejected.load(Ordering::Relaxed),
            rollback_failures: self.rollback_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            transfers_active: self.transfers_active.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub transfers_total: u64,
    pub transfers_success: u64,
    pub transfers_failed: u64,
    pub transfers_rejected: u64,
    pub rollback_failures: u64,
    pub timeouts: u64,
    pub transfers_active: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
