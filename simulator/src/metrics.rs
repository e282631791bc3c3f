//! Simulation metrics.

use std::collections::VecDeque;

use serde::Serialize;

/// Outcome counters and latency samples of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Transfers attempted.
    pub total_transfers: u64,
    /// Transfers committed.
    pub successful_transfers: u64,
    /// Transfers the gateway refused.
    pub rejected_transfers: u64,
    /// Transfers that failed inside the ledger.
    pub failed_transfers: u64,
    /// Transfers that hit their deadline.
    pub timed_out_transfers: u64,
    /// Latency samples (ms).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_transfers: 0,
            successful_transfers: 0,
            rejected_transfers: 0,
            failed_transfers: 0,
            timed_out_transfers: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record a committed transfer.
    pub fn record_success(&mut self, latency_ms: u64) {
        self.total_transfers += 1;
        self.successful_transfers += 1;

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
    }

    /// Record a refused transfer.
    pub fn record_rejection(&mut self) {
        self.total_transfers += 1;
        self.rejected_transfers += 1;
    }

    /// Record a failed transfer.
    pub fn record_failure(&mut self, timed_out: bool) {
        self.total_transfers += 1;
        self.failed_transfers += 1;
        if timed_out {
            self.timed_out_transfers += 1;
        }
    }

    /// Get average latency in ms.
    pub fn average_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p50 latency.
    pub fn p50_latency_ms(&self) -> u64 {
        self.percentile_latency(50)
    }

    /// Get p99 latency.
    pub fn p99_latency_ms(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Get success rate.
    pub fn success_rate(&self) -> f64 {
        if self.total_transfers == 0 {
            return 0.0;
        }

        self.successful_transfers as f64 / self.total_transfers as f64
    }

    /// Get throughput (transfers per second).
    pub fn throughput(&self, elapsed_ms: u64) -> f64 {
        if elapsed_ms == 0 {
            return 0.0;
        }

        self.total_transfers as f64 * 1000.0 / elapsed_ms as f64
    }

    /// Summarize for the report.
    pub fn summary(&self, elapsed_ms: u64) -> MetricsSummary {
        MetricsSummary {
            total: self.total_transfers,
            successful: self.successful_transfers,
            rejected: self.rejected_transfers,
            failed: self.failed_transfers,
            timed_out: self.timed_out_transfers,
            success_rate: self.success_rate(),
            average_latency_ms: self.average_latency_ms(),
            p50_latency_ms: self.p50_latency_ms(),
            p99_latency_ms: self.p99_latency_ms(),
            throughput_per_sec: self.throughput(elapsed_ms),
        }
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable view of [`SimulationMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub total: u64,
    pub successful: u64,
    pub rejected: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub success_rate: f64,
    pub average_latency_ms: u64,
    pub p50_latency_ms: u64,
    pub p99_latency_ms: u64,
    pub throughput_per_sec: f64,
}
