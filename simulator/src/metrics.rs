//! Simulation metrics and the final report.

use std::collections::{BTreeMap, VecDeque};

use fxdesk_desk::MetricsSnapshot;
use serde::Serialize;

/// Client-side view of the simulation.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationMetrics {
    pub submissions: u64,
    pub approved: u64,
    pub limit_rejections: u64,
    /// Validation, quote or timeout failures.
    pub other_rejections: u64,
    pub settled: u64,
    /// Settlements refused because the rate moved.
    pub stale_refusals: u64,
    pub rate_ticks: u64,
    pub notices_received: u64,
    /// Submission latency samples (microseconds).
    #[serde(skip)]
    latency_samples: VecDeque<u64>,
    #[serde(skip)]
    max_samples: usize,
}

impl SimulationMetrics {
    pub fn new() -> Self {
        Self {
            submissions: 0,
            approved: 0,
            limit_rejections: 0,
            other_rejections: 0,
            settled: 0,
            stale_refusals: 0,
            rate_ticks: 0,
            notices_received: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    pub fn record_approved(&mut self, latency_us: u64) {
        self.submissions += 1;
        self.approved += 1;

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_us);
    }

    pub fn record_limit_rejection(&mut self) {
        self.submissions += 1;
        self.limit_rejections += 1;
    }

    pub fn record_other_rejection(&mut self) {
        self.submissions += 1;
        self.other_rejections += 1;
    }

    pub fn average_latency_us(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    pub fn p50_latency_us(&self) -> u64 {
        self.percentile_latency(50)
    }

    pub fn p99_latency_us(&self) -> u64 {
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

    /// Share of submissions approved.
    pub fn approval_rate(&self) -> f64 {
        if self.submissions == 0 {
            return 0.0;
        }

        self.approved as f64 / self.submissions as f64
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything printed when a run ends.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub scenario: Option<String>,
    pub elapsed_ms: u128,
    pub simulation: SimulationMetrics,
    pub approval_rate: f64,
    pub p50_submit_latency_us: u64,
    pub p99_submit_latency_us: u64,
    pub desk: MetricsSnapshot,
    pub transactions_by_state: BTreeMap<String, usize>,
}

impl SimulationReport {
    pub fn new(
        scenario: Option<String>,
        elapsed_ms: u128,
        simulation: SimulationMetrics,
        desk: MetricsSnapshot,
        transactions_by_state: BTreeMap<String, usize>,
    ) -> Self {
        Self {
            scenario,
            elapsed_ms,
            approval_rate: simulation.approval_rate(),
            p50_submit_latency_us: simulation.p50_latency_us(),
            p99_submit_latency_us: simulation.p99_latency_us(),
            simulation,
            desk,
            transactions_by_state,
        }
    }
}
