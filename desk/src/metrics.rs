//! Metrics collection for desk monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Desk metrics.
#[derive(Default)]
pub struct DeskMetrics {
    /// Rate observations committed.
    pub rates_recorded: AtomicU64,
    /// Quotes committed by any fan-out.
    pub quotes_generated: AtomicU64,
    /// Fan-out attempts that failed.
    pub fanout_failures: AtomicU64,
    /// Lookups served from another segment's quote.
    pub fallback_quotes: AtomicU64,
    /// Submissions received.
    pub submissions_total: AtomicU64,
    /// Submissions that created a transaction.
    pub submissions_approved: AtomicU64,
    /// Submissions rejected by a limit.
    pub limit_rejections: AtomicU64,
    /// Submissions that timed out waiting for the client lock.
    pub submission_timeouts: AtomicU64,
    /// State transitions requested through the desk.
    pub transitions: AtomicU64,
    /// Pending transactions cancelled by a rate change.
    pub stale_cancellations: AtomicU64,
    /// Per-transaction failures during sweeps.
    pub sweep_failures: AtomicU64,
    /// Cancellation notices delivered to the notifier.
    pub notifications_sent: AtomicU64,
    /// Cancellation notices the notifier failed to take.
    pub notifications_failed: AtomicU64,
}

impl DeskMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rate_recorded(&self) {
        self.rates_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn quotes_generated(&self, count: usize) {
        self.quotes_generated.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn fanout_failed(&self) {
        self.fanout_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fallback_quote(&self) {
        self.fallback_quotes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn submission_received(&self) {
        self.submissions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn submission_approved(&self) {
        self.submissions_approved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn limit_rejected(&self) {
        self.limit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn submission_timed_out(&self) {
        self.submission_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transition_applied(&self) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale_cancelled(&self) {
        self.stale_cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sweep_failed(&self) {
        self.sweep_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_failed(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rates_recorded: self.rates_recorded.load(Ordering::Relaxed),
            quotes_generated: self.quotes_generated.load(Ordering::Relaxed),
            fanout_failures: self.fanout_failures.load(Ordering::Relaxed),
            fallback_quotes: self.fallback_quotes.load(Ordering::Relaxed),
            submissions_total: self.submissions_total.load(Ordering::Relaxed),
            submissions_approved: self.submissions_approved.load(Ordering::Relaxed),
            limit_rejections: self.limit_rejections.load(Ordering::Relaxed),
            submission_timeouts: self.submission_timeouts.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            stale_cancellations: self.stale_cancellations.load(Ordering::Relaxed),
            sweep_failures: self.sweep_failures.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let series: [(&str, &str, u64); 13] = [
            ("rates_recorded", "Rate observations committed", snapshot.rates_recorded),
            ("quotes_generated", "Quotes committed", snapshot.quotes_generated),
            ("fanout_failures", "Failed quote fan-out attempts", snapshot.fanout_failures),
            ("fallback_quotes", "Quotes served from another segment", snapshot.fallback_quotes),
            ("submissions_total", "Trade submissions received", snapshot.submissions_total),
            ("submissions_approved", "Trade submissions approved", snapshot.submissions_approved),
            ("limit_rejections", "Trade submissions rejected by a limit", snapshot.limit_rejections),
            ("submission_timeouts", "Trade submissions timed out", snapshot.submission_timeouts),
            ("transitions", "Transaction state transitions", snapshot.transitions),
            ("stale_cancellations", "Pending trades cancelled by a rate change", snapshot.stale_cancellations),
            ("sweep_failures", "Per-transaction sweep failures", snapshot.sweep_failures),
            ("notifications_sent", "Cancellation notices delivered", snapshot.notifications_sent),
            ("notifications_failed", "Cancellation notices not delivered", snapshot.notifications_failed),
        ];

        let mut out = String::new();
        for (name, help, value) in series {
            out.push_str(&format!(
                "# HELP fxdesk_{name} {help}\n# TYPE fxdesk_{name} counter\nfxdesk_{name} {value}\n\n"
            ));
        }
        out
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub rates_recorded: u64,
    pub quotes_generated: u64,
    pub fanout_failures: u64,
    pub fallback_quotes: u64,
    pub submissions_total: u64,
    pub submissions_approved: u64,
    pub limit_rejections: u64,
    pub submission_timeouts: u64,
    pub transitions: u64,
    pub stale_cancellations: u64,
    pub sweep_failures: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<DeskMetrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = DeskMetrics::new();

        metrics.submission_received();
        metrics.submission_received();
        metrics.submission_approved();
        metrics.quotes_generated(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.submissions_total, 2);
        assert_eq!(snapshot.submissions_approved, 1);
        assert_eq!(snapshot.quotes_generated, 3);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = DeskMetrics::new();
        metrics.stale_cancelled();

        let output = metrics.to_prometheus();
        assert!(output.contains("fxdesk_stale_cancellations 1"));
        assert!(output.contains("# TYPE fxdesk_rates_recorded counter"));
    }
}
