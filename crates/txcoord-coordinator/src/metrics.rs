use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Default)]
struct RunningAverage {
    samples: u64,
    mean_ms: f64,
}

/// Coordinator-wide counters.
#[derive(Debug, Default)]
pub struct Metrics {
    started: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    failed: AtomicU64,
    sagas_executed: AtomicU64,
    compensations_executed: AtomicU64,
    compensation_failures: AtomicU64,
    commit_failures: AtomicU64,
    retries: AtomicU64,
    duration: Mutex<RunningAverage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub transactions_started: u64,
    pub transactions_committed: u64,
    pub transactions_aborted: u64,
    pub transactions_failed: u64,
    pub sagas_executed: u64,
    pub compensations_executed: u64,
    pub compensation_failures: u64,
    pub commit_failures: u64,
    pub retries: u64,
    pub average_duration_ms: f64,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_saga_executed(&self) {
        self.sagas_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compensation(&self, succeeded: bool) {
        self.compensations_executed.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.compensation_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_commit_failure(&self) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retries(&self, retries: u32) {
        self.retries.fetch_add(u64::from(retries), Ordering::Relaxed);
    }

    /// Fold a finished transaction's duration into the running average.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_duration(&self, duration: Duration) {
        let sample = duration.as_secs_f64() * 1000.0;
        let mut average = self.duration.lock();
        average.samples += 1;
        average.mean_ms += (sample - average.mean_ms) / average.samples as f64;
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transactions_started: self.started.load(Ordering::Relaxed),
            transactions_committed: self.committed.load(Ordering::Relaxed),
            transactions_aborted: self.aborted.load(Ordering::Relaxed),
            transactions_failed: self.failed.load(Ordering::Relaxed),
            sagas_executed: self.sagas_executed.load(Ordering::Relaxed),
            compensations_executed: self.compensations_executed.load(Ordering::Relaxed),
            compensation_failures: self.compensation_failures.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            average_duration_ms: self.duration.lock().mean_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();

        metrics.record_started();
        metrics.record_started();
        metrics.record_committed();
        metrics.record_aborted();
        metrics.record_compensation(true);
        metrics.record_compensation(false);
        metrics.record_retries(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.transactions_started, 2);
        assert_eq!(snapshot.transactions_committed, 1);
        assert_eq!(snapshot.transactions_aborted, 1);
        assert_eq!(snapshot.transactions_failed, 0);
        assert_eq!(snapshot.compensations_executed, 2);
        assert_eq!(snapshot.compensation_failures, 1);
        assert_eq!(snapshot.retries, 3);
    }

    #[test]
    fn average_duration_is_incremental_mean() {
        let metrics = Metrics::new();

        metrics.record_duration(Duration::from_millis(10));
        metrics.record_duration(Duration::from_millis(20));
        metrics.record_duration(Duration::from_millis(60));

        let average = metrics.snapshot().average_duration_ms;
        assert!((average - 30.0).abs() < 1e-9, "average was {average}");
    }

    #[test]
    fn empty_metrics_report_zero_average() {
        let snapshot = Metrics::new().snapshot();

        assert!(snapshot.average_duration_ms.abs() < f64::EPSILON);
    }
}
