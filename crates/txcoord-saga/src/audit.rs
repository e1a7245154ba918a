//! Per-run trail of what the engine did to each step.

use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StepStatus {
    /// Forward action started or finished without error.
    Executed,
    Failed,
    Compensated,
    CompensationFailed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Compensated => "compensated",
            Self::CompensationFailed => "compensation failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step: String,
    pub status: StepStatus,
    pub started_at: Instant,
    /// Set when the forward action returns, and moved forward again when the
    /// step is compensated.
    pub finished_at: Option<Instant>,
    /// How the step would be undone; `None` for steps without compensation.
    pub compensation: Option<String>,
}

impl StepRecord {
    /// Time from start until the last status change, if there was one.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        self.finished_at
            .map(|finished| finished.duration_since(self.started_at))
    }
}

#[derive(Debug, Default)]
pub struct SagaAuditLog {
    records: Vec<StepRecord>,
    cancelled_before: Option<String>,
}

impl SagaAuditLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a record for a step about to run and return its index.
    pub(crate) fn begin(&mut self, step: &str) -> usize {
        self.records.push(StepRecord {
            step: step.to_string(),
            status: StepStatus::Executed,
            started_at: Instant::now(),
            finished_at: None,
            compensation: None,
        });
        self.records.len() - 1
    }

    pub(crate) fn executed(&mut self, index: usize, compensation: Option<String>) {
        if let Some(record) = self.settle(index, StepStatus::Executed) {
            record.compensation = compensation;
        }
    }

    pub(crate) fn failed(&mut self, index: usize) {
        self.settle(index, StepStatus::Failed);
    }

    pub(crate) fn compensated(&mut self, index: usize, succeeded: bool) {
        let status = if succeeded {
            StepStatus::Compensated
        } else {
            StepStatus::CompensationFailed
        };
        self.settle(index, status);
    }

    pub(crate) fn cancelled(&mut self, next_step: &str) {
        self.cancelled_before = Some(next_step.to_string());
    }

    fn settle(&mut self, index: usize, status: StepStatus) -> Option<&mut StepRecord> {
        let record = self.records.get_mut(index)?;
        record.status = status;
        record.finished_at = Some(Instant::now());
        Some(record)
    }

    #[must_use]
    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// The step that was skipped because the run was cancelled.
    #[must_use]
    pub fn cancelled_before(&self) -> Option<&str> {
        self.cancelled_before.as_deref()
    }

    #[must_use]
    pub fn count(&self, status: StepStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    #[must_use]
    pub fn compensated_count(&self) -> usize {
        self.count(StepStatus::Compensated)
    }

    #[must_use]
    pub fn compensation_failed_count(&self) -> usize {
        self.count(StepStatus::CompensationFailed)
    }

    /// One-line rendering, e.g. `reserve=compensated charge=failed`.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = self
            .records
            .iter()
            .map(|r| format!("{}={}", r.step, r.status.to_string().replace(' ', "_")))
            .collect();
        if let Some(step) = &self.cancelled_before {
            parts.push(format!("cancelled_before={step}"));
        }
        parts.join(" ")
    }
}
