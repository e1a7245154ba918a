use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use txcoord_core::{
    CommitFailure, ParticipantId, SagaOperation, TransactionId, TransactionKind, TransactionState,
    TransactionStatus,
};

use crate::error::{CoordinatorError, Result};
use crate::metrics::MetricsSnapshot;

/// A transaction submitted to [`Coordinator::start_transaction`](crate::Coordinator::start_transaction).
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub kind: TransactionKind,
    pub participants: Vec<ParticipantId>,
    pub operations: Vec<SagaOperation>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub context: Value,
    /// Whether a failed saga rolls back its completed steps.
    pub compensate: bool,
}

impl TransactionRequest {
    #[must_use]
    pub fn two_phase<I, P>(participants: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ParticipantId>,
    {
        Self {
            kind: TransactionKind::TwoPhaseCommit,
            participants: participants.into_iter().map(Into::into).collect(),
            operations: Vec::new(),
            timeout: None,
            max_retries: None,
            context: Value::Null,
            compensate: true,
        }
    }

    #[must_use]
    pub fn saga(operations: Vec<SagaOperation>) -> Self {
        Self {
            kind: TransactionKind::Saga,
            participants: Vec::new(),
            operations,
            timeout: None,
            max_retries: None,
            context: Value::Null,
            compensate: true,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn without_compensation(mut self) -> Self {
        self.compensate = false;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self.kind {
            TransactionKind::TwoPhaseCommit => {
                if self.participants.is_empty() {
                    return Err(CoordinatorError::InvalidRequest(
                        "two-phase transaction needs at least one participant".to_string(),
                    ));
                }
                let mut seen = HashSet::new();
                if let Some(duplicate) = self.participants.iter().find(|id| !seen.insert(*id)) {
                    return Err(CoordinatorError::InvalidRequest(format!(
                        "participant '{duplicate}' is listed more than once"
                    )));
                }
            }
            TransactionKind::Saga => {
                if self.operations.is_empty() {
                    return Err(CoordinatorError::InvalidRequest(
                        "saga needs at least one operation".to_string(),
                    ));
                }
                let mut seen = HashSet::new();
                if let Some(duplicate) = self
                    .operations
                    .iter()
                    .map(|op| op.forward.name.as_str())
                    .find(|name| !seen.insert(*name))
                {
                    return Err(CoordinatorError::InvalidRequest(format!(
                        "saga step '{duplicate}' appears more than once"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// How a transaction resolved.
///
/// `Aborted` and an `Err` from `start_transaction` both mean the transaction
/// did not commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionOutcome {
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    /// Forward steps completed; sagas only.
    pub steps_completed: Option<usize>,
    /// Participants that failed after the commit decision.
    pub commit_failures: Vec<CommitFailure>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl TransactionOutcome {
    /// Whether some participant must be reconciled outside the coordinator.
    #[must_use]
    pub fn requires_reconciliation(&self) -> bool {
        !self.commit_failures.is_empty()
    }
}

/// Result of [`Coordinator::abort_transaction`](crate::Coordinator::abort_transaction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortOutcome {
    /// The abort ran to completion.
    Aborted,
    /// A running saga will stop before its next step and compensate.
    Requested,
    /// An abort or compensation is already running.
    InProgress,
    NotFound,
    AlreadyFinished(TransactionState),
    /// The commit decision is final.
    Rejected(TransactionState),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub active_transactions: usize,
    pub total_transactions: usize,
    pub registered_participants: usize,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every in-flight transaction reached a terminal state in time.
    pub drained: bool,
    pub remaining: usize,
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use txcoord_core::Operation;

    use super::*;

    #[test]
    fn two_phase_request_needs_participants() {
        let request = TransactionRequest::two_phase(Vec::<ParticipantId>::new());

        assert!(matches!(
            request.validate(),
            Err(CoordinatorError::InvalidRequest(_))
        ));
    }

    #[test]
    fn duplicate_participants_are_rejected() {
        let request = TransactionRequest::two_phase(["a", "b", "a"]);

        let err = request.validate().expect_err("duplicate must be rejected");

        assert!(err.to_string().contains("'a'"));
    }

    #[test]
    fn saga_request_needs_operations() {
        let request = TransactionRequest::saga(Vec::new());

        assert!(request.validate().is_err());
    }

    #[test]
    fn duplicate_saga_steps_are_rejected() {
        let request = TransactionRequest::saga(vec![
            SagaOperation::new(Operation::new("charge")),
            SagaOperation::new(Operation::new("ship")),
            SagaOperation::new(Operation::new("charge")),
        ]);

        let err = request.validate().expect_err("duplicate step must be rejected");

        assert!(err.to_string().contains("'charge'"));
    }

    #[test]
    fn builders_set_optional_fields() {
        let request = TransactionRequest::saga(vec![SagaOperation::new(Operation::new("step"))])
            .with_timeout(Duration::from_millis(10))
            .with_max_retries(0)
            .with_context(serde_json::json!({"k": 1}))
            .without_compensation();

        assert!(request.validate().is_ok());
        assert_eq!(request.timeout, Some(Duration::from_millis(10)));
        assert_eq!(request.max_retries, Some(0));
        assert!(!request.compensate);
    }

    #[test]
    fn outcome_with_commit_failures_requires_reconciliation() {
        let outcome = TransactionOutcome {
            transaction_id: TransactionId::new(),
            status: TransactionStatus::Committed,
            steps_completed: None,
            commit_failures: vec![CommitFailure {
                participant: ParticipantId::from("ledger"),
                error: "disk full".to_string(),
            }],
            duration: Duration::from_millis(12),
        };

        assert!(outcome.requires_reconciliation());
        let json = serde_json::to_value(&outcome).expect("serializes");
        assert_eq!(json["duration"], 12);
        assert_eq!(json["status"], "committed");
    }
}
