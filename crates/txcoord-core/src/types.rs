use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TransactionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for ParticipantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    TwoPhaseCommit,
    Saga,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TwoPhaseCommit => "2pc",
            Self::Saga => "saga",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle state of a coordinated transaction.
///
/// `Committed`, `Aborted` and `Failed` are terminal. Use
/// [`TransactionState::can_transition_to`] before moving a record; the
/// transaction store refuses any edge not listed there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Pending,
    Preparing,
    Prepared,
    Committing,
    Committed,
    Aborting,
    Aborted,
    Failed,
    /// Saga forward steps are running.
    Executing,
    /// Saga compensation sweep is running.
    Compensating,
}

impl TransactionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted | Self::Failed)
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use TransactionState::{
            Aborted, Aborting, Committed, Committing, Compensating, Executing, Failed, Pending,
            Prepared, Preparing,
        };

        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }

        matches!(
            (self, next),
            (Pending, Preparing | Executing | Aborting)
                | (Preparing, Prepared | Aborting)
                | (Prepared | Committing, Aborting)
                | (Prepared, Committing)
                | (Committing | Executing, Committed)
                | (Executing, Compensating | Aborting | Aborted)
                | (Aborting, Aborted | Compensating)
                | (Compensating, Aborted)
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Preparing => "preparing",
            Self::Prepared => "prepared",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Aborting => "aborting",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
            Self::Executing => "executing",
            Self::Compensating => "compensating",
        };
        write!(f, "{s}")
    }
}

/// Terminal status reported to a caller whose transaction resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Committed,
    Aborted,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Committed => write!(f, "committed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Commit,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareResponse {
    pub vote: Vote,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl PrepareResponse {
    #[must_use]
    pub fn commit() -> Self {
        Self {
            vote: Vote::Commit,
            data: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn abort() -> Self {
        Self {
            vote: Vote::Abort,
            data: serde_json::Value::Null,
        }
    }
}

/// An action a participant is asked to perform, forward or compensating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub participant: Option<ParticipantId>,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Operation {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            participant: None,
            action: String::new(),
            payload: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn on(mut self, participant: impl Into<ParticipantId>) -> Self {
        self.participant = Some(participant.into());
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// A saga step: a forward operation and the optional action that undoes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaOperation {
    #[serde(flatten)]
    pub forward: Operation,
    #[serde(default)]
    pub compensation: Option<Operation>,
}

impl SagaOperation {
    #[must_use]
    pub fn new(forward: Operation) -> Self {
        Self {
            forward,
            compensation: None,
        }
    }

    #[must_use]
    pub fn compensated_by(mut self, compensation: Operation) -> Self {
        self.compensation = Some(compensation);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub success: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub compensation_context: serde_json::Value,
}

impl OperationOutcome {
    #[must_use]
    pub fn succeeded(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            compensation_context: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_compensation_context(mut self, context: serde_json::Value) -> Self {
        self.compensation_context = context;
        self
    }
}

/// What must be run to undo a completed saga step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationEntry {
    pub operation: Operation,
    pub captured_context: serde_json::Value,
}

/// Registration input for a participant.
///
/// Unset timeout and retry limits fall back to the coordinator defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParticipantConfig {
    pub endpoint: String,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub supports_compensation: bool,
}

impl ParticipantConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
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
    pub fn with_compensation(mut self, supports_compensation: bool) -> Self {
        self.supports_compensation = supports_compensation;
        self
    }
}

/// A registered participant with its effective calling contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub endpoint: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub supports_compensation: bool,
}

/// Read-only view of a transaction handed to participants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionView {
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub context: serde_json::Value,
    /// Set only when a compensation is executed.
    pub captured_context: Option<serde_json::Value>,
}

impl TransactionView {
    #[must_use]
    pub fn with_captured_context(&self, captured: serde_json::Value) -> Self {
        Self {
            captured_context: Some(captured),
            ..self.clone()
        }
    }
}

/// A participant that failed the commit phase after the decision was final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitFailure {
    pub participant: ParticipantId,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_committed_aborted_failed() {
        assert!(TransactionState::Committed.is_terminal());
        assert!(TransactionState::Aborted.is_terminal());
        assert!(TransactionState::Failed.is_terminal());
        assert!(!TransactionState::Pending.is_terminal());
        assert!(!TransactionState::Aborting.is_terminal());
        assert!(!TransactionState::Compensating.is_terminal());
    }

    #[test]
    fn two_phase_happy_path_edges_are_allowed() {
        let path = [
            TransactionState::Pending,
            TransactionState::Preparing,
            TransactionState::Prepared,
            TransactionState::Committing,
            TransactionState::Committed,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn abort_edges_follow_prepare_and_commit() {
        assert!(TransactionState::Preparing.can_transition_to(TransactionState::Aborting));
        assert!(TransactionState::Committing.can_transition_to(TransactionState::Aborting));
        assert!(TransactionState::Aborting.can_transition_to(TransactionState::Aborted));
        assert!(!TransactionState::Preparing.can_transition_to(TransactionState::Aborted));
        assert!(!TransactionState::Preparing.can_transition_to(TransactionState::Committing));
    }

    #[test]
    fn saga_edges_are_allowed() {
        assert!(TransactionState::Pending.can_transition_to(TransactionState::Executing));
        assert!(TransactionState::Executing.can_transition_to(TransactionState::Committed));
        assert!(TransactionState::Executing.can_transition_to(TransactionState::Compensating));
        assert!(TransactionState::Compensating.can_transition_to(TransactionState::Aborted));
        assert!(!TransactionState::Compensating.can_transition_to(TransactionState::Committed));
    }

    #[test]
    fn any_live_state_can_fail() {
        for state in [
            TransactionState::Pending,
            TransactionState::Preparing,
            TransactionState::Prepared,
            TransactionState::Committing,
            TransactionState::Aborting,
            TransactionState::Executing,
            TransactionState::Compensating,
        ] {
            assert!(state.can_transition_to(TransactionState::Failed), "{state}");
        }
    }

    #[test]
    fn terminal_states_never_transition() {
        for terminal in [
            TransactionState::Committed,
            TransactionState::Aborted,
            TransactionState::Failed,
        ] {
            assert!(!terminal.can_transition_to(TransactionState::Failed));
            assert!(!terminal.can_transition_to(TransactionState::Aborting));
            assert!(!terminal.can_transition_to(TransactionState::Pending));
        }
    }

    #[test]
    fn transaction_ids_are_unique() {
        assert_ne!(TransactionId::new(), TransactionId::new());
    }

    #[test]
    fn saga_operation_deserializes_flattened_forward() -> anyhow::Result<()> {
        let op: SagaOperation = serde_json::from_value(serde_json::json!({
            "name": "reserve",
            "participant": "inventory",
            "action": "reserve_stock",
            "compensation": { "name": "release", "participant": "inventory" }
        }))?;

        assert_eq!(op.forward.name, "reserve");
        assert_eq!(op.forward.participant, Some(ParticipantId::from("inventory")));
        assert_eq!(
            op.compensation.map(|c| c.name),
            Some("release".to_string())
        );
        Ok(())
    }

    #[test]
    fn state_serializes_snake_case() -> anyhow::Result<()> {
        let json = serde_json::to_string(&TransactionState::Compensating)?;
        assert_eq!(json, "\"compensating\"");
        Ok(())
    }
}
