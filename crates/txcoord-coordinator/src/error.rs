use thiserror::Error;
use txcoord_core::{CallError, ParticipantId, TransactionId, TransactionState};

use crate::config::ConfigError;
use crate::log::LogError;

/// Details about a failed compensation during saga rollback.
#[derive(Debug, Clone, Error)]
#[error("compensation for step '{step}' failed ({description})")]
pub struct CompensationFailure {
    /// Name of the step whose compensation failed.
    pub step: String,
    /// Description of what the compensation was trying to do.
    pub description: String,
    /// The error that occurred during compensation.
    #[source]
    pub error: CallError,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoordinatorError {
    #[error("participant '{0}' is not registered")]
    ParticipantNotFound(ParticipantId),

    #[error("participant '{participant}' voted to abort: {reason}")]
    PrepareVoteAbort {
        participant: ParticipantId,
        reason: String,
    },

    #[error("participant '{participant}' failed to commit; requires external reconciliation")]
    CommitFailure {
        participant: ParticipantId,
        #[source]
        source: CallError,
    },

    #[error("saga step '{step}' failed after {steps_completed} completed step(s)")]
    OperationFailure {
        step: String,
        steps_completed: usize,
        #[source]
        source: CallError,
        compensation_failures: Vec<CompensationFailure>,
    },

    #[error("invalid transaction request: {0}")]
    InvalidRequest(String),

    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: TransactionState,
        to: TransactionState,
    },

    #[error("transaction '{0}' not found")]
    TransactionNotFound(TransactionId),

    #[error("transaction '{id}' already finished as {state}")]
    TransactionFinished {
        id: TransactionId,
        state: TransactionState,
    },

    #[error("coordinator is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Log(#[from] LogError),

    #[error("invalid coordinator configuration")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Render an error and its sources on one line, joined by `": "`.
#[must_use]
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
