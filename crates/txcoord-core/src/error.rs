use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Error reported by a participant client implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ParticipantError {
    pub message: String,
    /// Whether another attempt may succeed. Non-retryable errors skip the
    /// remaining retry budget.
    pub retryable: bool,
}

impl ParticipantError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// The protocol step a participant call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Prepare,
    Commit,
    Abort,
    Execute,
    Compensate,
    HealthCheck,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Prepare => "prepare",
            Self::Commit => "commit",
            Self::Abort => "abort",
            Self::Execute => "execute",
            Self::Compensate => "compensate",
            Self::HealthCheck => "health check",
        };
        write!(f, "{s}")
    }
}

/// Final failure of a participant call once timeouts and retries are spent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CallError {
    #[error("{phase} call to '{target}' timed out after {after:?}")]
    Timeout {
        target: String,
        phase: Phase,
        after: Duration,
    },

    #[error("{phase} call to '{target}' failed")]
    Rejected {
        target: String,
        phase: Phase,
        #[source]
        source: ParticipantError,
    },

    #[error("operation '{operation}' reported an unsuccessful outcome")]
    OperationUnsuccessful { operation: String },
}

impl CallError {
    /// Whether a retry of the same call is worth attempting.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Rejected { source, .. } => source.retryable,
            Self::OperationUnsuccessful { .. } => false,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Timeout { phase, .. } | Self::Rejected { phase, .. } => Some(*phase),
            Self::OperationUnsuccessful { .. } => None,
        }
    }
}
