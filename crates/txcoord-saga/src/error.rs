use std::fmt::Debug;

use thiserror::Error;

/// Error from a failed compensation operation.
#[derive(Debug, thiserror::Error)]
#[error("compensation failed for step '{step}': {description}")]
pub struct CompensationError<E> {
    /// Name of the step whose compensation failed.
    pub step: String,
    /// Description of what the compensation was trying to do.
    pub description: String,
    /// The underlying error.
    #[source]
    pub error: E,
}

/// Error from saga execution.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SagaError<E: Debug> {
    /// A step failed and all compensations succeeded.
    #[error("step '{step}' failed after {steps_completed} completed step(s)")]
    StepFailed {
        /// Name of the step that failed.
        step: String,
        /// Number of steps that completed before the failure.
        steps_completed: usize,
        /// The error that caused the step to fail.
        #[source]
        source: E,
    },

    /// A step failed and some compensations also failed.
    #[error("step '{failed_step}' failed, and {} compensation(s) also failed", compensation_errors.len())]
    CompensationFailed {
        /// Name of the step that originally failed.
        failed_step: String,
        /// Number of steps that completed before the failure.
        steps_completed: usize,
        /// The error from the failed step.
        step_error: E,
        /// Errors from failed compensations.
        compensation_errors: Vec<CompensationError<E>>,
    },

    /// The context reported cancellation before a step was started.
    #[error("saga cancelled after {steps_completed} completed step(s)")]
    Cancelled {
        /// Number of steps that completed before cancellation.
        steps_completed: usize,
        /// Errors from failed compensations.
        compensation_errors: Vec<CompensationError<E>>,
    },
}

/// A step failure pulled apart into its pieces.
#[derive(Debug)]
pub struct StepFailure<E> {
    pub step: String,
    pub steps_completed: usize,
    pub error: E,
    pub compensation_errors: Vec<CompensationError<E>>,
}

impl<E: Debug> SagaError<E> {
    /// Split a step failure into its parts.
    ///
    /// # Errors
    ///
    /// Returns `self` unchanged when the saga was cancelled rather than failed.
    pub fn into_step_failure(self) -> Result<StepFailure<E>, Self> {
        match self {
            Self::StepFailed {
                step,
                steps_completed,
                source,
            } => Ok(StepFailure {
                step,
                steps_completed,
                error: source,
                compensation_errors: Vec::new(),
            }),
            Self::CompensationFailed {
                failed_step,
                steps_completed,
                step_error,
                compensation_errors,
            } => Ok(StepFailure {
                step: failed_step,
                steps_completed,
                error: step_error,
                compensation_errors,
            }),
            cancelled @ Self::Cancelled { .. } => Err(cancelled),
        }
    }

    #[must_use]
    pub fn steps_completed(&self) -> usize {
        match self {
            Self::StepFailed {
                steps_completed, ..
            }
            | Self::CompensationFailed {
                steps_completed, ..
            }
            | Self::Cancelled {
                steps_completed, ..
            } => *steps_completed,
        }
    }

    #[must_use]
    pub fn compensation_errors(&self) -> &[CompensationError<E>] {
        match self {
            Self::StepFailed { .. } => &[],
            Self::CompensationFailed {
                compensation_errors,
                ..
            }
            | Self::Cancelled {
                compensation_errors,
                ..
            } => compensation_errors,
        }
    }
}
