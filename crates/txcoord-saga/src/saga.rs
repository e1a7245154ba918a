use std::fmt::Debug;

use tracing::{debug, warn};

use crate::audit::SagaAuditLog;
use crate::erased::{Captured, ErasedStep};
use crate::error::{CompensationError, SagaError};
use crate::step::SagaContext;

/// Result of a saga whose steps all succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SagaOutcome {
    pub steps_completed: usize,
}

struct PendingCompensation {
    step: usize,
    record: usize,
    captured: Captured,
}

/// A compiled saga ready for execution.
///
/// Steps execute strictly in order. If any step fails, previously completed
/// steps are compensated in reverse order (LIFO).
pub struct Saga<Ctx, Err> {
    steps: Vec<Box<dyn ErasedStep<Ctx, Err>>>,
    compensate_on_failure: bool,
}

impl<Ctx, Err> Saga<Ctx, Err>
where
    Ctx: SagaContext,
    Err: Debug + Send,
{
    pub(crate) fn from_steps(
        steps: Vec<Box<dyn ErasedStep<Ctx, Err>>>,
        compensate_on_failure: bool,
    ) -> Self {
        Self {
            steps,
            compensate_on_failure,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    #[must_use]
    pub fn compensates_on_failure(&self) -> bool {
        self.compensate_on_failure
    }

    /// Execute the saga.
    ///
    /// On failure, compensates all previously completed steps in reverse order
    /// unless the saga was built `without_compensation()`.
    ///
    /// # Errors
    ///
    /// Returns `SagaError::StepFailed` if a step fails and all compensations succeed.
    /// Returns `SagaError::CompensationFailed` if a step fails and some compensations also fail.
    /// Returns `SagaError::Cancelled` if the context reported cancellation.
    pub async fn execute(&self, ctx: &Ctx) -> Result<SagaOutcome, SagaError<Err>> {
        let (result, _audit_log) = self.execute_internal(ctx).await;
        result
    }

    /// Execute the saga and return both the result and an audit log.
    pub async fn execute_with_audit(
        &self,
        ctx: &Ctx,
    ) -> (Result<SagaOutcome, SagaError<Err>>, SagaAuditLog) {
        self.execute_internal(ctx).await
    }

    async fn execute_internal(
        &self,
        ctx: &Ctx,
    ) -> (Result<SagaOutcome, SagaError<Err>>, SagaAuditLog) {
        let mut audit_log = SagaAuditLog::new();
        let mut compensation_stack: Vec<PendingCompensation> = Vec::new();

        for (index, step) in self.steps.iter().enumerate() {
            if ctx.is_cancelled() {
                debug!(next_step = step.name(), completed = index, "saga cancelled");
                audit_log.cancelled(step.name());
                let compensation_errors = self
                    .compensate_if_enabled(ctx, &mut audit_log, compensation_stack)
                    .await;
                return (
                    Err(SagaError::Cancelled {
                        steps_completed: index,
                        compensation_errors,
                    }),
                    audit_log,
                );
            }

            let record = audit_log.begin(step.name());

            match step.execute_erased(ctx).await {
                Ok(captured) => {
                    if step.has_compensation() {
                        audit_log.executed(record, Some(step.compensation_description()));
                        compensation_stack.push(PendingCompensation {
                            step: index,
                            record,
                            captured,
                        });
                    } else {
                        audit_log.executed(record, None);
                    }
                }
                Err(error) => {
                    audit_log.failed(record);
                    debug!(step = step.name(), completed = index, "saga step failed");
                    let compensation_errors = self
                        .compensate_if_enabled(ctx, &mut audit_log, compensation_stack)
                        .await;
                    let saga_error = if compensation_errors.is_empty() {
                        SagaError::StepFailed {
                            step: step.name().to_string(),
                            steps_completed: index,
                            source: error,
                        }
                    } else {
                        SagaError::CompensationFailed {
                            failed_step: step.name().to_string(),
                            steps_completed: index,
                            step_error: error,
                            compensation_errors,
                        }
                    };
                    return (Err(saga_error), audit_log);
                }
            }
        }

        (
            Ok(SagaOutcome {
                steps_completed: self.steps.len(),
            }),
            audit_log,
        )
    }

    async fn compensate_if_enabled(
        &self,
        ctx: &Ctx,
        audit_log: &mut SagaAuditLog,
        compensation_stack: Vec<PendingCompensation>,
    ) -> Vec<CompensationError<Err>> {
        if !self.compensate_on_failure {
            debug!(
                pending = compensation_stack.len(),
                "compensation disabled, leaving completed steps in place"
            );
            return Vec::new();
        }
        self.compensate(ctx, audit_log, compensation_stack).await
    }

    async fn compensate(
        &self,
        ctx: &Ctx,
        audit_log: &mut SagaAuditLog,
        mut compensation_stack: Vec<PendingCompensation>,
    ) -> Vec<CompensationError<Err>> {
        let mut compensation_errors = Vec::new();

        while let Some(pending) = compensation_stack.pop() {
            let step = &self.steps[pending.step];
            let description = step.compensation_description();

            match step.compensate_erased(ctx, pending.captured).await {
                Ok(()) => {
                    debug!(step = step.name(), "compensated");
                    audit_log.compensated(pending.record, true);
                }
                Err(error) => {
                    warn!(step = step.name(), error = ?error, "compensation failed, continuing");
                    audit_log.compensated(pending.record, false);
                    compensation_errors.push(CompensationError {
                        step: step.name().to_string(),
                        description,
                        error,
                    });
                }
            }
        }

        compensation_errors
    }
}
