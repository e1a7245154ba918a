use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use txcoord_core::{
    CallError, CompensationEntry, Operation, OperationOutcome, Phase, SagaOperation,
    TransactionId, TransactionState, TransactionView,
};
use txcoord_saga::{Saga, SagaBuilder, SagaContext, SagaStep, StepFailure};

use crate::engine::{Engine, Termination};
use crate::error::{CompensationFailure, CoordinatorError, Result, error_chain};
use crate::events::TransactionEvent;
use crate::retry::{CallLimits, CallSpec};
use crate::transaction::TransactionOutcome;

/// Per-transaction context the saga steps run against.
pub(crate) struct SagaRun {
    engine: Arc<Engine>,
    id: TransactionId,
    timeout: Duration,
    max_retries: u32,
    requested: CallLimits,
    fallback_view: TransactionView,
}

impl SagaContext for SagaRun {
    fn is_cancelled(&self) -> bool {
        self.engine.store.state(&self.id) != Some(TransactionState::Executing)
    }
}

impl SagaRun {
    fn view(&self) -> TransactionView {
        self.engine
            .store
            .view(&self.id)
            .unwrap_or_else(|| self.fallback_view.clone())
    }

    /// Registered participants bring their own limits, capped by any the
    /// request set; anything else runs with the transaction's.
    fn call_spec(&self, operation: &Operation, phase: Phase) -> CallSpec {
        let participant = operation
            .participant
            .as_ref()
            .and_then(|id| self.engine.registry.get(id).ok());
        match participant {
            Some(participant) => CallSpec::for_participant(&participant, phase, self.requested),
            None => CallSpec {
                target: operation.name.clone(),
                phase,
                timeout: self.timeout,
                max_retries: self.max_retries,
            },
        }
    }

    async fn call(
        &self,
        operation: &Operation,
        view: &TransactionView,
        phase: Phase,
    ) -> std::result::Result<OperationOutcome, CallError> {
        let spec = self.call_spec(operation, phase);
        let attempted = self
            .engine
            .retry
            .call(&spec, || self.engine.client.execute_operation(operation, view))
            .await;
        self.engine.record_retries(&self.id, attempted.retries);
        let outcome = attempted.result?;
        if outcome.success {
            Ok(outcome)
        } else {
            Err(CallError::OperationUnsuccessful {
                operation: operation.name.clone(),
            })
        }
    }

    fn enter_compensating(&self) {
        if self.engine.store.state(&self.id) == Some(TransactionState::Compensating) {
            return;
        }
        if let Err(error) = self
            .engine
            .transition(&self.id, TransactionState::Compensating)
        {
            debug!(transaction = %self.id, error = %error, "compensation without state change");
        }
    }

    async fn compensate_entry(
        &self,
        step: &str,
        entry: CompensationEntry,
    ) -> std::result::Result<(), CallError> {
        self.enter_compensating();
        let view = self.view().with_captured_context(entry.captured_context);
        let result = self
            .call(&entry.operation, &view, Phase::Compensate)
            .await
            .map(|_| ());

        self.engine.metrics.record_compensation(result.is_ok());
        match &result {
            Ok(()) => debug!(transaction = %self.id, step, "compensated"),
            Err(error) => self.engine.events.publish(TransactionEvent::CompensationFailed {
                transaction: self.id,
                step: step.to_string(),
                error: error_chain(error),
            }),
        }
        result
    }

    /// Undo whatever is still on the record's compensation stack.
    async fn compensate_remaining(&self) {
        while let Some(entry) = self.engine.store.pop_compensation(&self.id) {
            let step = entry.operation.name.clone();
            if let Err(error) = self.compensate_entry(&step, entry).await {
                warn!(transaction = %self.id, %step, error = %error_chain(&error), "compensation failed, continuing");
            }
        }
    }
}

struct OperationStep {
    operation: SagaOperation,
}

#[async_trait]
impl SagaStep for OperationStep {
    type Context = SagaRun;
    type Error = CallError;
    type Captured = Option<CompensationEntry>;

    fn name(&self) -> &str {
        &self.operation.forward.name
    }

    async fn execute(&self, run: &SagaRun) -> std::result::Result<Self::Captured, CallError> {
        let forward = &self.operation.forward;
        let view = run.view();
        let outcome = run.call(forward, &view, Phase::Execute).await?;

        let entry = self
            .operation
            .compensation
            .clone()
            .map(|operation| CompensationEntry {
                operation,
                captured_context: outcome.compensation_context.clone(),
            });
        let recorded = run.engine.store.update(&run.id, |record| {
            record
                .step_results
                .insert(forward.name.clone(), outcome.data);
            record.steps_completed += 1;
            if let Some(entry) = &entry {
                record.compensation_stack.push(entry.clone());
            }
        });
        if let Err(error) = recorded {
            debug!(transaction = %run.id, step = %forward.name, error = %error, "step result not recorded");
        }
        debug!(transaction = %run.id, step = %forward.name, "step executed");
        Ok(entry)
    }

    fn has_compensation(&self) -> bool {
        self.operation.compensation.is_some()
    }

    async fn compensate(
        &self,
        run: &SagaRun,
        captured: Self::Captured,
    ) -> std::result::Result<(), CallError> {
        let Some(entry) = captured else {
            return Ok(());
        };
        let _ = run.engine.store.pop_compensation(&run.id);
        run.compensate_entry(self.name(), entry).await
    }

    fn compensation_description(&self) -> String {
        self.operation.compensation.as_ref().map_or_else(
            || format!("undo {}", self.name()),
            |operation| format!("run '{}'", operation.name),
        )
    }
}

fn build_saga(operations: &[SagaOperation], compensate: bool) -> Option<Saga<SagaRun, CallError>> {
    let (first, rest) = operations.split_first()?;
    let mut builder = SagaBuilder::new().first_step(OperationStep {
        operation: first.clone(),
    });
    for operation in rest {
        builder = builder.then(OperationStep {
            operation: operation.clone(),
        });
    }
    if !compensate {
        builder = builder.without_compensation();
    }
    Some(builder.build())
}

impl Engine {
    pub(crate) async fn run_saga(self: &Arc<Self>, id: TransactionId) -> Result<TransactionOutcome> {
        let record = self
            .store
            .get(&id)
            .ok_or(CoordinatorError::TransactionNotFound(id))?;

        if let Some(error) = self.unusable_participant(&record.operations) {
            if self.transition(&id, TransactionState::Aborting).is_ok() {
                self.finish(
                    &id,
                    Termination::Aborted {
                        reason: error.to_string(),
                    },
                )
                .await;
            }
            return Err(error);
        }

        let Some(saga) = build_saga(&record.operations, record.compensate) else {
            return Err(self
                .fail(
                    &id,
                    CoordinatorError::InvalidRequest("saga needs at least one operation".to_string()),
                )
                .await);
        };

        let run = SagaRun {
            engine: Arc::clone(self),
            id,
            timeout: record.timeout,
            max_retries: record.max_retries,
            requested: record.requested,
            fallback_view: record.view(),
        };

        if self.transition(&id, TransactionState::Executing).is_err() {
            return self.finish_cancelled(&run).await;
        }
        self.metrics.record_saga_executed();

        let (result, audit) = saga.execute_with_audit(&run).await;
        debug!(transaction = %id, steps = %audit.summary(), "saga run finished");

        match result {
            Ok(_) => {
                if self.finish(&id, Termination::Committed).await {
                    return self.outcome(&id);
                }
                // Aborted while the last step was running.
                if record.compensate {
                    run.compensate_remaining().await;
                }
                self.finish_cancelled(&run).await
            }
            Err(error) => match error.into_step_failure() {
                Ok(failure) => Err(self.saga_failed(&run, record.compensate, failure).await),
                Err(_) => self.finish_cancelled(&run).await,
            },
        }
    }

    /// First operation that names an unregistered participant, or routes a
    /// compensation to one that does not accept compensations.
    fn unusable_participant(&self, operations: &[SagaOperation]) -> Option<CoordinatorError> {
        operations.iter().find_map(|op| {
            let forward = op.forward.participant.as_ref();
            if let Some(id) = forward.filter(|id| !self.registry.contains(id)) {
                return Some(CoordinatorError::ParticipantNotFound(id.clone()));
            }
            let id = op.compensation.as_ref()?.participant.as_ref()?;
            match self.registry.get(id) {
                Ok(participant) if participant.supports_compensation => None,
                Ok(_) => Some(CoordinatorError::InvalidRequest(format!(
                    "participant '{id}' does not support compensation for '{}'",
                    op.forward.name
                ))),
                Err(error) => Some(error),
            }
        })
    }

    /// Resolve a saga stopped by an external abort. With compensation
    /// disabled, completed steps stay in place and the record ends `Failed`.
    async fn finish_cancelled(&self, run: &SagaRun) -> Result<TransactionOutcome> {
        let record = self.store.get(&run.id);
        let reason = record
            .as_ref()
            .and_then(|record| record.abort_reason.clone())
            .unwrap_or_else(|| "cancelled".to_string());
        let left_in_place = record
            .filter(|record| !record.compensate)
            .map_or(0, |record| record.steps_completed);

        let termination = if left_in_place > 0 {
            Termination::Failed {
                error: format!(
                    "{reason}: {left_in_place} completed step(s) left in place without compensation"
                ),
            }
        } else {
            Termination::Aborted { reason }
        };
        self.finish(&run.id, termination).await;
        self.outcome(&run.id)
    }

    async fn saga_failed(
        &self,
        run: &SagaRun,
        compensate: bool,
        failure: StepFailure<CallError>,
    ) -> CoordinatorError {
        let compensation_failures = failure
            .compensation_errors
            .into_iter()
            .map(|e| CompensationFailure {
                step: e.step,
                description: e.description,
                error: e.error,
            })
            .collect();
        let error = CoordinatorError::OperationFailure {
            step: failure.step,
            steps_completed: failure.steps_completed,
            source: failure.error,
            compensation_failures,
        };

        let message = error_chain(&error);
        let termination = if !compensate && failure.steps_completed > 0 {
            Termination::Failed { error: message }
        } else {
            Termination::Aborted { reason: message }
        };
        self.finish(&run.id, termination).await;
        error
    }
}
