use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};
use txcoord_core::{
    ParticipantClient, TransactionId, TransactionKind, TransactionState, TransactionStatus,
};

use crate::error::{CoordinatorError, Result, error_chain};
use crate::events::{EventBus, TransactionEvent};
use crate::log::{LogRecord, TransactionLog};
use crate::metrics::Metrics;
use crate::registry::ParticipantRegistry;
use crate::retry::RetryPolicy;
use crate::store::{TransactionRecord, TransactionStore};
use crate::transaction::TransactionOutcome;

/// How a transaction ends.
#[derive(Debug, Clone)]
pub(crate) enum Termination {
    Committed,
    Aborted { reason: String },
    Failed { error: String },
}

impl Termination {
    fn state(&self) -> TransactionState {
        match self {
            Self::Committed => TransactionState::Committed,
            Self::Aborted { .. } => TransactionState::Aborted,
            Self::Failed { .. } => TransactionState::Failed,
        }
    }
}

/// Shared machinery both protocols run on.
pub(crate) struct Engine {
    pub(crate) registry: ParticipantRegistry,
    pub(crate) store: TransactionStore,
    pub(crate) metrics: Metrics,
    pub(crate) events: EventBus,
    pub(crate) client: Arc<dyn ParticipantClient>,
    pub(crate) log: Arc<dyn TransactionLog>,
    pub(crate) retry: RetryPolicy,
    pub(crate) finished: Notify,
}

impl Engine {
    /// Checked state change with a `StateChanged` event.
    pub(crate) fn transition(
        &self,
        id: &TransactionId,
        to: TransactionState,
    ) -> Result<TransactionState> {
        self.transition_with(id, to, |_| {})
    }

    pub(crate) fn transition_with(
        &self,
        id: &TransactionId,
        to: TransactionState,
        apply: impl FnOnce(&mut TransactionRecord),
    ) -> Result<TransactionState> {
        let from = self.store.transition_with(id, to, apply)?;
        debug!(transaction = %id, %from, %to, "state changed");
        self.events.publish(TransactionEvent::StateChanged {
            transaction: *id,
            from,
            to,
        });
        Ok(from)
    }

    /// Move a transaction to its terminal state and account for it.
    ///
    /// Returns `false` if the transaction had already been moved somewhere
    /// the terminal state cannot be reached from, which happens when another
    /// path won a race for it.
    pub(crate) async fn finish(&self, id: &TransactionId, termination: Termination) -> bool {
        let to = termination.state();
        let mut duration = Duration::ZERO;
        let applied = self.transition_with(id, to, |record| {
            match &termination {
                Termination::Committed => {}
                Termination::Aborted { reason } => record.abort_reason = Some(reason.clone()),
                Termination::Failed { error } => record.error = Some(error.clone()),
            }
            duration = record.duration();
        });

        if let Err(error) = applied {
            debug!(transaction = %id, %to, error = %error, "transaction resolved elsewhere");
            return false;
        }

        self.metrics.record_duration(duration);
        let event = match termination {
            Termination::Committed => {
                self.metrics.record_committed();
                info!(transaction = %id, duration_ms = duration.as_millis(), "transaction committed");
                TransactionEvent::Committed { transaction: *id }
            }
            Termination::Aborted { reason } => {
                self.metrics.record_aborted();
                info!(transaction = %id, %reason, "transaction aborted");
                TransactionEvent::Aborted {
                    transaction: *id,
                    reason,
                }
            }
            Termination::Failed { error } => {
                self.metrics.record_failed();
                warn!(transaction = %id, %error, "transaction failed");
                TransactionEvent::Failed {
                    transaction: *id,
                    error,
                }
            }
        };
        self.events.publish(event);

        self.append_best_effort(LogRecord::End {
            transaction: *id,
            state: to,
        })
        .await;
        self.finished.notify_waiters();
        true
    }

    /// Append a record whose loss does not change the outcome.
    pub(crate) async fn append_best_effort(&self, record: LogRecord) {
        let transaction = record.transaction();
        if let Err(error) = self.log.append(record).await {
            warn!(%transaction, error = %error, "transaction log append failed");
        }
    }

    pub(crate) fn record_retries(&self, id: &TransactionId, retries: u32) {
        if retries > 0 {
            self.store.add_retries(id, retries);
            self.metrics.record_retries(retries);
        }
    }

    /// The caller-facing outcome for a transaction as it stands now.
    ///
    /// Anything short of `Committed` is reported as `Aborted`.
    pub(crate) fn outcome(&self, id: &TransactionId) -> Result<TransactionOutcome> {
        let record = self
            .store
            .get(id)
            .ok_or(CoordinatorError::TransactionNotFound(*id))?;
        let status = if record.state == TransactionState::Committed {
            TransactionStatus::Committed
        } else {
            TransactionStatus::Aborted
        };
        Ok(TransactionOutcome {
            transaction_id: record.id,
            status,
            steps_completed: (record.kind == TransactionKind::Saga)
                .then_some(record.steps_completed),
            commit_failures: record.commit_failures.clone(),
            duration: record.duration(),
        })
    }

    /// Fail a transaction that has not reached any participant decision and
    /// hand the error back.
    pub(crate) async fn fail(
        &self,
        id: &TransactionId,
        error: CoordinatorError,
    ) -> CoordinatorError {
        self.finish(
            id,
            Termination::Failed {
                error: error_chain(&error),
            },
        )
        .await;
        error
    }
}
