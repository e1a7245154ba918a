use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, broadcast};
use tracing::{debug, info};
use txcoord_core::{
    Participant, ParticipantClient, ParticipantConfig, ParticipantId, TransactionId,
    TransactionKind, TransactionState,
};

use crate::config::CoordinatorConfig;
use crate::engine::Engine;
use crate::error::{CoordinatorError, Result};
use crate::events::{EventBus, TransactionEvent};
use crate::health::HealthReport;
use crate::log::{LogRecord, NoopTransactionLog, TransactionLog};
use crate::metrics::Metrics;
use crate::registry::ParticipantRegistry;
use crate::retry::CallLimits;
use crate::store::{TransactionRecord, TransactionStore};
use crate::transaction::{
    AbortOutcome, ShutdownReport, Statistics, TransactionOutcome, TransactionRequest,
};

/// Coordinates two-phase commit and saga transactions across registered
/// participants.
///
/// All methods take `&self`; share one instance behind an `Arc` to drive
/// transactions from several tasks.
pub struct Coordinator {
    engine: Arc<Engine>,
    config: CoordinatorConfig,
    accepting: AtomicBool,
    stopped: AtomicBool,
}

impl Coordinator {
    /// Build a coordinator that keeps no transaction log.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or one of its participants
    /// cannot be registered.
    pub fn new(config: CoordinatorConfig, client: Arc<dyn ParticipantClient>) -> Result<Self> {
        Self::with_transaction_log(config, client, Arc::new(NoopTransactionLog))
    }

    /// # Errors
    ///
    /// Same as [`Coordinator::new`].
    pub fn with_transaction_log(
        config: CoordinatorConfig,
        client: Arc<dyn ParticipantClient>,
        log: Arc<dyn TransactionLog>,
    ) -> Result<Self> {
        config.validate()?;

        let engine = Engine {
            registry: ParticipantRegistry::new(
                config.default_timeout(),
                config.default_max_retries(),
            ),
            store: TransactionStore::new(),
            metrics: Metrics::new(),
            events: EventBus::new(config.event_capacity()),
            client,
            log,
            retry: config.retry_policy(),
            finished: Notify::new(),
        };
        for entry in config.participants() {
            engine
                .registry
                .register(entry.id.clone(), entry.config.clone())?;
        }
        info!(
            participants = engine.registry.len(),
            "coordinator started"
        );

        Ok(Self {
            engine: Arc::new(engine),
            config,
            accepting: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Register or replace a participant.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the id is empty.
    pub fn register_participant(
        &self,
        id: impl Into<ParticipantId>,
        config: ParticipantConfig,
    ) -> Result<Participant> {
        self.engine.registry.register(id.into(), config)
    }

    /// # Errors
    ///
    /// Returns `ParticipantNotFound` for an unknown id.
    pub fn participant(&self, id: &ParticipantId) -> Result<Participant> {
        self.engine.registry.get(id)
    }

    #[must_use]
    pub fn participants(&self) -> Vec<Participant> {
        self.engine.registry.all()
    }

    /// Run a transaction to completion.
    ///
    /// Resolves with `Committed` or `Aborted`. A commit-phase failure still
    /// resolves `Committed`, with the failing participants listed in
    /// `commit_failures`.
    ///
    /// # Errors
    ///
    /// - `ShuttingDown` once [`shutdown`](Self::shutdown) was called
    /// - `InvalidRequest` for an empty or duplicated participant list, an
    ///   empty saga, repeated saga step names, or a compensation routed to a
    ///   participant that does not support compensation
    /// - `ParticipantNotFound` when the request names an unregistered
    ///   participant; the transaction is aborted
    /// - `OperationFailure` when a saga step fails, after compensation
    /// - `Log` when the transaction log rejects the begin or commit decision
    ///   record; the transaction is marked failed
    pub async fn start_transaction(&self, request: TransactionRequest) -> Result<TransactionOutcome> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(CoordinatorError::ShuttingDown);
        }
        request.validate()?;

        let requested = CallLimits {
            timeout: request.timeout,
            max_retries: request.max_retries,
        };
        let mut record = TransactionRecord::new(
            request.kind,
            request.context,
            request.timeout.unwrap_or(self.config.default_timeout()),
            request
                .max_retries
                .unwrap_or(self.config.default_max_retries()),
        );
        record.participants = request.participants;
        record.operations = request.operations;
        record.compensate = request.compensate;
        record.requested = requested;
        let id = record.id;
        let kind = record.kind;

        self.engine.store.insert(record);
        self.engine.metrics.record_started();
        self.engine
            .events
            .publish(TransactionEvent::Started {
                transaction: id,
                kind,
            });
        info!(transaction = %id, %kind, "transaction started");

        let begin = LogRecord::Begin {
            transaction: id,
            kind,
        };
        if let Err(error) = self.engine.log.append(begin).await {
            return Err(self.engine.fail(&id, error.into()).await);
        }

        match kind {
            TransactionKind::TwoPhaseCommit => self.engine.run_two_phase(id).await,
            TransactionKind::Saga => self.engine.run_saga(id).await,
        }
    }

    /// Abort a transaction that has not reached its commit decision.
    ///
    /// Two-phase transactions are aborted before this returns. A running saga
    /// is only flagged; it stops before its next step and compensates.
    ///
    /// # Errors
    ///
    /// Returns `ShuttingDown` after shutdown completed.
    pub async fn abort_transaction(
        &self,
        id: &TransactionId,
        reason: impl Into<String>,
    ) -> Result<AbortOutcome> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(CoordinatorError::ShuttingDown);
        }
        let Some(record) = self.engine.store.get(id) else {
            return Ok(AbortOutcome::NotFound);
        };
        if let Some(outcome) = settled(record.state) {
            return Ok(outcome);
        }

        let reason = reason.into();
        debug!(transaction = %id, state = %record.state, %reason, "abort requested");
        let aborted = match record.kind {
            TransactionKind::Saga => {
                let flagged = self
                    .engine
                    .transition_with(id, TransactionState::Aborting, |r| {
                        r.abort_reason = Some(reason.clone());
                    })
                    .is_ok();
                flagged.then_some(AbortOutcome::Requested)
            }
            TransactionKind::TwoPhaseCommit => {
                let participants: Vec<_> = record
                    .participants
                    .iter()
                    .filter_map(|pid| self.engine.registry.get(pid).ok())
                    .collect();
                self.engine
                    .abort_two_phase(id, &participants, reason)
                    .await
                    .then_some(AbortOutcome::Aborted)
            }
        };

        Ok(aborted.unwrap_or_else(|| {
            self.engine
                .store
                .state(id)
                .and_then(settled)
                .unwrap_or(AbortOutcome::InProgress)
        }))
    }

    /// Snapshot of a transaction record.
    #[must_use]
    pub fn transaction(&self, id: &TransactionId) -> Option<TransactionRecord> {
        self.engine.store.get(id)
    }

    #[must_use]
    pub fn statistics(&self) -> Statistics {
        Statistics {
            active_transactions: self.engine.store.active_count(),
            total_transactions: self.engine.store.len(),
            registered_participants: self.engine.registry.len(),
            metrics: self.engine.metrics.snapshot(),
        }
    }

    pub async fn health_check(&self) -> HealthReport {
        let participants = self.engine.probe_participants().await;
        HealthReport::new(
            !self.accepting.load(Ordering::SeqCst),
            self.statistics(),
            participants,
        )
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TransactionEvent> {
        self.engine.events.subscribe()
    }

    /// Drop terminal records older than `older_than`. Meant for an external
    /// reaper; the coordinator never evicts on its own.
    pub fn evict_terminal(&self, older_than: Duration) -> usize {
        self.engine.store.evict_terminal(older_than)
    }

    /// Stop accepting transactions and wait for in-flight ones to finish.
    ///
    /// Waits at most the configured shutdown timeout, then closes the event
    /// channel. Calling it again only re-reports what is still running.
    pub async fn shutdown(&self) -> ShutdownReport {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!(
                active = self.engine.store.active_count(),
                "coordinator shutting down"
            );
        }

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout();
        loop {
            let notified = self.engine.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.engine.store.active_count() == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        let remaining = self.engine.store.active_count();
        self.engine.events.close();
        self.stopped.store(true, Ordering::SeqCst);
        if remaining > 0 {
            info!(remaining, "shutdown timed out with transactions in flight");
        }
        ShutdownReport {
            drained: remaining == 0,
            remaining,
        }
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        !self.accepting.load(Ordering::SeqCst)
    }
}

/// The abort outcome for states that need no work.
fn settled(state: TransactionState) -> Option<AbortOutcome> {
    match state {
        s if s.is_terminal() => Some(AbortOutcome::AlreadyFinished(s)),
        TransactionState::Aborting | TransactionState::Compensating => {
            Some(AbortOutcome::InProgress)
        }
        TransactionState::Committing => Some(AbortOutcome::Rejected(state)),
        _ => None,
    }
}
