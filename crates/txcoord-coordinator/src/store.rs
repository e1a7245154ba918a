use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use txcoord_core::{
    CommitFailure, CompensationEntry, ParticipantId, SagaOperation, TransactionId,
    TransactionKind, TransactionState, TransactionView,
};

use crate::error::{CoordinatorError, Result};
use crate::retry::CallLimits;

/// The coordinator's authoritative record of one transaction.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub kind: TransactionKind,
    /// Two-phase participants in request order.
    pub participants: Vec<ParticipantId>,
    /// Saga operations in execution order.
    pub operations: Vec<SagaOperation>,
    pub state: TransactionState,
    pub context: Value,
    pub compensation_stack: Vec<CompensationEntry>,
    /// Forward step results keyed by operation name.
    pub step_results: Map<String, Value>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout: Duration,
    /// Limits the request set itself, applied on top of participant limits.
    pub requested: CallLimits,
    pub compensate: bool,
    pub started_at: Instant,
    pub finished_at: Option<Instant>,
    pub steps_completed: usize,
    pub commit_failures: Vec<CommitFailure>,
    pub abort_reason: Option<String>,
    pub error: Option<String>,
}

impl TransactionRecord {
    #[must_use]
    pub fn new(kind: TransactionKind, context: Value, timeout: Duration, max_retries: u32) -> Self {
        Self {
            id: TransactionId::new(),
            kind,
            participants: Vec::new(),
            operations: Vec::new(),
            state: TransactionState::Pending,
            context,
            compensation_stack: Vec::new(),
            step_results: Map::new(),
            retry_count: 0,
            max_retries,
            timeout,
            requested: CallLimits::default(),
            compensate: true,
            started_at: Instant::now(),
            finished_at: None,
            steps_completed: 0,
            commit_failures: Vec::new(),
            abort_reason: None,
            error: None,
        }
    }

    /// Time from creation until the terminal state, or until now while the
    /// transaction is still running.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.finished_at
            .unwrap_or_else(Instant::now)
            .duration_since(self.started_at)
    }

    /// The view participants receive. Later saga steps see the results of
    /// earlier ones under `context.step_results`.
    #[must_use]
    pub fn view(&self) -> TransactionView {
        let context = if self.step_results.is_empty() {
            self.context.clone()
        } else {
            let mut context = match &self.context {
                Value::Object(map) => map.clone(),
                Value::Null => Map::new(),
                other => {
                    let mut map = Map::new();
                    map.insert("input".to_string(), other.clone());
                    map
                }
            };
            context.insert(
                "step_results".to_string(),
                Value::Object(self.step_results.clone()),
            );
            Value::Object(context)
        };
        TransactionView {
            id: self.id,
            kind: self.kind,
            context,
            captured_context: None,
        }
    }
}

type Shared = Arc<RwLock<TransactionRecord>>;

/// In-memory transaction records keyed by id.
///
/// Each record sits behind its own lock so unrelated transactions never
/// contend. Guards are always dropped before returning.
#[derive(Default)]
pub struct TransactionStore {
    records: DashMap<TransactionId, Shared>,
}

impl TransactionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: TransactionRecord) {
        self.records.insert(record.id, Arc::new(RwLock::new(record)));
    }

    fn shared(&self, id: &TransactionId) -> Result<Shared> {
        self.records
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(CoordinatorError::TransactionNotFound(*id))
    }

    #[must_use]
    pub fn get(&self, id: &TransactionId) -> Option<TransactionRecord> {
        let shared = self.shared(id).ok()?;
        let record = shared.read().clone();
        Some(record)
    }

    #[must_use]
    pub fn state(&self, id: &TransactionId) -> Option<TransactionState> {
        let shared = self.shared(id).ok()?;
        let state = shared.read().state;
        Some(state)
    }

    #[must_use]
    pub fn view(&self, id: &TransactionId) -> Option<TransactionView> {
        let shared = self.shared(id).ok()?;
        let view = shared.read().view();
        Some(view)
    }

    #[must_use]
    pub fn requested_limits(&self, id: &TransactionId) -> CallLimits {
        self.shared(id)
            .map(|shared| shared.read().requested)
            .unwrap_or_default()
    }

    /// Move a transaction to `to`, returning the state it left.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotFound` for an unknown id and `InvalidTransition`
    /// when the edge is not allowed from the current state.
    pub fn transition(&self, id: &TransactionId, to: TransactionState) -> Result<TransactionState> {
        self.transition_with(id, to, |_| {})
    }

    /// Like [`transition`](Self::transition), applying `apply` to the record
    /// under the same lock once the edge is accepted.
    ///
    /// # Errors
    ///
    /// Same as [`transition`](Self::transition).
    pub fn transition_with(
        &self,
        id: &TransactionId,
        to: TransactionState,
        apply: impl FnOnce(&mut TransactionRecord),
    ) -> Result<TransactionState> {
        let shared = self.shared(id)?;
        let mut record = shared.write();
        let from = record.state;
        if !from.can_transition_to(to) {
            return Err(CoordinatorError::InvalidTransition { from, to });
        }
        record.state = to;
        if to.is_terminal() {
            record.finished_at = Some(Instant::now());
        }
        apply(&mut record);
        Ok(from)
    }

    /// Mutate a running transaction.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotFound` for an unknown id and
    /// `TransactionFinished` once the record is terminal.
    pub fn update<T>(
        &self,
        id: &TransactionId,
        apply: impl FnOnce(&mut TransactionRecord) -> T,
    ) -> Result<T> {
        let shared = self.shared(id)?;
        let mut record = shared.write();
        if record.state.is_terminal() {
            return Err(CoordinatorError::TransactionFinished {
                id: *id,
                state: record.state,
            });
        }
        Ok(apply(&mut record))
    }

    /// # Errors
    ///
    /// Same as [`update`](Self::update).
    pub fn push_compensation(&self, id: &TransactionId, entry: CompensationEntry) -> Result<()> {
        self.update(id, |record| record.compensation_stack.push(entry))
    }

    /// Remove and return the most recently pushed compensation.
    #[must_use]
    pub fn pop_compensation(&self, id: &TransactionId) -> Option<CompensationEntry> {
        self.update(id, |record| record.compensation_stack.pop())
            .ok()
            .flatten()
    }

    /// Retry bookkeeping is recorded even after the transaction finished.
    pub fn add_retries(&self, id: &TransactionId, retries: u32) {
        if retries == 0 {
            return;
        }
        if let Ok(shared) = self.shared(id) {
            let mut record = shared.write();
            record.retry_count = record.retry_count.saturating_add(retries);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of transactions not yet in a terminal state.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.records
            .iter()
            .filter(|entry| !entry.value().read().state.is_terminal())
            .count()
    }

    /// Drop terminal records that finished more than `older_than` ago and
    /// return how many were removed.
    pub fn evict_terminal(&self, older_than: Duration) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, shared| {
            let record = shared.read();
            match record.finished_at {
                Some(finished) if record.state.is_terminal() => {
                    now.duration_since(finished) < older_than
                }
                _ => true,
            }
        });
        before.saturating_sub(self.records.len())
    }
}
