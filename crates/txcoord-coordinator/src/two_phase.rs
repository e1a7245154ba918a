use futures::future::join_all;
use tracing::{debug, warn};
use txcoord_core::{
    CallError, CommitFailure, Participant, ParticipantId, Phase, PrepareResponse, TransactionId,
    TransactionState, TransactionView, Vote,
};

use crate::engine::{Engine, Termination};
use crate::error::{CoordinatorError, Result, error_chain};
use crate::events::TransactionEvent;
use crate::log::{Decision, LogRecord};
use crate::retry::CallSpec;
use crate::transaction::TransactionOutcome;

type VoteResult = std::result::Result<PrepareResponse, CallError>;

fn abort_reason(participant: &ParticipantId, vote: &VoteResult) -> String {
    let reason = match vote {
        Ok(response) => response
            .data
            .get("reason")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("abort vote")
            .to_string(),
        Err(error) => error_chain(error),
    };
    CoordinatorError::PrepareVoteAbort {
        participant: participant.clone(),
        reason,
    }
    .to_string()
}

impl Engine {
    pub(crate) async fn run_two_phase(&self, id: TransactionId) -> Result<TransactionOutcome> {
        let record = self
            .store
            .get(&id)
            .ok_or(CoordinatorError::TransactionNotFound(id))?;

        if self.transition(&id, TransactionState::Preparing).is_err() {
            return self.outcome(&id);
        }

        let mut participants = Vec::with_capacity(record.participants.len());
        let mut missing = None;
        for participant_id in &record.participants {
            match self.registry.get(participant_id) {
                Ok(participant) => participants.push(participant),
                Err(error) => {
                    missing = Some(error);
                    break;
                }
            }
        }
        if let Some(error) = missing {
            self.abort_two_phase(&id, &participants, error.to_string())
                .await;
            return Err(error);
        }

        let view = record.view();
        let votes = self.collect_votes(&id, &participants, &view).await;

        let rejection = participants
            .iter()
            .zip(&votes)
            .find(|(_, vote)| !matches!(vote, Ok(response) if response.vote == Vote::Commit));
        if let Some((participant, vote)) = rejection {
            let reason = abort_reason(&participant.id, vote);
            debug!(transaction = %id, participant = %participant.id, %reason, "prepare rejected");
            self.abort_two_phase(&id, &participants, reason).await;
            return self.outcome(&id);
        }

        if self.transition(&id, TransactionState::Prepared).is_err()
            || self.transition(&id, TransactionState::Committing).is_err()
        {
            return self.outcome(&id);
        }

        let decision = LogRecord::Decision {
            transaction: id,
            decision: Decision::Commit,
        };
        if let Err(error) = self.log.append(decision).await {
            self.broadcast_abort(&id, &participants, &view).await;
            return Err(self.fail(&id, error.into()).await);
        }

        self.commit_all(&id, &participants, &view).await;
        self.finish(&id, Termination::Committed).await;
        self.outcome(&id)
    }

    async fn collect_votes(
        &self,
        id: &TransactionId,
        participants: &[Participant],
        view: &TransactionView,
    ) -> Vec<VoteResult> {
        let limits = self.store.requested_limits(id);
        let calls = participants.iter().map(|participant| async move {
            let spec = CallSpec::for_participant(participant, Phase::Prepare, limits);
            let attempted = self
                .retry
                .call(&spec, || self.client.prepare(participant, view))
                .await;
            self.record_retries(id, attempted.retries);
            attempted.result
        });
        join_all(calls).await
    }

    async fn commit_all(
        &self,
        id: &TransactionId,
        participants: &[Participant],
        view: &TransactionView,
    ) {
        let limits = self.store.requested_limits(id);
        let calls = participants.iter().map(|participant| async move {
            let spec = CallSpec::for_participant(participant, Phase::Commit, limits);
            let attempted = self
                .retry
                .call(&spec, || self.client.commit(participant, view))
                .await;
            self.record_retries(id, attempted.retries);
            (participant, attempted.result)
        });

        for (participant, result) in join_all(calls).await {
            let Err(source) = result else {
                continue;
            };
            let failure = CoordinatorError::CommitFailure {
                participant: participant.id.clone(),
                source,
            };
            let error = error_chain(&failure);
            warn!(transaction = %id, participant = %participant.id, %error, "commit failed after decision");
            self.metrics.record_commit_failure();
            let recorded = self.store.update(id, |record| {
                record.commit_failures.push(CommitFailure {
                    participant: participant.id.clone(),
                    error: error.clone(),
                });
            });
            if let Err(error) = recorded {
                debug!(transaction = %id, error = %error, "commit failure not recorded");
            }
            self.events.publish(TransactionEvent::CommitFailure {
                transaction: *id,
                participant: participant.id.clone(),
                error,
            });
        }
    }

    /// Best-effort abort on every participant; failures are only logged.
    async fn broadcast_abort(
        &self,
        id: &TransactionId,
        participants: &[Participant],
        view: &TransactionView,
    ) {
        let limits = self.store.requested_limits(id);
        let calls = participants.iter().map(|participant| async move {
            let spec = CallSpec::for_participant(participant, Phase::Abort, limits);
            let attempted = self
                .retry
                .call(&spec, || self.client.abort(participant, view))
                .await;
            self.record_retries(id, attempted.retries);
            (participant, attempted.result)
        });

        for (participant, result) in join_all(calls).await {
            if let Err(error) = result {
                warn!(
                    transaction = %id,
                    participant = %participant.id,
                    error = %error_chain(&error),
                    "abort not acknowledged"
                );
            }
        }
    }

    /// Run the abort path for a two-phase transaction.
    ///
    /// Returns `false` without contacting anyone if the transaction could not
    /// be moved to `Aborting`.
    pub(crate) async fn abort_two_phase(
        &self,
        id: &TransactionId,
        participants: &[Participant],
        reason: String,
    ) -> bool {
        if self.transition(id, TransactionState::Aborting).is_err() {
            return false;
        }

        self.append_best_effort(LogRecord::Decision {
            transaction: *id,
            decision: Decision::Abort,
        })
        .await;

        let Some(view) = self.store.view(id) else {
            return false;
        };
        self.broadcast_abort(id, participants, &view).await;
        self.finish(id, Termination::Aborted { reason }).await
    }
}
