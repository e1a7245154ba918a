use async_trait::async_trait;

use crate::error::ParticipantError;
use crate::types::{Operation, OperationOutcome, Participant, PrepareResponse, TransactionView};

/// How the coordinator reaches participants.
///
/// Implementations own the transport. The coordinator bounds every call with
/// the participant's timeout and retries failures per its retry policy, so
/// implementations should make a single attempt per invocation.
#[async_trait]
pub trait ParticipantClient: Send + Sync {
    /// Ask a participant to vote on a two-phase transaction.
    ///
    /// # Errors
    ///
    /// Any error is counted as an abort vote.
    async fn prepare(
        &self,
        participant: &Participant,
        transaction: &TransactionView,
    ) -> Result<PrepareResponse, ParticipantError>;

    /// # Errors
    ///
    /// Returns an error if the participant could not apply the commit.
    async fn commit(
        &self,
        participant: &Participant,
        transaction: &TransactionView,
    ) -> Result<(), ParticipantError>;

    /// # Errors
    ///
    /// Returns an error if the participant could not release its prepared state.
    async fn abort(
        &self,
        participant: &Participant,
        transaction: &TransactionView,
    ) -> Result<(), ParticipantError>;

    /// Run a saga operation, forward or compensating.
    ///
    /// For compensations `transaction.captured_context` holds what the forward
    /// step returned as its compensation context.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation could not be executed.
    async fn execute_operation(
        &self,
        operation: &Operation,
        transaction: &TransactionView,
    ) -> Result<OperationOutcome, ParticipantError>;

    /// Probe a participant. `Ok(None)` means the participant has no probe.
    ///
    /// # Errors
    ///
    /// Returns an error if the probe itself failed.
    async fn health_check(
        &self,
        participant: &Participant,
    ) -> Result<Option<bool>, ParticipantError> {
        let _ = participant;
        Ok(None)
    }
}
