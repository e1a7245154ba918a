//! Scripted participant client.
//!
//! [`PlaybookClient`] answers every call from a fixed script instead of a
//! network, which makes coordinator runs reproducible. Participant scripts
//! drive the two-phase calls and health probes; operation scripts, keyed by
//! operation name, drive saga steps and their compensations. Both deserialize
//! from TOML so a playbook file can describe them.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use txcoord_core::{
    Operation, OperationOutcome, Participant, ParticipantClient, ParticipantError, Phase,
    PrepareResponse, TransactionId, TransactionView,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedVote {
    #[default]
    Commit,
    Abort,
    /// Prepare returns a non-retryable error.
    Fail,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParticipantScript {
    pub vote: ScriptedVote,
    pub fail_commit: bool,
    pub fail_abort: bool,
    /// Latency added to every call.
    pub delay_ms: u64,
    /// Health probe answer; unset means the participant has no probe.
    pub healthy: Option<bool>,
    pub fail_health_check: bool,
    /// Number of initial calls that fail with a retryable error.
    pub fail_first: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OperationScript {
    /// Return a non-retryable error.
    pub fail: bool,
    /// Return an outcome with `success = false`.
    pub unsuccessful: bool,
    pub delay_ms: u64,
    pub data: Value,
    pub compensation_context: Value,
    pub fail_first: u32,
}

/// One call the client received.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub phase: Phase,
    /// Participant id, or operation name for saga calls.
    pub target: String,
    pub transaction: TransactionId,
    pub captured_context: Option<Value>,
}

#[derive(Debug, Default)]
pub struct PlaybookClient {
    participants: IndexMap<String, ParticipantScript>,
    operations: IndexMap<String, OperationScript>,
    calls: Mutex<Vec<CallRecord>>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl PlaybookClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_participant(mut self, id: impl Into<String>, script: ParticipantScript) -> Self {
        self.participants.insert(id.into(), script);
        self
    }

    #[must_use]
    pub fn with_operation(mut self, name: impl Into<String>, script: OperationScript) -> Self {
        self.operations.insert(name.into(), script);
        self
    }

    #[must_use]
    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn calls_for(&self, phase: Phase) -> Vec<CallRecord> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.phase == phase)
            .cloned()
            .collect()
    }

    /// Targets called in `phase`, in call order.
    #[must_use]
    pub fn targets(&self, phase: Phase) -> Vec<String> {
        self.calls_for(phase)
            .into_iter()
            .map(|call| call.target)
            .collect()
    }

    #[must_use]
    pub fn count(&self, phase: Phase) -> usize {
        self.calls_for(phase).len()
    }

    fn participant_script(&self, participant: &Participant) -> ParticipantScript {
        self.participants
            .get(participant.id.as_str())
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, phase: Phase, target: &str, transaction: &TransactionView) {
        self.calls.lock().push(CallRecord {
            phase,
            target: target.to_string(),
            transaction: transaction.id,
            captured_context: transaction.captured_context.clone(),
        });
    }

    /// Whether this attempt against `key` is one of the first `fail_first`.
    fn transient_failure(&self, key: &str, fail_first: u32) -> bool {
        if fail_first == 0 {
            return false;
        }
        let mut attempts = self.attempts.lock();
        let seen = attempts.entry(key.to_string()).or_insert(0);
        *seen += 1;
        *seen <= fail_first
    }

    async fn delay(delay_ms: u64) {
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    async fn participant_call(
        &self,
        phase: Phase,
        participant: &Participant,
        transaction: &TransactionView,
    ) -> Result<ParticipantScript, ParticipantError> {
        self.record(phase, participant.id.as_str(), transaction);
        let script = self.participant_script(participant);
        Self::delay(script.delay_ms).await;
        if self.transient_failure(participant.id.as_str(), script.fail_first) {
            return Err(ParticipantError::new(format!(
                "{} temporarily unavailable",
                participant.id
            )));
        }
        Ok(script)
    }
}

#[async_trait]
impl ParticipantClient for PlaybookClient {
    async fn prepare(
        &self,
        participant: &Participant,
        transaction: &TransactionView,
    ) -> Result<PrepareResponse, ParticipantError> {
        let script = self
            .participant_call(Phase::Prepare, participant, transaction)
            .await?;
        match script.vote {
            ScriptedVote::Commit => Ok(PrepareResponse::commit()),
            ScriptedVote::Abort => Ok(PrepareResponse::abort()),
            ScriptedVote::Fail => Err(ParticipantError::permanent(format!(
                "{} refused to prepare",
                participant.id
            ))),
        }
    }

    async fn commit(
        &self,
        participant: &Participant,
        transaction: &TransactionView,
    ) -> Result<(), ParticipantError> {
        let script = self
            .participant_call(Phase::Commit, participant, transaction)
            .await?;
        if script.fail_commit {
            return Err(ParticipantError::permanent(format!(
                "{} failed to commit",
                participant.id
            )));
        }
        Ok(())
    }

    async fn abort(
        &self,
        participant: &Participant,
        transaction: &TransactionView,
    ) -> Result<(), ParticipantError> {
        let script = self
            .participant_call(Phase::Abort, participant, transaction)
            .await?;
        if script.fail_abort {
            return Err(ParticipantError::permanent(format!(
                "{} failed to abort",
                participant.id
            )));
        }
        Ok(())
    }

    async fn execute_operation(
        &self,
        operation: &Operation,
        transaction: &TransactionView,
    ) -> Result<OperationOutcome, ParticipantError> {
        let phase = if transaction.captured_context.is_some() {
            Phase::Compensate
        } else {
            Phase::Execute
        };
        self.record(phase, &operation.name, transaction);
        let script = self
            .operations
            .get(&operation.name)
            .cloned()
            .unwrap_or_default();
        Self::delay(script.delay_ms).await;

        if self.transient_failure(&operation.name, script.fail_first) {
            return Err(ParticipantError::new(format!(
                "{} temporarily unavailable",
                operation.name
            )));
        }
        if script.fail {
            return Err(ParticipantError::permanent(format!(
                "{} failed",
                operation.name
            )));
        }
        if script.unsuccessful {
            return Ok(OperationOutcome {
                success: false,
                data: script.data,
                compensation_context: Value::Null,
            });
        }
        Ok(OperationOutcome::succeeded(script.data)
            .with_compensation_context(script.compensation_context))
    }

    async fn health_check(
        &self,
        participant: &Participant,
    ) -> Result<Option<bool>, ParticipantError> {
        let script = self.participant_script(participant);
        Self::delay(script.delay_ms).await;
        if script.fail_health_check {
            return Err(ParticipantError::new(format!(
                "{} health endpoint unreachable",
                participant.id
            )));
        }
        Ok(script.healthy)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use txcoord_core::{ParticipantId, TransactionKind, Vote};

    use super::*;

    fn participant(id: &str) -> Participant {
        Participant {
            id: ParticipantId::from(id),
            endpoint: "mem://".to_string(),
            timeout: Duration::from_secs(1),
            max_retries: 0,
            supports_compensation: false,
        }
    }

    fn view() -> TransactionView {
        TransactionView {
            id: TransactionId::new(),
            kind: TransactionKind::TwoPhaseCommit,
            context: Value::Null,
            captured_context: None,
        }
    }

    #[tokio::test]
    async fn unscripted_participant_commits() -> anyhow::Result<()> {
        let client = PlaybookClient::new();

        let response = client.prepare(&participant("any"), &view()).await?;

        assert_eq!(response.vote, Vote::Commit);
        assert_eq!(client.targets(Phase::Prepare), vec!["any"]);
        Ok(())
    }

    #[tokio::test]
    async fn scripted_votes_and_failures() {
        let client = PlaybookClient::new()
            .with_participant(
                "no",
                ParticipantScript {
                    vote: ScriptedVote::Abort,
                    ..ParticipantScript::default()
                },
            )
            .with_participant(
                "broken",
                ParticipantScript {
                    vote: ScriptedVote::Fail,
                    fail_commit: true,
                    ..ParticipantScript::default()
                },
            );

        let vote = client.prepare(&participant("no"), &view()).await;
        let failed = client.prepare(&participant("broken"), &view()).await;
        let commit = client.commit(&participant("broken"), &view()).await;

        assert_eq!(vote.map(|r| r.vote), Ok(Vote::Abort));
        assert!(failed.is_err_and(|e| !e.retryable));
        assert!(commit.is_err());
    }

    #[tokio::test]
    async fn fail_first_fails_only_initial_attempts() {
        let client = PlaybookClient::new().with_participant(
            "flaky",
            ParticipantScript {
                fail_first: 2,
                ..ParticipantScript::default()
            },
        );
        let flaky = participant("flaky");

        let first = client.prepare(&flaky, &view()).await;
        let second = client.prepare(&flaky, &view()).await;
        let third = client.prepare(&flaky, &view()).await;

        assert!(first.is_err_and(|e| e.retryable));
        assert!(second.is_err());
        assert!(third.is_ok());
        assert_eq!(client.count(Phase::Prepare), 3);
    }

    #[tokio::test]
    async fn operations_return_scripted_data() -> anyhow::Result<()> {
        let client = PlaybookClient::new().with_operation(
            "reserve",
            OperationScript {
                data: json!({"reservation": "r-1"}),
                compensation_context: json!({"release": "r-1"}),
                ..OperationScript::default()
            },
        );

        let outcome = client
            .execute_operation(&Operation::new("reserve"), &view())
            .await?;

        assert!(outcome.success);
        assert_eq!(outcome.data["reservation"], "r-1");
        assert_eq!(outcome.compensation_context["release"], "r-1");
        Ok(())
    }

    #[tokio::test]
    async fn calls_with_captured_context_are_compensations() -> anyhow::Result<()> {
        let client = PlaybookClient::new();
        let compensation_view = view().with_captured_context(json!({"release": "r-1"}));

        client
            .execute_operation(&Operation::new("release"), &compensation_view)
            .await?;

        let calls = client.calls_for(Phase::Compensate);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].captured_context, Some(json!({"release": "r-1"})));
        assert_eq!(client.count(Phase::Execute), 0);
        Ok(())
    }

    #[test]
    fn scripts_deserialize_from_toml() -> anyhow::Result<()> {
        let script: ParticipantScript =
            toml::from_str("vote = \"abort\"\ndelay_ms = 5\nhealthy = false\n")?;
        let operation: OperationScript =
            toml::from_str("unsuccessful = true\ndata = { note = \"x\" }\n")?;

        assert_eq!(script.vote, ScriptedVote::Abort);
        assert_eq!(script.delay_ms, 5);
        assert_eq!(script.healthy, Some(false));
        assert!(operation.unsuccessful);
        assert_eq!(operation.data["note"], "x");
        Ok(())
    }
}
