//! Playbook files for `txcoord simulate`.
//!
//! A playbook is a TOML document with an optional `[coordinator]` table, the
//! scripted behaviour of participants and saga operations, and the list of
//! transactions to run:
//!
//! ```toml
//! [coordinator]
//! default_max_retries = 1
//!
//! [participants.inventory]
//! vote = "abort"
//!
//! [operations.charge]
//! fail = true
//!
//! [[transactions]]
//! kind = "two_phase_commit"
//! participants = ["inventory", "payments"]
//!
//! [[transactions]]
//! kind = "saga"
//! operations = [
//!     { name = "reserve", compensation = { name = "release" } },
//!     { name = "charge" },
//! ]
//! ```

use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use txcoord_coordinator::playbook::{OperationScript, ParticipantScript, PlaybookClient};
use txcoord_coordinator::{CoordinatorConfig, TransactionRequest};
use txcoord_core::{ParticipantId, SagaOperation, TransactionKind};

use crate::error::{CliError, Result};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Playbook {
    #[serde(default)]
    coordinator: Option<toml::Value>,
    #[serde(default)]
    participants: IndexMap<String, ParticipantScript>,
    #[serde(default)]
    operations: IndexMap<String, OperationScript>,
    #[serde(default)]
    pub(crate) transactions: Vec<TransactionSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TransactionSpec {
    pub(crate) name: Option<String>,
    pub(crate) kind: TransactionKind,
    #[serde(default)]
    participants: Vec<ParticipantId>,
    #[serde(default)]
    operations: Vec<SagaOperation>,
    #[serde(default = "enabled")]
    compensate: bool,
    #[serde(default)]
    context: Value,
    timeout_ms: Option<u64>,
    max_retries: Option<u32>,
}

fn enabled() -> bool {
    true
}

impl Playbook {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CliError::ReadPlaybook {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| CliError::ParsePlaybook {
            path: path.to_path_buf(),
            source,
        })
    }

    pub(crate) fn config(&self) -> Result<CoordinatorConfig> {
        let Some(table) = self.coordinator.clone() else {
            return Ok(CoordinatorConfig::default());
        };
        Ok(CoordinatorConfig::from_toml_value(table)?)
    }

    pub(crate) fn client(&self) -> PlaybookClient {
        let client = self
            .participants
            .iter()
            .fold(PlaybookClient::new(), |client, (id, script)| {
                client.with_participant(id.clone(), script.clone())
            });
        self.operations
            .iter()
            .fold(client, |client, (name, script)| {
                client.with_operation(name.clone(), script.clone())
            })
    }

    /// Ids of scripted participants, in playbook order.
    pub(crate) fn scripted_participants(&self) -> impl Iterator<Item = &str> {
        self.participants.keys().map(String::as_str)
    }
}

impl TransactionSpec {
    /// Label used in output: the explicit name, or the position in the
    /// playbook.
    pub(crate) fn label(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("#{index} {}", self.kind))
    }

    pub(crate) fn to_request(&self, index: usize) -> Result<TransactionRequest> {
        let invalid = |reason: &str| CliError::InvalidTransaction {
            index,
            reason: reason.to_string(),
        };

        let mut request = match self.kind {
            TransactionKind::TwoPhaseCommit => {
                if !self.operations.is_empty() {
                    return Err(invalid("two-phase transactions take participants, not operations"));
                }
                TransactionRequest::two_phase(self.participants.iter().cloned())
            }
            TransactionKind::Saga => {
                if !self.participants.is_empty() {
                    return Err(invalid("sagas take operations, not participants"));
                }
                TransactionRequest::saga(self.operations.clone())
            }
        };

        request = request.with_context(self.context.clone());
        if let Some(timeout_ms) = self.timeout_ms {
            request = request.with_timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(max_retries) = self.max_retries {
            request = request.with_max_retries(max_retries);
        }
        if !self.compensate {
            request = request.without_compensation();
        }
        Ok(request)
    }
}
