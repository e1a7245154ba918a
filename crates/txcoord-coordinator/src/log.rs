//! Pluggable transaction log.
//!
//! The coordinator appends a `Begin` record when a transaction is accepted, a
//! `Decision` record before any participant is told to commit or abort, and
//! an `End` record with the terminal state. Durability is the
//! implementation's concern.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use txcoord_core::{TransactionId, TransactionKind, TransactionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Commit,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum LogRecord {
    Begin {
        transaction: TransactionId,
        kind: TransactionKind,
    },
    Decision {
        transaction: TransactionId,
        decision: Decision,
    },
    End {
        transaction: TransactionId,
        state: TransactionState,
    },
}

impl LogRecord {
    #[must_use]
    pub fn transaction(&self) -> TransactionId {
        match self {
            Self::Begin { transaction, .. }
            | Self::Decision { transaction, .. }
            | Self::End { transaction, .. } => *transaction,
        }
    }
}

#[derive(Debug, Error)]
#[error("transaction log append failed: {message}")]
pub struct LogError {
    pub message: String,
}

impl LogError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the record could not be persisted.
    async fn append(&self, record: LogRecord) -> Result<(), LogError>;
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransactionLog;

#[async_trait]
impl TransactionLog for NoopTransactionLog {
    async fn append(&self, _record: LogRecord) -> Result<(), LogError> {
        Ok(())
    }
}

/// Keeps records in memory for inspection.
#[derive(Debug, Default)]
pub struct InMemoryTransactionLog {
    records: Mutex<Vec<LogRecord>>,
}

impl InMemoryTransactionLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    #[must_use]
    pub fn records_for(&self, transaction: TransactionId) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.transaction() == transaction)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TransactionLog for InMemoryTransactionLog {
    async fn append(&self, record: LogRecord) -> Result<(), LogError> {
        self.records.lock().push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_log_filters_by_transaction() -> anyhow::Result<()> {
        let log = InMemoryTransactionLog::new();
        let first = TransactionId::new();
        let second = TransactionId::new();

        log.append(LogRecord::Begin {
            transaction: first,
            kind: TransactionKind::TwoPhaseCommit,
        })
        .await?;
        log.append(LogRecord::Begin {
            transaction: second,
            kind: TransactionKind::Saga,
        })
        .await?;
        log.append(LogRecord::Decision {
            transaction: first,
            decision: Decision::Commit,
        })
        .await?;

        assert_eq!(log.records().len(), 3);
        assert_eq!(
            log.records_for(first),
            vec![
                LogRecord::Begin {
                    transaction: first,
                    kind: TransactionKind::TwoPhaseCommit,
                },
                LogRecord::Decision {
                    transaction: first,
                    decision: Decision::Commit,
                },
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn noop_log_accepts_everything() {
        let result = NoopTransactionLog
            .append(LogRecord::End {
                transaction: TransactionId::new(),
                state: TransactionState::Committed,
            })
            .await;

        assert!(result.is_ok());
    }
}
