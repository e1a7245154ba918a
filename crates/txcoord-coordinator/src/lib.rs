//! Distributed transaction coordinator.
//!
//! A [`Coordinator`] drives transactions across registered participants using
//! either two-phase commit or a saga with compensating operations. It reaches
//! participants through a [`ParticipantClient`](txcoord_core::ParticipantClient)
//! so the transport stays outside this crate.

mod config;
mod coordinator;
mod engine;
mod error;
mod events;
mod health;
mod log;
mod metrics;
pub mod playbook;
mod registry;
mod retry;
mod saga_runner;
mod store;
mod transaction;
mod two_phase;

pub use config::{ConfigError, CoordinatorConfig, ParticipantEntry};
pub use coordinator::Coordinator;
pub use error::{CompensationFailure, CoordinatorError, Result, error_chain};
pub use events::{EventBus, TransactionEvent};
pub use health::{HealthReport, HealthStatus, ParticipantHealth, ParticipantStatus};
pub use log::{
    Decision, InMemoryTransactionLog, LogError, LogRecord, NoopTransactionLog, TransactionLog,
};
pub use metrics::{Metrics, MetricsSnapshot};
pub use registry::ParticipantRegistry;
pub use retry::{Attempted, CallLimits, CallSpec, RetryPolicy};
pub use store::{TransactionRecord, TransactionStore};
pub use transaction::{
    AbortOutcome, ShutdownReport, Statistics, TransactionOutcome, TransactionRequest,
};
