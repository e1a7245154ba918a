//! Async saga engine.
//!
//! A saga runs a fixed sequence of steps strictly in order. Every step that
//! succeeds may capture data needed to undo it; when a later step fails, the
//! captured compensations run in reverse order (LIFO). A failing compensation
//! is recorded and the sweep continues with the remaining entries.

mod audit;
mod builder;
mod erased;
mod error;
mod saga;
mod step;

pub use audit::{SagaAuditLog, StepRecord, StepStatus};
pub use builder::{Empty, HasSteps, SagaBuilder};
pub use error::{CompensationError, SagaError, StepFailure};
pub use saga::{Saga, SagaOutcome};
pub use step::{SagaContext, SagaStep};
