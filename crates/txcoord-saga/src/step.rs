use async_trait::async_trait;

/// Shared state a saga runs against.
///
/// The engine asks the context whether the saga was cancelled before each
/// forward step.
pub trait SagaContext: Sync {
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl SagaContext for () {}

/// A step in a saga that can be executed and compensated.
///
/// # Type Parameters
///
/// - `Context`: Shared dependencies (injected, not passed between steps)
/// - `Error`: The error type for step and compensation failures
/// - `Captured`: Data produced by a successful execution and handed back to
///   `compensate()` during rollback
#[async_trait]
pub trait SagaStep: Send + Sync {
    /// Shared context providing dependencies.
    type Context: SagaContext;

    /// Error type for step failures.
    type Error: Send;

    /// What a successful execution keeps for its compensation.
    type Captured: Send + 'static;

    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Execute the step.
    ///
    /// # Errors
    ///
    /// Returns an error if the step fails to complete.
    async fn execute(&self, ctx: &Self::Context) -> Result<Self::Captured, Self::Error>;

    /// Whether this step has anything to undo.
    ///
    /// Steps returning `false` are not pushed onto the compensation stack.
    fn has_compensation(&self) -> bool {
        true
    }

    /// Compensate (undo) the step's effects.
    ///
    /// Called during rollback with the value `execute()` captured.
    ///
    /// # Errors
    ///
    /// Returns an error if compensation fails.
    async fn compensate(
        &self,
        ctx: &Self::Context,
        captured: Self::Captured,
    ) -> Result<(), Self::Error> {
        let _ = (ctx, captured);
        Ok(())
    }

    /// Human-readable description of what compensation will do.
    fn compensation_description(&self) -> String {
        format!("undo {}", self.name())
    }
}
