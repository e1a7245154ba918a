use std::fmt::Debug;
use std::marker::PhantomData;

use crate::erased::{ErasedStep, StepWrapper};
use crate::saga::Saga;
use crate::step::{SagaContext, SagaStep};

/// Marker type for a builder with no steps.
pub struct Empty;

/// Marker type for a builder with at least one step.
pub struct HasSteps;

/// Type-state builder for sagas.
///
/// Every step must share the saga's context and error types, and `build()`
/// only exists once a first step was added:
///
/// ```compile_fail
/// use txcoord_saga::{Empty, SagaBuilder};
///
/// // Cannot build an empty saga - `build()` is only available after `first_step()`
/// let saga = SagaBuilder::<(), (), Empty>::new().build();
/// ```
pub struct SagaBuilder<Ctx, Err, State> {
    steps: Vec<Box<dyn ErasedStep<Ctx, Err>>>,
    compensate_on_failure: bool,
    _state: PhantomData<State>,
}

impl<Ctx: SagaContext, Err: Send> SagaBuilder<Ctx, Err, Empty> {
    /// Create a new saga builder in the empty state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            compensate_on_failure: true,
            _state: PhantomData,
        }
    }

    /// Add the first step to the saga.
    #[must_use]
    pub fn first_step<S>(self, step: S) -> SagaBuilder<Ctx, Err, HasSteps>
    where
        S: SagaStep<Context = Ctx, Error = Err> + 'static,
    {
        let mut steps = self.steps;
        steps.push(Box::new(StepWrapper::new(step)));
        SagaBuilder {
            steps,
            compensate_on_failure: self.compensate_on_failure,
            _state: PhantomData,
        }
    }
}

impl<Ctx: SagaContext, Err: Send> Default for SagaBuilder<Ctx, Err, Empty> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx: SagaContext, Err: Send, State> SagaBuilder<Ctx, Err, State> {
    /// Leave completed steps in place when a later step fails.
    #[must_use]
    pub fn without_compensation(mut self) -> Self {
        self.compensate_on_failure = false;
        self
    }
}

impl<Ctx: SagaContext, Err: Send> SagaBuilder<Ctx, Err, HasSteps> {
    /// Add another step to the saga.
    #[must_use]
    pub fn then<S>(mut self, step: S) -> Self
    where
        S: SagaStep<Context = Ctx, Error = Err> + 'static,
    {
        self.steps.push(Box::new(StepWrapper::new(step)));
        self
    }

    /// Build the saga from the accumulated steps.
    #[must_use]
    pub fn build(self) -> Saga<Ctx, Err>
    where
        Err: Debug,
    {
        Saga::from_steps(self.steps, self.compensate_on_failure)
    }
}
