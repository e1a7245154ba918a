use std::any::Any;

use async_trait::async_trait;

use crate::step::SagaStep;

pub(crate) type Captured = Box<dyn Any + Send>;

#[async_trait]
pub(crate) trait ErasedStep<Ctx, Err>: Send + Sync {
    fn name(&self) -> &str;

    fn has_compensation(&self) -> bool;

    async fn execute_erased(&self, ctx: &Ctx) -> Result<Captured, Err>;

    async fn compensate_erased(&self, ctx: &Ctx, captured: Captured) -> Result<(), Err>;

    fn compensation_description(&self) -> String;
}

pub(crate) struct StepWrapper<S> {
    step: S,
}

impl<S> StepWrapper<S> {
    pub(crate) fn new(step: S) -> Self {
        Self { step }
    }
}

#[async_trait]
impl<S> ErasedStep<S::Context, S::Error> for StepWrapper<S>
where
    S: SagaStep,
{
    fn name(&self) -> &str {
        self.step.name()
    }

    fn has_compensation(&self) -> bool {
        self.step.has_compensation()
    }

    async fn execute_erased(&self, ctx: &S::Context) -> Result<Captured, S::Error> {
        let captured = self.step.execute(ctx).await?;
        Ok(Box::new(captured))
    }

    async fn compensate_erased(&self, ctx: &S::Context, captured: Captured) -> Result<(), S::Error> {
        let typed = captured
            .downcast::<S::Captured>()
            .expect("captured value is produced by the same step");
        self.step.compensate(ctx, *typed).await
    }

    fn compensation_description(&self) -> String {
        self.step.compensation_description()
    }
}
