//! Integration tests for saga compensation behavior.

use std::sync::Mutex;

use async_trait::async_trait;
use txcoord_saga::{SagaBuilder, SagaContext, SagaError, SagaStep};

#[derive(Default)]
struct TestContext {
    compensation_log: Mutex<Vec<String>>,
}

impl TestContext {
    fn log(&self) -> Vec<String> {
        self.compensation_log.lock().expect("lock").clone()
    }
}

impl SagaContext for TestContext {}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct TestError(String);

struct TrackedStep {
    name: &'static str,
    receipt: &'static str,
}

#[async_trait]
impl SagaStep for TrackedStep {
    type Context = TestContext;
    type Error = TestError;
    type Captured = String;

    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, _ctx: &Self::Context) -> Result<Self::Captured, Self::Error> {
        Ok(self.receipt.to_string())
    }

    async fn compensate(
        &self,
        ctx: &Self::Context,
        captured: Self::Captured,
    ) -> Result<(), Self::Error> {
        ctx.compensation_log
            .lock()
            .expect("lock")
            .push(format!("compensate {}: receipt {}", self.name, captured));
        Ok(())
    }
}

struct FailingStep {
    error_message: String,
}

#[async_trait]
impl SagaStep for FailingStep {
    type Context = TestContext;
    type Error = TestError;
    type Captured = ();

    fn name(&self) -> &str {
        "failing"
    }

    async fn execute(&self, _ctx: &Self::Context) -> Result<Self::Captured, Self::Error> {
        Err(TestError(self.error_message.clone()))
    }
}

struct ReadOnlyStep {
    name: &'static str,
}

#[async_trait]
impl SagaStep for ReadOnlyStep {
    type Context = TestContext;
    type Error = TestError;
    type Captured = ();

    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, _ctx: &Self::Context) -> Result<Self::Captured, Self::Error> {
        Ok(())
    }

    fn has_compensation(&self) -> bool {
        false
    }
}

struct BrokenUndoStep {
    name: &'static str,
}

#[async_trait]
impl SagaStep for BrokenUndoStep {
    type Context = TestContext;
    type Error = TestError;
    type Captured = ();

    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, _ctx: &Self::Context) -> Result<Self::Captured, Self::Error> {
        Ok(())
    }

    async fn compensate(
        &self,
        _ctx: &Self::Context,
        _captured: Self::Captured,
    ) -> Result<(), Self::Error> {
        Err(TestError(format!("{} cannot be undone", self.name)))
    }

    fn compensation_description(&self) -> String {
        format!("release {}", self.name)
    }
}

#[tokio::test]
async fn compensation_happens_in_lifo_order() {
    let ctx = TestContext::default();

    let saga = SagaBuilder::new()
        .first_step(TrackedStep {
            name: "step_a",
            receipt: "ra",
        })
        .then(TrackedStep {
            name: "step_b",
            receipt: "rb",
        })
        .then(TrackedStep {
            name: "step_c",
            receipt: "rc",
        })
        .then(FailingStep {
            error_message: "boom".to_string(),
        })
        .build();

    let result = saga.execute(&ctx).await;

    assert!(result.is_err());
    assert_eq!(
        ctx.log(),
        vec![
            "compensate step_c: receipt rc",
            "compensate step_b: receipt rb",
            "compensate step_a: receipt ra",
        ]
    );
}

#[tokio::test]
async fn mixed_compensation_and_read_only_steps() {
    let ctx = TestContext::default();

    let saga = SagaBuilder::new()
        .first_step(TrackedStep {
            name: "tracked_1",
            receipt: "1",
        })
        .then(ReadOnlyStep {
            name: "read_only_1",
        })
        .then(TrackedStep {
            name: "tracked_2",
            receipt: "2",
        })
        .then(FailingStep {
            error_message: "abort".to_string(),
        })
        .build();

    let err = saga.execute(&ctx).await.expect_err("saga should fail");

    assert_eq!(err.steps_completed(), 3);
    assert_eq!(
        ctx.log(),
        vec![
            "compensate tracked_2: receipt 2",
            "compensate tracked_1: receipt 1"
        ]
    );
}

#[tokio::test]
async fn first_step_failure_triggers_no_compensation() {
    let ctx = TestContext::default();

    let saga = SagaBuilder::new()
        .first_step(FailingStep {
            error_message: "immediate failure".to_string(),
        })
        .build();

    let err = saga.execute(&ctx).await.expect_err("saga should fail");

    assert!(ctx.log().is_empty());
    match err {
        SagaError::StepFailed {
            step,
            steps_completed,
            source,
        } => {
            assert_eq!(step, "failing");
            assert_eq!(steps_completed, 0);
            assert_eq!(source.to_string(), "immediate failure");
        }
        other => panic!("expected StepFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_compensation_is_reported_and_others_still_run() {
    let ctx = TestContext::default();

    let saga = SagaBuilder::new()
        .first_step(TrackedStep {
            name: "first",
            receipt: "r1",
        })
        .then(BrokenUndoStep { name: "middle" })
        .then(TrackedStep {
            name: "last",
            receipt: "r3",
        })
        .then(FailingStep {
            error_message: "trigger rollback".to_string(),
        })
        .build();

    let err = saga.execute(&ctx).await.expect_err("saga should fail");

    assert_eq!(
        ctx.log(),
        vec!["compensate last: receipt r3", "compensate first: receipt r1"]
    );
    let failures = err.compensation_errors();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].step, "middle");
    assert_eq!(failures[0].description, "release middle");
    assert_eq!(failures[0].error.to_string(), "middle cannot be undone");
}
