use std::future::Future;
use std::time::Duration;

use tracing::debug;
use txcoord_core::{CallError, Participant, ParticipantError, Phase};

/// Exponential backoff between attempts of a participant call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

/// Limits for one participant call.
#[derive(Debug, Clone)]
pub struct CallSpec {
    pub target: String,
    pub phase: Phase,
    pub timeout: Duration,
    pub max_retries: u32,
}

/// Limits a request set explicitly. They cap a participant's own limits and
/// never raise them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallLimits {
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
}

impl CallSpec {
    #[must_use]
    pub fn for_participant(participant: &Participant, phase: Phase, limits: CallLimits) -> Self {
        Self {
            target: participant.id.to_string(),
            phase,
            timeout: limits
                .timeout
                .map_or(participant.timeout, |timeout| timeout.min(participant.timeout)),
            max_retries: limits
                .max_retries
                .map_or(participant.max_retries, |max| max.min(participant.max_retries)),
        }
    }
}

/// Result of a call together with the retries it consumed.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, CallError>,
    pub retries: u32,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at the max delay.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Run `call` once plus up to `spec.max_retries` retries.
    ///
    /// Each attempt is bounded by `spec.timeout`; an expired timeout counts as
    /// a retryable failure. Errors marked non-retryable end the loop early.
    pub async fn call<T, F, Fut>(&self, spec: &CallSpec, mut call: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ParticipantError>>,
    {
        let mut retries = 0;
        loop {
            let error = match tokio::time::timeout(spec.timeout, call()).await {
                Ok(Ok(value)) => {
                    return Attempted {
                        result: Ok(value),
                        retries,
                    };
                }
                Ok(Err(source)) => CallError::Rejected {
                    target: spec.target.clone(),
                    phase: spec.phase,
                    source,
                },
                Err(_) => CallError::Timeout {
                    target: spec.target.clone(),
                    phase: spec.phase,
                    after: spec.timeout,
                },
            };

            if !error.is_retryable() || retries >= spec.max_retries {
                return Attempted {
                    result: Err(error),
                    retries,
                };
            }

            retries += 1;
            let delay = self.delay_for(retries);
            debug!(
                participant = %spec.target,
                phase = %spec.phase,
                attempt = retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "retrying participant call"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(5))
    }

    fn spec(max_retries: u32) -> CallSpec {
        CallSpec {
            target: "ledger".to_string(),
            phase: Phase::Prepare,
            timeout: Duration::from_secs(1),
            max_retries,
        }
    }

    #[test]
    fn delay_doubles_until_capped() {
        let policy = policy();

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(6), Duration::from_millis(3200));
        assert_eq!(policy.delay_for(7), Duration::from_secs(5));
        assert_eq!(policy.delay_for(64), Duration::from_secs(5));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);

        let outcome = policy()
            .call(&spec(3), || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ParticipantError::new("busy"))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(outcome.result, Ok("done"));
        assert_eq!(outcome.retries, 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget() {
        let attempts = AtomicU32::new(0);

        let outcome: Attempted<()> = policy()
            .call(&spec(2), || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ParticipantError::new("down"))
            })
            .await;

        assert!(matches!(outcome.result, Err(CallError::Rejected { .. })));
        assert_eq!(outcome.retries, 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let attempts = AtomicU32::new(0);

        let outcome: Attempted<()> = policy()
            .call(&spec(5), || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ParticipantError::permanent("schema mismatch"))
            })
            .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.retries, 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out() {
        let outcome: Attempted<()> = policy()
            .call(&spec(0), || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        match outcome.result {
            Err(CallError::Timeout { after, phase, .. }) => {
                assert_eq!(after, Duration::from_secs(1));
                assert_eq!(phase, Phase::Prepare);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_waits_between_attempts() {
        let start = tokio::time::Instant::now();

        let _: Attempted<()> = policy()
            .call(&spec(2), || async { Err(ParticipantError::new("down")) })
            .await;

        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }
}
