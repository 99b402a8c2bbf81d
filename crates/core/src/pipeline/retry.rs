use crate::error::{is_transient, raw_output};
use std::future::Future;
use std::time::Duration;

const RAW_OUTPUT_LOG_CHARS: usize = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Pause before retrying a transient failure.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(15 * 60),
        }
    }
}

/// Runs `op` up to `policy.max_attempts` times.
///
/// Transient failures (throttling, connection trouble) wait `policy.delay` before the
/// next attempt; other failures are retried immediately. Once attempts run out the
/// failure is logged and `None` is returned, so one unit of work never aborts a run.
pub async fn with_retry<T, F, Fut>(label: &str, policy: RetryPolicy, op: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    with_retry_using(label, policy, tokio::time::sleep, op).await
}

pub async fn with_retry_using<T, F, Fut, S, SFut>(
    label: &str,
    policy: RetryPolicy,
    mut sleep: S,
    mut op: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
    S: FnMut(Duration) -> SFut,
    SFut: Future<Output = ()>,
{
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        let err = match op().await {
            Ok(value) => return Some(value),
            Err(err) => err,
        };

        let transient = is_transient(&err);
        let detail = format!("{err:#}");
        tracing::warn!(label, attempt, max_attempts, transient, error = %detail, "attempt failed");
        if let Some(raw) = raw_output(&err) {
            let head: String = raw.chars().take(RAW_OUTPUT_LOG_CHARS).collect();
            tracing::debug!(label, attempt, raw_output = %head, "upstream response body");
        }

        if attempt == max_attempts {
            tracing::warn!(label, "all attempts failed; continuing");
        } else if transient {
            tracing::info!(label, delay_secs = policy.delay.as_secs(), "backing off before retry");
            sleep(policy.delay).await;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, Service, ServiceError};
    use std::cell::{Cell, RefCell};

    fn throttled() -> anyhow::Error {
        ServiceError::new(Service::Ranking, ErrorKind::Throttled, "ThrottlingException").into()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_secs(900),
        }
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_after_two_sleeps() {
        let sleeps = RefCell::new(Vec::new());
        let calls = Cell::new(0u32);

        let out = with_retry_using(
            "Semiconductors",
            policy(),
            |d| {
                sleeps.borrow_mut().push(d);
                std::future::ready(())
            },
            || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 3 {
                        Err(throttled())
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;

        assert_eq!(out, Some(3));
        assert_eq!(calls.get(), 3);
        assert_eq!(*sleeps.borrow(), vec![Duration::from_secs(900); 2]);
    }

    #[tokio::test]
    async fn always_failing_work_stops_after_max_attempts() {
        let sleeps = Cell::new(0u32);
        let calls = Cell::new(0u32);

        let out: Option<()> = with_retry_using(
            "Banks",
            policy(),
            |_| {
                sleeps.set(sleeps.get() + 1);
                std::future::ready(())
            },
            || {
                calls.set(calls.get() + 1);
                async { Err(throttled()) }
            },
        )
        .await;

        assert_eq!(out, None);
        assert_eq!(calls.get(), 3);
        // No sleep after the final attempt.
        assert_eq!(sleeps.get(), 2);
    }

    #[tokio::test]
    async fn non_transient_failures_retry_without_sleeping() {
        let sleeps = Cell::new(0u32);
        let calls = Cell::new(0u32);

        let out: Option<()> = with_retry_using(
            "Software",
            policy(),
            |_| {
                sleeps.set(sleeps.get() + 1);
                std::future::ready(())
            },
            || {
                calls.set(calls.get() + 1);
                async { Err(anyhow::anyhow!("schema mismatch")) }
            },
        )
        .await;

        assert_eq!(out, None);
        assert_eq!(calls.get(), 3);
        assert_eq!(sleeps.get(), 0);
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let calls = Cell::new(0u32);
        let out = with_retry(
            "Utilities",
            RetryPolicy {
                max_attempts: 0,
                delay: Duration::ZERO,
            },
            || {
                calls.set(calls.get() + 1);
                async { Ok::<_, anyhow::Error>(7) }
            },
        )
        .await;
        assert_eq!(out, Some(7));
        assert_eq!(calls.get(), 1);
    }
}
