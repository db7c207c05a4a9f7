//! Exponential backoff for extractor operations.

use std::future::Future;
use std::time::Duration;

use tokio::task::yield_now;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How often and how patiently an operation is retried.
pub struct RetryPolicy {
    max_attempts: usize,
    unit: Duration,
}

impl RetryPolicy {
    /// Policy making at most `max_attempts` calls, waiting `unit * 2^attempt` after a failure.
    #[must_use]
    pub fn new(max_attempts: usize, unit: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            unit,
        }
    }

    /// Total number of calls allowed.
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Delay after the failed call numbered `attempt` (1-based): 2, 4, 8 … units.
    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);
        let factor = 2_u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.unit.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Whether a failed call is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Try again after the backoff delay.
    Retry,
    /// Give up immediately.
    Abort,
}

#[derive(Debug)]
/// Final error of a retried operation together with the number of calls made.
pub struct RetryFailure<E> {
    /// Error of the last call.
    pub error: E,
    /// Calls made, including the last one.
    pub attempts: usize,
}

/// Run `operation` until it succeeds, `classify` aborts, or the policy is exhausted.
///
/// `operation` receives the 1-based attempt number. `on_retry` is called before each
/// backoff sleep with the failed attempt, the upcoming delay, and the error.
/// On success the value is returned with the number of calls made.
///
/// # Errors
///
/// Returns a [`RetryFailure`] with the last error when retries are exhausted or aborted.
pub async fn retry_with_backoff<T, E, F, Fut, C, L>(
    policy: RetryPolicy,
    mut operation: F,
    mut classify: C,
    mut on_retry: L,
) -> Result<(T, usize), RetryFailure<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: FnMut(&E) -> RetryDisposition,
    L: FnMut(usize, Duration, &E),
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) => {
                let exhausted = attempt >= policy.max_attempts;
                if exhausted || classify(&error) == RetryDisposition::Abort {
                    return Err(RetryFailure {
                        error,
                        attempts: attempt,
                    });
                }

                let delay = policy.delay_for(attempt);
                on_retry(attempt, delay, &error);
                if delay.is_zero() {
                    yield_now().await;
                } else {
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use tokio::time::Instant;

    use super::*;

    #[test]
    fn delays_double_from_two_units() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for(2), Duration::from_millis(40));
        assert_eq!(policy.delay_for(3), Duration::from_millis(80));
    }

    #[test]
    fn zero_attempts_still_calls_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        assert_eq!(policy.delay_for(64), Duration::from_secs(u64::from(u32::MAX)));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Cell::new(0_usize);
        let mut delays = Vec::new();
        let started = Instant::now();

        let result = retry_with_backoff(
            RetryPolicy::new(4, Duration::from_secs(1)),
            |_| {
                calls.set(calls.get() + 1);
                let outcome = if calls.get() <= 2 { Err("flaky") } else { Ok(7) };
                async move { outcome }
            },
            |_| RetryDisposition::Retry,
            |_, delay, _| delays.push(delay),
        )
        .await;

        assert_eq!(result.ok(), Some((7, 3)));
        assert_eq!(calls.get(), 3);
        assert_eq!(delays, vec![Duration::from_secs(2), Duration::from_secs(4)]);
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_attempts() {
        let result: Result<((), usize), _> = retry_with_backoff(
            RetryPolicy::new(3, Duration::from_millis(1)),
            |_| async { Err("down") },
            |_| RetryDisposition::Retry,
            |_, _, _| {},
        )
        .await;

        let failure = result.expect_err("must exhaust");
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.error, "down");
    }

    #[tokio::test]
    async fn abort_stops_immediately() {
        let calls = Cell::new(0_usize);
        let result: Result<((), usize), _> = retry_with_backoff(
            RetryPolicy::new(5, Duration::from_secs(60)),
            |_| {
                calls.set(calls.get() + 1);
                async { Err("fatal") }
            },
            |_| RetryDisposition::Abort,
            |_, _, _| {},
        )
        .await;

        assert_eq!(result.expect_err("aborted").attempts, 1);
        assert_eq!(calls.get(), 1);
    }
}
