//! Poll-until-condition engine.
//!
//! [`poll_until`] runs an async operation, classifies each result into an
//! [`Attempt`] and either returns, waits a fixed interval and tries again, or
//! gives up once the [`RetryPolicy`] budget is spent. Attempts never overlap.

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Attempts used when neither the call nor the settings provide a policy.
pub const DEFAULT_MAX_ATTEMPTS: usize = 60;

/// Interval used when neither the call nor the settings provide a policy.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// How many times to try and how long to wait between tries.
///
/// The interval is fixed: no backoff, no jitter, so polls have predictable
/// timing.
///
/// # Examples
///
/// ```
/// use smarthttp::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(3, Duration::from_millis(50)).unwrap();
/// assert_eq!(policy.delay_after_attempt(1), Some(Duration::from_millis(50)));
/// assert_eq!(policy.delay_after_attempt(2), Some(Duration::from_millis(50)));
/// assert_eq!(policy.delay_after_attempt(3), None);
///
/// assert!(RetryPolicy::new(0, Duration::ZERO).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
    interval: Duration,
}

impl RetryPolicy {
    /// Creates a policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `max_attempts` is zero.
    pub fn new(max_attempts: usize, interval: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::Configuration(
                "retry policy needs at least one attempt".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            interval,
        })
    }

    /// Total number of attempts, including the first.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Wait between consecutive attempts.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the wait before the attempt following `attempt` (1-indexed),
    /// or `None` when the budget is spent.
    pub fn delay_after_attempt(&self, attempt: usize) -> Option<Duration> {
        if attempt < self.max_attempts {
            Some(self.interval)
        } else {
            None
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
        }
    }
}

/// What a single attempt produced, after the predicate has been applied.
#[derive(Debug)]
pub enum Attempt<T> {
    /// The condition holds; polling stops with this value.
    Satisfied(T),
    /// Not there yet; poll again if the budget allows.
    Pending(Observed<T>),
    /// A failure no amount of waiting will fix.
    Fatal(Error),
}

/// The reason an attempt was still pending.
#[derive(Debug)]
pub enum Observed<T> {
    /// The operation succeeded but the predicate rejected its value.
    Unsatisfied(T),
    /// The operation failed with a retryable error.
    Fault(Error),
}

impl<T> Attempt<T> {
    /// Classifies an operation result against a predicate.
    ///
    /// Retryable errors (see [`Error::is_retryable`]) become pending, all
    /// others are fatal.
    pub fn classify<P>(result: Result<T>, predicate: P) -> Self
    where
        P: FnOnce(&T) -> bool,
    {
        match result {
            Ok(value) if predicate(&value) => Attempt::Satisfied(value),
            Ok(value) => Attempt::Pending(Observed::Unsatisfied(value)),
            Err(e) if e.is_retryable() => Attempt::Pending(Observed::Fault(e)),
            Err(e) => Attempt::Fatal(e),
        }
    }
}

/// A value that satisfied the predicate, with the attempt it took.
#[derive(Debug)]
pub struct Polled<T> {
    /// The satisfying value.
    pub value: T,
    /// 1-indexed attempt that produced `value`.
    pub attempts: usize,
}

/// Why a poll ended without a satisfying value.
#[derive(Debug)]
pub enum PollFailure<T> {
    /// The budget ran out; `last` is what the final attempt produced.
    Exhausted {
        /// Attempts made, always equal to the policy's `max_attempts`.
        attempts: usize,
        /// Attempts that failed instead of producing a value.
        faulted: usize,
        /// The final attempt's outcome.
        last: Observed<T>,
    },
    /// An attempt failed with a non-retryable error.
    Fatal(Error),
}

/// Runs `operation` until `predicate` holds for its result or `policy` is
/// exhausted.
///
/// `operation` receives the 1-indexed attempt number. It is never invoked
/// again before the previous attempt has completed.
///
/// # Examples
///
/// ```
/// use smarthttp::retry::{poll_until, RetryPolicy};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let policy = RetryPolicy::new(5, Duration::from_millis(1)).unwrap();
/// let polled = poll_until(&policy, |attempt| async move { Ok(attempt * 10) }, |v| *v >= 30)
///     .await
///     .unwrap();
/// assert_eq!(polled.value, 30);
/// assert_eq!(polled.attempts, 3);
/// # }
/// ```
pub async fn poll_until<T, F, Fut, P>(
    policy: &RetryPolicy,
    mut operation: F,
    predicate: P,
) -> std::result::Result<Polled<T>, PollFailure<T>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&T) -> bool,
{
    let mut attempt = 0;
    let mut faulted = 0;

    loop {
        attempt += 1;

        let observed = match Attempt::classify(operation(attempt).await, &predicate) {
            Attempt::Satisfied(value) => {
                tracing::debug!(attempt = attempt, "Poll condition satisfied");
                return Ok(Polled {
                    value,
                    attempts: attempt,
                });
            }
            Attempt::Fatal(e) => {
                tracing::error!(error = %e, attempt = attempt, "Poll aborted by non-retryable error");
                return Err(PollFailure::Fatal(e));
            }
            Attempt::Pending(observed) => observed,
        };
        if matches!(observed, Observed::Fault(_)) {
            faulted += 1;
        }

        match policy.delay_after_attempt(attempt) {
            Some(delay) => {
                if let Observed::Fault(e) = &observed {
                    tracing::warn!(error = %e, attempt = attempt, "Poll attempt failed");
                }
                tracing::debug!(
                    delay_ms = delay.as_millis(),
                    attempt = attempt,
                    max_attempts = policy.max_attempts(),
                    "Condition not met, polling again after delay"
                );
                tokio::time::sleep(delay).await;
            }
            None => {
                return Err(PollFailure::Exhausted {
                    attempts: attempt,
                    faulted,
                    last: observed,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn fast(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1)).unwrap()
    }

    #[test]
    fn test_fixed_interval_delays() {
        let policy = RetryPolicy::new(3, Duration::from_millis(250)).unwrap();

        assert_eq!(
            policy.delay_after_attempt(1),
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            policy.delay_after_attempt(2),
            Some(Duration::from_millis(250))
        );
        assert_eq!(policy.delay_after_attempt(3), None);
    }

    #[test]
    fn test_single_attempt_policy_never_waits() {
        let policy = RetryPolicy::new(1, Duration::from_secs(10)).unwrap();
        assert_eq!(policy.delay_after_attempt(1), None);
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 60);
        assert_eq!(policy.interval(), Duration::from_millis(1000));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        assert!(matches!(
            RetryPolicy::new(0, Duration::from_millis(5)),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_classify() {
        assert!(matches!(
            Attempt::classify(Ok(5), |v| *v == 5),
            Attempt::Satisfied(5)
        ));
        assert!(matches!(
            Attempt::classify(Ok(4), |v| *v == 5),
            Attempt::Pending(Observed::Unsatisfied(4))
        ));
        let timeout = Error::Timeout {
            endpoint: "/x".to_string(),
        };
        assert!(matches!(
            Attempt::<i32>::classify(Err(timeout), |_| true),
            Attempt::Pending(Observed::Fault(Error::Timeout { .. }))
        ));
        assert!(matches!(
            Attempt::<i32>::classify(Err(Error::Serialization("x".into())), |_| true),
            Attempt::Fatal(Error::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_never_satisfied_runs_exactly_max_attempts() {
        let calls = AtomicUsize::new(0);
        let result = poll_until(
            &fast(4),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok("pending") }
            },
            |v| *v == "done",
        )
        .await;

        match result {
            Err(PollFailure::Exhausted {
                attempts,
                faulted,
                last: Observed::Unsatisfied(last),
            }) => {
                assert_eq!(attempts, 4);
                assert_eq!(faulted, 0);
                assert_eq!(last, "pending");
            }
            other => panic!("Expected exhaustion, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_satisfied_short_circuits() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(10, Duration::from_millis(20)).unwrap();
        let start = Instant::now();

        let polled = poll_until(
            &policy,
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(attempt) }
            },
            |v| *v == 2,
        )
        .await
        .unwrap();

        assert_eq!(polled.value, 2);
        assert_eq!(polled.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // one interval, far from the ten a full run would take
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_retryable_faults_are_retried_then_reported() {
        let result = poll_until(
            &fast(3),
            |attempt| async move {
                Err::<(), _>(Error::Timeout {
                    endpoint: format!("/attempt/{attempt}"),
                })
            },
            |_| true,
        )
        .await;

        match result {
            Err(PollFailure::Exhausted {
                attempts,
                faulted,
                last: Observed::Fault(Error::Timeout { endpoint }),
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(faulted, 3);
                assert_eq!(endpoint, "/attempt/3");
            }
            other => panic!("Expected faulted exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_trailing_fault_is_counted_apart() {
        let result = poll_until(
            &fast(4),
            |attempt| async move {
                if attempt < 4 {
                    Ok("pending")
                } else {
                    Err(Error::Timeout {
                        endpoint: "/x".to_string(),
                    })
                }
            },
            |v| *v == "done",
        )
        .await;

        match result {
            Err(PollFailure::Exhausted {
                attempts,
                faulted,
                last: Observed::Fault(_),
            }) => {
                assert_eq!(attempts, 4);
                assert_eq!(faulted, 1);
            }
            other => panic!("Expected exhaustion ending in a fault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fault_then_success() {
        let polled = poll_until(
            &fast(5),
            |attempt| async move {
                if attempt < 3 {
                    Err(Error::Timeout {
                        endpoint: "/x".to_string(),
                    })
                } else {
                    Ok(attempt)
                }
            },
            |_| true,
        )
        .await
        .unwrap();

        assert_eq!(polled.attempts, 3);
    }

    #[tokio::test]
    async fn test_fatal_error_stops_immediately() {
        let calls = AtomicUsize::new(0);
        let result = poll_until(
            &fast(5),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<u8, _>(Error::Deserialization {
                        raw_response: "<html>".to_string(),
                        serde_error: "expected value".to_string(),
                    })
                }
            },
            |_| true,
        )
        .await;

        assert!(matches!(
            result,
            Err(PollFailure::Fatal(Error::Deserialization { .. }))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
