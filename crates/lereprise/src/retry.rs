use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::policy::RetryPolicy;

/// Abstraction over blocking sleeps, enabling test doubles.
pub trait Sleeper: Send + Sync {
    /// Block the current thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Sleeper backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Sleeper that records requested delays instead of blocking.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Delays requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut guard) = self.delays.lock() {
            guard.push(duration);
        }
    }
}

/// Why a retried unit of work gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryFailure {
    /// Every attempt in the policy failed.
    Exhausted,
    /// The invocation budget ran out before the attempts did.
    BudgetExceeded,
    /// The error was classified as not worth retrying.
    NonRetryable,
}

/// Terminal failure of a retried unit of work.
#[derive(Debug)]
pub struct RetryError<E> {
    /// Human-readable description of the work.
    pub description: String,
    /// Attempts actually made.
    pub attempts: u32,
    /// Why retrying stopped.
    pub failure: RetryFailure,
    /// Error returned by the final attempt.
    pub last_error: E,
}

impl<E> RetryError<E> {
    /// True when the retry budget (attempts or time) was used up.
    pub fn is_exhausted(&self) -> bool {
        matches!(
            self.failure,
            RetryFailure::Exhausted | RetryFailure::BudgetExceeded
        )
    }

    /// Consume the wrapper and return the final attempt's error.
    pub fn into_inner(self) -> E {
        self.last_error
    }

    /// Transform the inner error, keeping attempt bookkeeping.
    pub fn map<F, E2>(self, f: F) -> RetryError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        RetryError {
            description: self.description,
            attempts: self.attempts,
            failure: self.failure,
            last_error: f(self.last_error),
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failure {
            RetryFailure::Exhausted => write!(
                f,
                "{} failed after {} attempt(s): {}",
                self.description, self.attempts, self.last_error
            ),
            RetryFailure::BudgetExceeded => write!(
                f,
                "{} exceeded its time budget after {} attempt(s): {}",
                self.description, self.attempts, self.last_error
            ),
            RetryFailure::NonRetryable => write!(
                f,
                "{} failed with a non-retryable error on attempt {}: {}",
                self.description, self.attempts, self.last_error
            ),
        }
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.last_error)
    }
}

/// Runs units of work under a bounded [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl RetryExecutor {
    /// Create an executor that sleeps on the current thread.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: policy.normalized(),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    /// Replace the sleeper (tests record delays instead of blocking).
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Active policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Same sleeper, different policy.
    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            policy: policy.normalized(),
            sleeper: Arc::clone(&self.sleeper),
        }
    }

    /// Run `op` until it succeeds or the policy is exhausted.
    ///
    /// `op` receives the 1-based attempt number. Every error is retried.
    pub fn execute<T, E, F>(&self, description: &str, op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
        E: fmt::Display,
    {
        self.execute_classified(description, op, |_| true)
    }

    /// Run `op`, retrying only errors for which `is_retryable` returns true.
    pub fn execute_classified<T, E, F, C>(
        &self,
        description: &str,
        mut op: F,
        is_retryable: C,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
        C: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let max_attempts = self.policy.attempts();
        let started = Instant::now();
        let mut slept = Duration::ZERO;
        let mut attempt = 1;

        loop {
            debug!(attempt, max_attempts, "{description}: attempt starting");

            let err = match op(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "{description}: succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !is_retryable(&err) {
                error!(attempt, error = %err, "{description}: non-retryable failure");
                return Err(self.failure(description, attempt, RetryFailure::NonRetryable, err));
            }

            if attempt >= max_attempts {
                error!(
                    attempts = attempt,
                    error = %err,
                    "{description}: giving up after {attempt} attempt(s)"
                );
                return Err(self.failure(description, attempt, RetryFailure::Exhausted, err));
            }

            let delay = self.policy.delay_for(attempt - 1);
            if let Some(budget) = self.policy.budget {
                let spent = started.elapsed().max(slept);
                if spent + delay > budget {
                    error!(
                        attempts = attempt,
                        budget_secs = budget.as_secs_f64(),
                        error = %err,
                        "{description}: time budget exhausted"
                    );
                    return Err(self.failure(
                        description,
                        attempt,
                        RetryFailure::BudgetExceeded,
                        err,
                    ));
                }
            }

            warn!(
                attempt,
                max_attempts,
                delay_secs = delay.as_secs_f64(),
                error = %err,
                "{description}: attempt {attempt}/{max_attempts} failed, retrying"
            );
            self.sleeper.sleep(delay);
            slept += delay;
            attempt += 1;
        }
    }

    fn failure<E>(
        &self,
        description: &str,
        attempts: u32,
        failure: RetryFailure,
        last_error: E,
    ) -> RetryError<E> {
        RetryError {
            description: description.to_string(),
            attempts,
            failure,
            last_error,
        }
    }
}
