use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::policy::RetryPolicy;
use crate::retry::RetryExecutor;

/// Attempts allowed for a single compensation: the first try and one retry.
pub const COMPENSATION_ATTEMPTS: u32 = 2;

/// Executor for compensations derived from `executor`: same sleeper and base
/// delay, fixed spacing, [`COMPENSATION_ATTEMPTS`] attempts.
pub fn compensation_retry(executor: &RetryExecutor) -> RetryExecutor {
    executor.with_policy(RetryPolicy::fixed(
        COMPENSATION_ATTEMPTS,
        executor.policy().base_delay,
    ))
}

type Undo<'a> = Box<dyn FnMut() -> anyhow::Result<()> + 'a>;

struct Compensation<'a> {
    name: String,
    undo: Option<Undo<'a>>,
}

/// One compensation step that could not be applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RollbackFailure {
    /// Step name.
    pub step: String,
    /// Error text from the last compensation attempt.
    pub error: String,
}

/// Outcome of unwinding a [`RollbackCoordinator`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RollbackReport {
    /// Steps reversed successfully, in the order they were reversed.
    pub reverted: Vec<String>,
    /// Steps whose compensation failed.
    pub failed: Vec<RollbackFailure>,
    /// Steps that have no compensation at all.
    pub irreversible: Vec<String>,
}

impl RollbackReport {
    /// True when nothing was left behind.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.irreversible.is_empty()
    }

    /// True when an operator has to finish the cleanup by hand.
    pub fn requires_manual_intervention(&self) -> bool {
        !self.is_clean()
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        let mut text = format!("{} step(s) reverted", self.reverted.len());
        if !self.failed.is_empty() {
            let names: Vec<&str> = self.failed.iter().map(|f| f.step.as_str()).collect();
            text.push_str(&format!("; rollback failed for: {}", names.join(", ")));
        }
        if !self.irreversible.is_empty() {
            text.push_str(&format!(
                "; not reversible: {}",
                self.irreversible.join(", ")
            ));
        }
        if self.requires_manual_intervention() {
            text.push_str("; manual intervention required");
        }
        text
    }
}

/// Best-effort compensation stack.
///
/// Steps are recorded in application order and reversed last-in first-out.
/// Each compensation is attempted once, or under the bounded policy given to
/// [`with_retry`](Self::with_retry); failures are reported, never retried
/// indefinitely.
pub struct RollbackCoordinator<'a> {
    steps: Vec<Compensation<'a>>,
    retry: Option<RetryExecutor>,
}

impl Default for RollbackCoordinator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> RollbackCoordinator<'a> {
    /// Empty coordinator.
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            retry: None,
        }
    }

    /// Retry each compensation under `executor`'s policy.
    pub fn with_retry(mut self, executor: RetryExecutor) -> Self {
        self.retry = Some(executor);
        self
    }

    /// Record a reversible step.
    pub fn record<F>(&mut self, name: impl Into<String>, undo: F)
    where
        F: FnMut() -> anyhow::Result<()> + 'a,
    {
        self.steps.push(Compensation {
            name: name.into(),
            undo: Some(Box::new(undo)),
        });
    }

    /// Record a step that cannot be reversed.
    pub fn record_irreversible(&mut self, name: impl Into<String>) {
        self.steps.push(Compensation {
            name: name.into(),
            undo: None,
        });
    }

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Reverse every recorded step, newest first, and clear the stack.
    pub fn unwind(&mut self) -> RollbackReport {
        let mut report = RollbackReport::default();
        if self.steps.is_empty() {
            return report;
        }

        warn!(steps = self.steps.len(), "rolling back applied steps");

        while let Some(mut step) = self.steps.pop() {
            let Some(undo) = step.undo.as_mut() else {
                warn!(step = %step.name, "step is not reversible; leaving in place");
                report.irreversible.push(step.name);
                continue;
            };

            let description = format!("rollback {}", step.name);
            let outcome = match &self.retry {
                Some(executor) => executor
                    .execute(&description, |_| undo())
                    .map_err(|err| err.into_inner()),
                None => undo(),
            };

            match outcome {
                Ok(()) => {
                    info!(step = %step.name, "rolled back");
                    report.reverted.push(step.name);
                }
                Err(err) => {
                    error!(step = %step.name, error = %format!("{err:#}"), "rollback failed");
                    report.failed.push(RollbackFailure {
                        step: step.name,
                        error: format!("{err:#}"),
                    });
                }
            }
        }

        if report.requires_manual_intervention() {
            error!("{}", report.summary());
        } else {
            info!("{}", report.summary());
        }

        report
    }
}
