//! lereprise - Retry and Recovery
//!
//! *La Reprise* (The Recovery) - bounded retry with backoff, best-effort
//! rollback, and the external command runner every leaf action goes through.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

/// External command execution and argv templating.
pub mod exec;
/// Retry policy parameters and delay schedule.
pub mod policy;
/// Retry executor and sleep abstraction.
pub mod retry;
/// Best-effort rollback coordination.
pub mod rollback;

pub use exec::{render_template, CommandOutput, ExecError, ShellCommand};
pub use policy::{Backoff, RetryPolicy};
pub use retry::{RecordingSleeper, RetryError, RetryExecutor, RetryFailure, Sleeper, ThreadSleeper};
pub use rollback::{
    compensation_retry, RollbackCoordinator, RollbackFailure, RollbackReport, COMPENSATION_ATTEMPTS,
};

/// Tracing target used for `SUCCESS`-level lines.
///
/// The log formatter renders events on this target with a `SUCCESS` level tag.
pub const SUCCESS_TARGET: &str = "ledeploy::success";

/// Emit an info event on the [`SUCCESS_TARGET`] target.
#[macro_export]
macro_rules! success {
    ($($arg:tt)+) => {
        ::tracing::info!(target: $crate::SUCCESS_TARGET, $($arg)+)
    };
}
