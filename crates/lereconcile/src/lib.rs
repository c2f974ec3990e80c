//! lereconcile - Resource Reconciliation
//!
//! *La Réconciliation* (The Reconciliation) - classifies declared cloud
//! resources as existing or missing, shows the plan, and creates only the
//! delta once the operator agrees.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

/// Templated resources driven by a cloud CLI.
pub mod command;
/// Operator confirmation.
pub mod confirm;
/// Reconciliation plan model and rendering.
pub mod plan;
/// Plan computation and execution.
pub mod reconciler;
/// Resource abstraction.
pub mod resource;

use thiserror::Error;

use lereprise::RollbackReport;

pub use command::{CommandResource, ResourceDefinition};
pub use confirm::{AutoApprove, Confirm, PromptConfirm};
pub use plan::{PlanAction, PlanEntry, ReconcilePlan};
pub use reconciler::{ApplyReport, Reconciler};
pub use resource::{is_conflict, AlreadyExists, Resource};

/// Errors raised while reconciling resources
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Existence could not be determined; never assumed either way
    #[error("could not determine whether `{name}` exists after {attempts} attempt(s)")]
    ExistenceUnknown {
        /// Resource name
        name: String,
        /// Attempts made
        attempts: u32,
        /// Error from the last check
        #[source]
        source: anyhow::Error,
    },

    /// A creation step failed after retries
    #[error("creating `{name}` failed after {attempts} attempt(s)")]
    CreateFailed {
        /// Resource name
        name: String,
        /// Attempts made
        attempts: u32,
        /// Error from the last attempt
        #[source]
        source: anyhow::Error,
        /// Outcome of deleting resources created earlier in the run
        rollback: RollbackReport,
    },

    /// Two declared resources share a name
    #[error("duplicate resource name: {0}")]
    DuplicateResource(String),

    /// Operator declined the plan
    #[error("plan declined by operator")]
    Declined,

    /// Confirmation prompt could not be shown or read
    #[error("confirmation prompt failed: {0}")]
    Prompt(#[from] std::io::Error),
}

impl ReconcileError {
    /// Resource the error belongs to, if any.
    pub fn resource(&self) -> Option<&str> {
        match self {
            ReconcileError::ExistenceUnknown { name, .. }
            | ReconcileError::CreateFailed { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Rollback outcome for creation failures.
    pub fn rollback(&self) -> Option<&RollbackReport> {
        match self {
            ReconcileError::CreateFailed { rollback, .. } => Some(rollback),
            _ => None,
        }
    }
}

/// Result type for reconciliation
pub type Result<T> = std::result::Result<T, ReconcileError>;
