use anyhow::{bail, Result};
use thiserror::Error;

/// A creation call found the resource already present.
///
/// Resources return this from [`Resource::create`]; the reconciler treats
/// it as a skip, not a failure.
#[derive(Debug, Clone, Error)]
#[error("`{0}` already exists")]
pub struct AlreadyExists(pub String);

/// True when `err` reports a resource conflict.
pub fn is_conflict(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<AlreadyExists>().is_some())
}

/// A named cloud resource with an existence check and a creation call.
pub trait Resource {
    /// Unique name.
    fn name(&self) -> &str;

    /// Resource kind for display (`bucket`, `service-account`, ...).
    fn kind(&self) -> &str {
        "resource"
    }

    /// Whether the resource exists. An error means "unknown".
    fn exists(&self) -> Result<bool>;

    /// Create the resource. Must be safe to call again after a failed attempt.
    fn create(&self) -> Result<()>;

    /// True when [`delete`](Self::delete) can undo a creation.
    fn is_deletable(&self) -> bool {
        false
    }

    /// Delete the resource during rollback.
    fn delete(&self) -> Result<()> {
        bail!("`{}` cannot be deleted automatically", self.name())
    }
}
