//! lesecret - Secret Resolution
//!
//! *Le Secret* (The Secret) - resolves named configuration values through an
//! ordered fallback chain and materializes them for child processes.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

/// Key-value fallback file parser.
pub mod kv;
/// Restricted-permission materialization of resolved secrets.
pub mod materialize;
/// Ordered fallback resolver.
pub mod resolver;
/// Remote secret store backends.
pub mod store;
/// Redacting secret value wrapper.
pub mod value;

use std::path::PathBuf;
use thiserror::Error;

pub use kv::KeyValueFile;
pub use materialize::{materialize, MaterializedSecret, MaterializedSecrets};
pub use resolver::{EnvSource, Resolved, SecretRequirement, SecretResolver, SecretSource};
pub use store::{CommandSecretStore, NoSecretStore, SecretStore, StaticSecretStore, StoreError};
pub use value::SecretValue;

/// Errors that can occur while resolving or materializing secrets
#[derive(Debug, Error)]
pub enum SecretError {
    /// Every source in the chain came up empty
    #[error("required secret `{name}` not found (tried: {})", .attempted.join(", "))]
    NotFound {
        /// Secret name
        name: String,
        /// Sources consulted, in order
        attempted: Vec<String>,
    },

    /// Name unusable as a file name
    #[error("invalid secret name `{0}`")]
    InvalidName(String),

    /// Malformed fallback file
    #[error("failed to parse {}:{line}: {message}", .path.display())]
    Parse {
        /// File being parsed
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// What was wrong
        message: String,
    },

    /// Filesystem failure
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl SecretError {
    /// Only filesystem failures are worth retrying; a missing value stays missing.
    pub fn is_transient(&self) -> bool {
        matches!(self, SecretError::Io { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SecretError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for secret operations
pub type Result<T> = std::result::Result<T, SecretError>;
