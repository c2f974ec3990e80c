//! leartefact - Artifact Bundle Retrieval
//!
//! *L'Artefact* (The Artifact) - downloads the phase tooling bundle from
//! object storage, verifies its content hash, and extracts it for execution.
//!
//! A bundle is only ever extracted after its checksum matched. A mismatch that
//! survives every retry is an integrity failure and aborts the run.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

/// Content checksums (BLAKE3 and SHA-256).
pub mod checksum;
/// Safe tarball extraction.
pub mod extract;
/// Cached, retried, verified fetch.
pub mod fetch;
/// Object storage backends.
pub mod store;

use std::path::PathBuf;
use thiserror::Error;

pub use checksum::{Checksum, ChecksumAlgorithm};
pub use extract::{extract_bundle, ExtractSummary};
pub use fetch::{download_policy, ArtifactFetcher, ExtractedBundle, DOWNLOAD_BASE_DELAY};
pub use store::{select_store, CommandObjectStore, HttpObjectStore, LocalObjectStore, ObjectStore};

/// Errors that can occur while fetching or unpacking a bundle
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Expected checksum string could not be parsed
    #[error("invalid checksum `{0}`: expected [blake3:|sha256:]<hex digest>")]
    InvalidChecksum(String),

    /// A single transfer attempt failed
    #[error("transfer of {remote} failed: {reason}")]
    Transfer {
        /// Remote bundle path
        remote: String,
        /// What went wrong
        reason: String,
    },

    /// Every download attempt failed in transport
    #[error("download of {remote} failed after {attempts} attempt(s): {reason}")]
    DownloadExhausted {
        /// Remote bundle path
        remote: String,
        /// Attempts made
        attempts: u32,
        /// Last transport error
        reason: String,
    },

    /// Downloaded bytes never matched the expected hash
    #[error(
        "checksum mismatch for {remote} after {attempts} attempt(s): expected {expected}, got {actual}"
    )]
    Integrity {
        /// Remote bundle path
        remote: String,
        /// Expected checksum
        expected: String,
        /// Checksum of the last download
        actual: String,
        /// Attempts made
        attempts: u32,
    },

    /// Archive entry would escape the extraction directory
    #[error("refusing unsafe archive entry `{0}`")]
    UnsafeEntry(String),

    /// Archive is not a readable gzip tarball
    #[error("malformed archive {}: {source}", .path.display())]
    Archive {
        /// Archive path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
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

impl ArtifactError {
    /// Transport-level failures that another invocation may fix.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ArtifactError::Transfer { .. } | ArtifactError::DownloadExhausted { .. }
        )
    }

    /// Content that must never be trusted or executed.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            ArtifactError::Integrity { .. }
                | ArtifactError::UnsafeEntry(_)
                | ArtifactError::Archive { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArtifactError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn transfer(remote: &str, reason: impl ToString) -> Self {
        ArtifactError::Transfer {
            remote: remote.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for artifact operations
pub type Result<T> = std::result::Result<T, ArtifactError>;
