#![warn(missing_docs)]
#![warn(unused_extern_crates)]

//! lephase - Resumable phase sequencing for host provisioning.
//!
//! *La Phase* (The Phase) - runs a fixed, ordered list of idempotent phases,
//! recording completion and failure markers so that a re-run after a crash or
//! reboot skips finished work and resumes where the previous run stopped.

/// Durable completion/failure markers.
pub mod markers;
/// Sequencer, phase model and run lifecycle.
pub mod orchestrate;
/// Phases backed by bundle scripts.
pub mod script;

use std::path::PathBuf;
use thiserror::Error;

use lereprise::RollbackReport;

pub use markers::{FileMarkerStore, MarkerState, MarkerStore, MemoryMarkerStore};
pub use orchestrate::{
    FnAction, Phase, PhaseAction, PhaseContext, PhaseEnvironment, PhaseSequencer, PhaseStatus,
    Preparation, RunRecord, RunStatus, SequenceReport, StatusReport,
};
pub use script::ScriptPhase;

/// Errors raised by the phase sequencer
#[derive(Debug, Error)]
pub enum SequenceError {
    /// Phase name unusable as a marker key
    #[error("invalid phase name `{0}`")]
    InvalidPhase(String),

    /// Two phases share a name
    #[error("phase `{0}` is declared more than once")]
    DuplicatePhase(String),

    /// Reset or lookup of an undeclared phase
    #[error("unknown phase `{0}`")]
    UnknownPhase(String),

    /// Secret or bundle preparation failed before any phase ran
    #[error("preparation failed")]
    Preparation(#[source] anyhow::Error),

    /// A phase requires a secret that was not materialized
    #[error("phase `{phase}` requires secret `{secret}`, which is not configured")]
    MissingRequirement {
        /// Phase name
        phase: String,
        /// Secret name
        secret: String,
    },

    /// A phase failed after exhausting its retries
    #[error("phase `{phase}` failed after {attempts} attempt(s)")]
    PhaseFailed {
        /// Phase name
        phase: String,
        /// Attempts made
        attempts: u32,
        /// Error from the last attempt
        #[source]
        source: anyhow::Error,
        /// Outcome of the compensation pass
        rollback: RollbackReport,
        /// Phases completed before the failure in this invocation
        completed: Vec<String>,
    },

    /// Marker storage failed
    #[error("marker I/O error on {}: {source}", .path.display())]
    Marker {
        /// Marker path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl SequenceError {
    /// Name of the phase the error belongs to, if any.
    pub fn phase(&self) -> Option<&str> {
        match self {
            SequenceError::MissingRequirement { phase, .. }
            | SequenceError::PhaseFailed { phase, .. } => Some(phase),
            SequenceError::UnknownPhase(phase)
            | SequenceError::InvalidPhase(phase)
            | SequenceError::DuplicatePhase(phase) => Some(phase),
            _ => None,
        }
    }

    /// Rollback outcome for phase failures.
    pub fn rollback(&self) -> Option<&RollbackReport> {
        match self {
            SequenceError::PhaseFailed { rollback, .. } => Some(rollback),
            _ => None,
        }
    }

    pub(crate) fn marker(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SequenceError::Marker {
            path: path.into(),
            source,
        }
    }
}

/// Result type for sequencing operations
pub type Result<T> = std::result::Result<T, SequenceError>;
