// Error Handling and Recovery
//
// *La Gestion des Erreurs* (The Error Management) - Deployment error taxonomy
// and the fatal report shown to the operator

use std::fmt;
use std::path::{Path, PathBuf};

use leartefact::ArtifactError;
use lephase::SequenceError;
use lereconcile::ReconcileError;
use lereprise::RollbackReport;
use lesecret::SecretError;
use thiserror::Error;

use crate::config::ConfigError;

/// Result type for LeDeploy operations
pub type Result<T> = std::result::Result<T, DeployError>;

/// Failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or API blip that outlived its retries
    Transient,
    /// Content failed verification; never trusted
    Integrity,
    /// Required value absent or settings invalid
    Configuration,
    /// A phase or creation step failed after its retries
    Phase,
    /// Local filesystem or terminal failure
    Io,
}

impl ErrorKind {
    /// Process exit code for this class.
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Configuration => 2,
            ErrorKind::Integrity => 3,
            ErrorKind::Phase => 4,
            ErrorKind::Transient => 5,
            ErrorKind::Io => 6,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Phase => "phase",
            ErrorKind::Io => "i/o",
        };
        f.write_str(label)
    }
}

/// LeDeploy error types
#[derive(Debug, Error)]
pub enum DeployError {
    /// Retries exhausted on a transient failure
    #[error("{step}: gave up after repeated transient failures")]
    Transient {
        /// Step that failed
        step: String,
        /// Underlying error
        #[source]
        source: anyhow::Error,
    },

    /// Checksum mismatch or unsafe archive
    #[error("{step}: integrity check failed")]
    Integrity {
        /// Step that failed
        step: String,
        /// Underlying error
        #[source]
        source: anyhow::Error,
    },

    /// Missing secret or invalid settings
    #[error("{step}: configuration error")]
    Configuration {
        /// Step that failed
        step: String,
        /// Underlying error
        #[source]
        source: anyhow::Error,
    },

    /// Phase or creation step failed; rollback fully restored the prior state
    #[error("{step}: failed")]
    Phase {
        /// Step that failed
        step: String,
        /// Underlying error
        #[source]
        source: anyhow::Error,
        /// Compensation outcome
        rollback: RollbackReport,
    },

    /// Phase or creation step failed and rollback left state behind
    #[error("{step}: failed; {}", .rollback.summary())]
    Rollback {
        /// Step that failed
        step: String,
        /// Underlying error
        #[source]
        source: anyhow::Error,
        /// Compensation outcome
        rollback: RollbackReport,
    },

    /// I/O errors with context
    #[error("{step}: I/O error{}", .path.as_deref().map(|p| format!(" on {}", p.display())).unwrap_or_default())]
    Io {
        /// Step that failed
        step: String,
        /// Path involved
        path: Option<PathBuf>,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl DeployError {
    /// Failure class.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployError::Transient { .. } => ErrorKind::Transient,
            DeployError::Integrity { .. } => ErrorKind::Integrity,
            DeployError::Configuration { .. } => ErrorKind::Configuration,
            DeployError::Phase { .. } | DeployError::Rollback { .. } => ErrorKind::Phase,
            DeployError::Io { .. } => ErrorKind::Io,
        }
    }

    /// Phase, resource or preparation step that failed.
    pub fn step(&self) -> &str {
        match self {
            DeployError::Transient { step, .. }
            | DeployError::Integrity { step, .. }
            | DeployError::Configuration { step, .. }
            | DeployError::Phase { step, .. }
            | DeployError::Rollback { step, .. }
            | DeployError::Io { step, .. } => step,
        }
    }

    /// Rollback outcome, when compensation ran.
    pub fn rollback(&self) -> Option<&RollbackReport> {
        match self {
            DeployError::Phase { rollback, .. } | DeployError::Rollback { rollback, .. } => {
                Some(rollback)
            }
            _ => None,
        }
    }

    /// Check if re-running the same command can succeed without operator changes
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DeployError::Transient { .. } | DeployError::Phase { .. })
    }

    /// True when an operator has to clean up by hand.
    pub fn requires_manual_intervention(&self) -> bool {
        matches!(self, DeployError::Rollback { .. })
    }

    /// Get user-friendly suggestion for recovery
    pub fn suggestion(&self) -> Option<String> {
        match self {
            DeployError::Transient { .. } => Some(
                "The remote service kept failing. Re-run the same command; completed work is skipped."
                    .to_string(),
            ),
            DeployError::Integrity { .. } => Some(
                "Verify the expected checksum and the bundle in object storage. Nothing from the bundle was executed."
                    .to_string(),
            ),
            DeployError::Configuration { .. } => Some(
                "Fix the configuration file or provide the missing value (secret store, environment, --secret NAME=VALUE)."
                    .to_string(),
            ),
            DeployError::Phase { step, .. } => Some(format!(
                "Fix the cause and re-run; `{step}` will be retried from a clean state."
            )),
            DeployError::Rollback { .. } => Some(
                "Manual intervention required: inspect the resources listed above before re-running."
                    .to_string(),
            ),
            DeployError::Io { .. } => None,
        }
    }

    pub(crate) fn configuration(step: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        DeployError::Configuration {
            step: step.into(),
            source: source.into(),
        }
    }

    pub(crate) fn io(step: impl Into<String>, path: Option<&Path>, source: std::io::Error) -> Self {
        DeployError::Io {
            step: step.into(),
            path: path.map(Path::to_path_buf),
            source,
        }
    }

    fn failed(step: String, source: anyhow::Error, rollback: RollbackReport) -> Self {
        if rollback.requires_manual_intervention() {
            DeployError::Rollback {
                step,
                source,
                rollback,
            }
        } else {
            DeployError::Phase {
                step,
                source,
                rollback,
            }
        }
    }

    /// Classify a preparation error by the crate error found in its chain.
    fn preparation(source: anyhow::Error) -> Self {
        let artifact = source
            .chain()
            .find_map(|cause| cause.downcast_ref::<ArtifactError>())
            .map(|err| (err.is_integrity(), err.is_transient()));
        if let Some((integrity, transient)) = artifact {
            let step = "artifact bundle".to_string();
            return if integrity {
                DeployError::Integrity { step, source }
            } else if transient {
                DeployError::Transient { step, source }
            } else {
                DeployError::Configuration { step, source }
            };
        }

        let secret_transient = source
            .chain()
            .find_map(|cause| cause.downcast_ref::<SecretError>())
            .map(SecretError::is_transient);
        match secret_transient {
            Some(true) => DeployError::Transient {
                step: "secrets".to_string(),
                source,
            },
            Some(false) => DeployError::Configuration {
                step: "secrets".to_string(),
                source,
            },
            None => DeployError::Transient {
                step: "preparation".to_string(),
                source,
            },
        }
    }
}

impl From<ConfigError> for DeployError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Read { path, source } => DeployError::io("configuration", Some(path.as_path()), source),
            other => DeployError::configuration("configuration", other),
        }
    }
}

impl From<SecretError> for DeployError {
    fn from(err: SecretError) -> Self {
        match err {
            SecretError::Io { path, source } => DeployError::io("secrets", Some(path.as_path()), source),
            other => DeployError::configuration("secrets", other),
        }
    }
}

impl From<ArtifactError> for DeployError {
    fn from(err: ArtifactError) -> Self {
        DeployError::preparation(anyhow::Error::new(err))
    }
}

impl From<SequenceError> for DeployError {
    fn from(err: SequenceError) -> Self {
        match err {
            SequenceError::Preparation(source) => DeployError::preparation(source),
            SequenceError::Marker { path, source } => DeployError::io("markers", Some(path.as_path()), source),
            err @ SequenceError::PhaseFailed { .. } => {
                let step = err.phase().unwrap_or("phase").to_string();
                let rollback = err.rollback().cloned().unwrap_or_default();
                DeployError::failed(step, anyhow::Error::new(err), rollback)
            }
            other => {
                let step = other.phase().unwrap_or("phases").to_string();
                DeployError::configuration(step, other)
            }
        }
    }
}

impl From<ReconcileError> for DeployError {
    fn from(err: ReconcileError) -> Self {
        let step = err.resource().unwrap_or("deploy").to_string();
        match err {
            ReconcileError::Prompt(source) => DeployError::io("confirmation prompt", None, source),
            err @ ReconcileError::ExistenceUnknown { .. } => DeployError::Transient {
                step,
                source: anyhow::Error::new(err),
            },
            err @ ReconcileError::CreateFailed { .. } => {
                let rollback = err.rollback().cloned().unwrap_or_default();
                DeployError::failed(step, anyhow::Error::new(err), rollback)
            }
            other => DeployError::configuration(step, other),
        }
    }
}

/// Format a fatal error for the operator: failed step, error chain, log file.
pub fn format_error(error: &DeployError, log_file: Option<&Path>) -> String {
    let mut message = format!("Error: {error}");

    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(&format!("\n  caused by: {cause}"));
        source = cause.source();
    }

    message.push_str(&format!("\n\nFailed step: {} ({})", error.step(), error.kind()));

    if let Some(rollback) = error.rollback() {
        message.push_str(&format!("\nRollback: {}", rollback.summary()));
    }

    if let Some(suggestion) = error.suggestion() {
        message.push_str(&format!("\n\nSuggestion: {suggestion}"));
    }

    match log_file {
        Some(path) => message.push_str(&format!("\n\nFull log: {}", path.display())),
        None => message.push_str("\n\nFull log: unavailable (durable log file could not be opened)"),
    }

    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use lereprise::RollbackFailure;

    fn phase_failure(rollback: RollbackReport) -> SequenceError {
        SequenceError::PhaseFailed {
            phase: "tls".to_string(),
            attempts: 5,
            source: anyhow::anyhow!("certbot exited with status 1"),
            rollback,
            completed: vec!["swap".to_string(), "nginx".to_string()],
        }
    }

    #[test]
    fn test_missing_secret_is_configuration() {
        let err: DeployError = SecretError::NotFound {
            name: "cf-token".into(),
            attempted: vec!["secret manager `cf-token`".into()],
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.step(), "secrets");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_checksum_mismatch_in_preparation_is_integrity() {
        let inner = ArtifactError::Integrity {
            remote: "gs://b/bundle.tar.gz".into(),
            expected: "blake3:aa".into(),
            actual: "blake3:bb".into(),
            attempts: 5,
        };
        let err: DeployError =
            SequenceError::Preparation(anyhow::Error::new(inner).context("fetching bundle")).into();
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert_eq!(err.kind().exit_code(), 3);
        assert_eq!(err.step(), "artifact bundle");
    }

    #[test]
    fn test_phase_failure_with_clean_rollback_is_recoverable() {
        let err: DeployError = phase_failure(RollbackReport {
            reverted: vec!["tls".into()],
            ..RollbackReport::default()
        })
        .into();
        assert!(matches!(err, DeployError::Phase { .. }));
        assert_eq!(err.step(), "tls");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_incomplete_rollback_requires_manual_intervention() {
        let err: DeployError = phase_failure(RollbackReport {
            failed: vec![RollbackFailure {
                step: "nginx".into(),
                error: "systemctl failed".into(),
            }],
            ..RollbackReport::default()
        })
        .into();
        assert!(err.requires_manual_intervention());
        assert_eq!(err.kind(), ErrorKind::Phase);
        assert!(err.to_string().contains("manual intervention required"));
    }

    #[test]
    fn test_format_error_names_step_chain_and_log() {
        let err: DeployError = phase_failure(RollbackReport::default()).into();
        let text = format_error(&err, Some(Path::new("/var/log/ledeploy.log")));
        assert!(text.contains("Failed step: tls (phase)"));
        assert!(text.contains("caused by: phase `tls` failed after 5 attempt(s)"));
        assert!(text.contains("certbot exited with status 1"));
        assert!(text.contains("Full log: /var/log/ledeploy.log"));
    }

    #[test]
    fn test_declined_plan_is_configuration() {
        let err: DeployError = ReconcileError::Declined.into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.step(), "deploy");
    }
}
