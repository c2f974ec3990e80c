use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use lereprise::RollbackReport;

/// Global lifecycle of a sequencer invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Nothing ran yet.
    NotStarted,
    /// Phases are being executed.
    InProgress,
    /// Every phase is complete.
    AllComplete,
    /// A phase failed; the remaining chain was not attempted.
    Aborted,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RunStatus::NotStarted => "not started",
            RunStatus::InProgress => "in progress",
            RunStatus::AllComplete => "all complete",
            RunStatus::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

/// Summary of the latest invocation, kept next to the markers for postmortems.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Final status.
    pub status: RunStatus,
    /// When the invocation started.
    pub started_at: DateTime<Utc>,
    /// When it ended.
    pub finished_at: Option<DateTime<Utc>>,
    /// Phases applied by this invocation.
    pub completed: Vec<String>,
    /// Phases skipped (marker or predicate).
    pub skipped: Vec<String>,
    /// Phase that failed, if any.
    pub failed_phase: Option<String>,
    /// Terminal error text.
    pub last_error: Option<String>,
    /// Compensation outcome after a failure.
    pub rollback: Option<RollbackReport>,
}

impl Default for RunRecord {
    fn default() -> Self {
        Self {
            status: RunStatus::NotStarted,
            started_at: Utc::now(),
            finished_at: None,
            completed: Vec::new(),
            skipped: Vec::new(),
            failed_phase: None,
            last_error: None,
            rollback: None,
        }
    }
}

impl RunRecord {
    /// Persist the record as JSON.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Load a record written by [`save_to_path`](Self::save_to_path).
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn record_roundtrip_save_and_load() {
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join("webhost-last-run.json");

        let record = RunRecord {
            status: RunStatus::Aborted,
            completed: vec!["swap".to_string()],
            failed_phase: Some("nginx".to_string()),
            last_error: Some("exit status 1".to_string()),
            rollback: Some(RollbackReport {
                reverted: vec!["swap".to_string()],
                ..RollbackReport::default()
            }),
            ..RunRecord::default()
        };

        record.save_to_path(&file).expect("save record");
        let loaded = RunRecord::load_from_path(&file).expect("load record");

        assert_eq!(loaded.status, RunStatus::Aborted);
        assert_eq!(loaded.failed_phase.as_deref(), Some("nginx"));
        assert_eq!(loaded.completed, vec!["swap"]);
        assert!(loaded.rollback.expect("rollback").is_clean());
    }

    #[test]
    fn loading_missing_record_returns_error() {
        let dir = tempdir().expect("tempdir");
        assert!(RunRecord::load_from_path(&dir.path().join("missing.json")).is_err());
    }
}
