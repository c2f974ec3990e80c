//! Completion and failure markers
//!
//! A marker is a bare fact keyed by phase name. The file-backed store maps
//! each fact onto the existence of `<dir>/<namespace>-<phase>-complete` or
//! `<dir>/<namespace>-<phase>-failed`; the global marker is
//! `<dir>/<namespace>-complete`.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Result, SequenceError};

/// Durable state of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerState {
    /// No marker.
    Pending,
    /// Completion marker present.
    Completed,
    /// Failure marker present (wins over a stale completion marker).
    Failed,
}

impl std::fmt::Display for MarkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MarkerState::Pending => "pending",
            MarkerState::Completed => "completed",
            MarkerState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Storage for phase markers. Only the sequencer writes through it.
pub trait MarkerStore {
    /// Current state of `phase`.
    fn state(&self, phase: &str) -> Result<MarkerState>;

    /// Record successful completion, dropping any failure marker.
    fn mark_completed(&mut self, phase: &str) -> Result<()>;

    /// Record a failed attempt.
    fn mark_failed(&mut self, phase: &str) -> Result<()>;

    /// Remove both markers of `phase`.
    fn clear(&mut self, phase: &str) -> Result<()>;

    /// True when the whole sequence finished before.
    fn is_globally_complete(&self) -> Result<bool>;

    /// Record that every phase finished.
    fn mark_globally_complete(&mut self) -> Result<()>;

    /// Remove the global marker.
    fn clear_global(&mut self) -> Result<()>;
}

/// Marker files under a directory such as `/var/lib`.
#[derive(Debug, Clone)]
pub struct FileMarkerStore {
    dir: PathBuf,
    namespace: String,
}

impl FileMarkerStore {
    /// Store writing `<dir>/<namespace>-...` files.
    pub fn new(dir: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            namespace: namespace.into(),
        }
    }

    /// Marker directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the completion marker for `phase`.
    pub fn completion_path(&self, phase: &str) -> PathBuf {
        self.dir
            .join(format!("{}-{}-complete", self.namespace, phase))
    }

    /// Path of the failure marker for `phase`.
    pub fn failure_path(&self, phase: &str) -> PathBuf {
        self.dir.join(format!("{}-{}-failed", self.namespace, phase))
    }

    /// Path of the global completion marker.
    pub fn global_path(&self) -> PathBuf {
        self.dir.join(format!("{}-complete", self.namespace))
    }

    fn touch(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|err| SequenceError::marker(&self.dir, err))?;
        let stamp = chrono::Utc::now().to_rfc3339();
        fs::write(path, format!("{stamp}\n")).map_err(|err| SequenceError::marker(path, err))
    }

    fn remove(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SequenceError::marker(path, err)),
        }
    }

    fn exists(path: &Path) -> Result<bool> {
        match fs::symlink_metadata(path) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(SequenceError::marker(path, err)),
        }
    }
}

impl MarkerStore for FileMarkerStore {
    fn state(&self, phase: &str) -> Result<MarkerState> {
        if Self::exists(&self.failure_path(phase))? {
            Ok(MarkerState::Failed)
        } else if Self::exists(&self.completion_path(phase))? {
            Ok(MarkerState::Completed)
        } else {
            Ok(MarkerState::Pending)
        }
    }

    fn mark_completed(&mut self, phase: &str) -> Result<()> {
        self.touch(&self.completion_path(phase))?;
        Self::remove(&self.failure_path(phase))
    }

    fn mark_failed(&mut self, phase: &str) -> Result<()> {
        self.touch(&self.failure_path(phase))
    }

    fn clear(&mut self, phase: &str) -> Result<()> {
        Self::remove(&self.failure_path(phase))?;
        Self::remove(&self.completion_path(phase))
    }

    fn is_globally_complete(&self) -> Result<bool> {
        Self::exists(&self.global_path())
    }

    fn mark_globally_complete(&mut self) -> Result<()> {
        self.touch(&self.global_path())
    }

    fn clear_global(&mut self) -> Result<()> {
        Self::remove(&self.global_path())
    }
}

/// In-memory markers, for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryMarkerStore {
    phases: BTreeMap<String, MarkerState>,
    global: bool,
}

impl MemoryMarkerStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `state` for `phase`.
    pub fn with(mut self, phase: impl Into<String>, state: MarkerState) -> Self {
        self.phases.insert(phase.into(), state);
        self
    }
}

impl MarkerStore for MemoryMarkerStore {
    fn state(&self, phase: &str) -> Result<MarkerState> {
        Ok(self
            .phases
            .get(phase)
            .copied()
            .unwrap_or(MarkerState::Pending))
    }

    fn mark_completed(&mut self, phase: &str) -> Result<()> {
        self.phases.insert(phase.to_string(), MarkerState::Completed);
        Ok(())
    }

    fn mark_failed(&mut self, phase: &str) -> Result<()> {
        self.phases.insert(phase.to_string(), MarkerState::Failed);
        Ok(())
    }

    fn clear(&mut self, phase: &str) -> Result<()> {
        self.phases.remove(phase);
        Ok(())
    }

    fn is_globally_complete(&self) -> Result<bool> {
        Ok(self.global)
    }

    fn mark_globally_complete(&mut self) -> Result<()> {
        self.global = true;
        Ok(())
    }

    fn clear_global(&mut self) -> Result<()> {
        self.global = false;
        Ok(())
    }
}
