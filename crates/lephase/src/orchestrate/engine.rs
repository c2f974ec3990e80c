use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::Utc;
use lereprise::{compensation_retry, success, RetryExecutor, RollbackCoordinator, RollbackReport};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::markers::{MarkerState, MarkerStore};
use crate::{Result, SequenceError};

use super::{
    context::{PhaseContext, PhaseEnvironment},
    model::{is_valid_name, Phase},
    state::{RunRecord, RunStatus},
};

/// Produces the phase environment: secrets and the tooling bundle.
///
/// Runs after the global-marker check and before the first phase. Any error
/// aborts the sequence before a phase runs.
pub trait Preparation {
    /// Resolve secrets, fetch the bundle, and describe the result.
    fn prepare(&mut self) -> anyhow::Result<PhaseEnvironment>;
}

impl<F> Preparation for F
where
    F: FnMut() -> anyhow::Result<PhaseEnvironment>,
{
    fn prepare(&mut self) -> anyhow::Result<PhaseEnvironment> {
        self()
    }
}

/// Output of a successful sequencer run.
#[derive(Debug, Clone, Serialize)]
pub struct SequenceReport {
    /// Final lifecycle state.
    pub status: RunStatus,
    /// Phases applied by this run, in order.
    pub completed: Vec<String>,
    /// Phases skipped because a marker or the idempotency predicate said so.
    pub skipped: Vec<String>,
    /// True when the global marker short-circuited the whole run.
    pub already_complete: bool,
}

/// Marker state of one declared phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseStatus {
    /// Phase name.
    pub name: String,
    /// Marker state.
    pub state: MarkerState,
    /// Whether a compensation exists.
    pub reversible: bool,
    /// Declared secrets.
    pub requires: Vec<String>,
}

/// Snapshot of every marker, for `status` output.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Global completion marker present.
    pub all_complete: bool,
    /// Per-phase states in declared order.
    pub phases: Vec<PhaseStatus>,
    /// Last persisted run record, if any.
    pub last_run: Option<RunRecord>,
}

/// Executes an ordered list of phases with durable markers.
///
/// Phases run strictly in declared order. A completed phase is skipped on
/// later runs; a failed phase is cleared and re-run from scratch; the first
/// unrecoverable failure rolls back this run's work and stops the chain.
pub struct PhaseSequencer {
    phases: Vec<Phase>,
    markers: Box<dyn MarkerStore>,
    retry: RetryExecutor,
    record_path: Option<PathBuf>,
}

impl PhaseSequencer {
    /// Create a sequencer, rejecting unusable or duplicate phase names.
    pub fn new(
        phases: Vec<Phase>,
        markers: Box<dyn MarkerStore>,
        retry: RetryExecutor,
    ) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for phase in &phases {
            if !is_valid_name(&phase.name) {
                return Err(SequenceError::InvalidPhase(phase.name.clone()));
            }
            if !seen.insert(phase.name.as_str()) {
                return Err(SequenceError::DuplicatePhase(phase.name.clone()));
            }
        }

        Ok(Self {
            phases,
            markers,
            retry,
            record_path: None,
        })
    }

    /// Persist a [`RunRecord`] at `path` after every run.
    pub fn with_run_record(mut self, path: impl Into<PathBuf>) -> Self {
        self.record_path = Some(path.into());
        self
    }

    /// Declared phases, in order.
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Marker storage.
    pub fn markers(&self) -> &dyn MarkerStore {
        self.markers.as_ref()
    }

    /// Run the sequence.
    pub fn run(&mut self, preparation: &mut dyn Preparation) -> Result<SequenceReport> {
        if self.markers.is_globally_complete()? {
            info!("all phases already complete; nothing to do");
            return Ok(SequenceReport {
                status: RunStatus::AllComplete,
                completed: Vec::new(),
                skipped: self.phases.iter().map(|p| p.name.clone()).collect(),
                already_complete: true,
            });
        }

        let mut record = RunRecord {
            status: RunStatus::InProgress,
            ..RunRecord::default()
        };
        let result = self.run_phases(preparation);

        record.finished_at = Some(Utc::now());
        match &result {
            Ok(report) => {
                record.status = report.status;
                record.completed = report.completed.clone();
                record.skipped = report.skipped.clone();
            }
            Err(err) => {
                record.status = RunStatus::Aborted;
                record.failed_phase = err.phase().map(str::to_string);
                record.last_error = Some(error_chain(err));
                record.rollback = err.rollback().cloned();
                if let SequenceError::PhaseFailed { completed, .. } = err {
                    record.completed = completed.clone();
                }
            }
        }
        self.save_record(&record);

        result
    }

    fn run_phases(&mut self, preparation: &mut dyn Preparation) -> Result<SequenceReport> {
        let total = self.phases.len();
        info!(phases = total, "provisioning sequence starting");

        let prepared = preparation.prepare().map_err(SequenceError::Preparation)?;
        let contexts = self
            .phases
            .iter()
            .map(|phase| {
                PhaseContext::build(&phase.name, &phase.requires, &prepared).map_err(|secret| {
                    SequenceError::MissingRequirement {
                        phase: phase.name.clone(),
                        secret,
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut report = SequenceReport {
            status: RunStatus::InProgress,
            completed: Vec::new(),
            skipped: Vec::new(),
            already_complete: false,
        };
        let mut applied = Vec::new();

        for (index, (phase, ctx)) in self.phases.iter().zip(&contexts).enumerate() {
            let step = index + 1;
            let mut forced_clean = false;

            match self.markers.state(&phase.name)? {
                MarkerState::Failed => {
                    warn!(phase = %phase.name, "previous attempt failed; clearing markers for a clean re-run");
                    self.markers.clear(&phase.name)?;
                    forced_clean = true;
                }
                MarkerState::Completed => {
                    info!(phase = %phase.name, step, total, "already complete; skipping");
                    report.skipped.push(phase.name.clone());
                    continue;
                }
                MarkerState::Pending => {}
            }

            if !forced_clean {
                match phase.action().is_applied(ctx) {
                    Ok(true) => {
                        info!(phase = %phase.name, step, total, "already applied; recording completion");
                        self.markers.mark_completed(&phase.name)?;
                        report.skipped.push(phase.name.clone());
                        continue;
                    }
                    Ok(false) => {}
                    Err(err) => warn!(
                        phase = %phase.name,
                        error = %format!("{err:#}"),
                        "idempotency check failed; running phase"
                    ),
                }
            }

            info!(phase = %phase.name, step, total, "phase running");
            let description = format!("phase {}", phase.name);
            match self
                .retry
                .execute(&description, |_| phase.action().apply(ctx))
            {
                Ok(()) => {
                    self.markers.mark_completed(&phase.name)?;
                    success!(phase = %phase.name, step, total, "phase complete");
                    report.completed.push(phase.name.clone());
                    applied.push(index);
                }
                Err(err) => {
                    self.markers.mark_failed(&phase.name)?;
                    error!(
                        phase = %phase.name,
                        step,
                        total,
                        attempts = err.attempts,
                        "phase failed; aborting remaining phases"
                    );
                    let rollback = roll_back(
                        &self.phases,
                        self.markers.as_mut(),
                        &self.retry,
                        &contexts,
                        &applied,
                        index,
                    );
                    return Err(SequenceError::PhaseFailed {
                        phase: phase.name.clone(),
                        attempts: err.attempts,
                        source: err.into_inner(),
                        rollback,
                        completed: report.completed,
                    });
                }
            }
        }

        self.markers.mark_globally_complete()?;
        report.status = RunStatus::AllComplete;
        success!(
            applied = report.completed.len(),
            skipped = report.skipped.len(),
            "all {total} phases complete"
        );
        Ok(report)
    }

    /// Marker state of every phase.
    pub fn status(&self) -> Result<StatusReport> {
        let phases = self
            .phases
            .iter()
            .map(|phase| {
                Ok(PhaseStatus {
                    name: phase.name.clone(),
                    state: self.markers.state(&phase.name)?,
                    reversible: phase.action().is_reversible(),
                    requires: phase.requires.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(StatusReport {
            all_complete: self.markers.is_globally_complete()?,
            phases,
            last_run: self
                .record_path
                .as_deref()
                .and_then(|path| RunRecord::load_from_path(path).ok()),
        })
    }

    /// Clear markers of one phase, or of every phase when `phase` is `None`.
    ///
    /// The global marker is always cleared so the next run re-evaluates.
    pub fn reset(&mut self, phase: Option<&str>) -> Result<Vec<String>> {
        let cleared = match phase {
            Some(name) => {
                if !self.phases.iter().any(|p| p.name == name) {
                    return Err(SequenceError::UnknownPhase(name.to_string()));
                }
                self.markers.clear(name)?;
                vec![name.to_string()]
            }
            None => {
                for phase in &self.phases {
                    self.markers.clear(&phase.name)?;
                }
                self.phases.iter().map(|p| p.name.clone()).collect()
            }
        };
        self.markers.clear_global()?;
        info!(phases = ?cleared, "markers reset");
        Ok(cleared)
    }

    fn save_record(&self, record: &RunRecord) {
        if let Some(path) = &self.record_path {
            if let Err(err) = record.save_to_path(path) {
                warn!(path = %path.display(), error = %err, "could not persist run record");
            }
        }
    }
}

/// Compensate the failed phase and this run's completed phases, newest first.
///
/// Reverted phases lose their completion marker so the next run applies them
/// again; the failed phase keeps its failure marker. Each compensation gets
/// one retry.
fn roll_back(
    phases: &[Phase],
    markers: &mut dyn MarkerStore,
    retry: &RetryExecutor,
    contexts: &[PhaseContext],
    applied: &[usize],
    failed: usize,
) -> RollbackReport {
    let mut coordinator = RollbackCoordinator::new().with_retry(compensation_retry(retry));
    for &index in applied.iter().chain(std::iter::once(&failed)) {
        let phase = &phases[index];
        let ctx = &contexts[index];
        if phase.action().is_reversible() {
            coordinator.record(phase.name.clone(), move || phase.action().rollback(ctx));
        } else {
            coordinator.record_irreversible(phase.name.clone());
        }
    }

    let report = coordinator.unwind();
    for name in &report.reverted {
        if *name == phases[failed].name {
            continue;
        }
        if let Err(err) = markers.clear(name) {
            warn!(phase = %name, error = %err, "could not clear marker of reverted phase");
        }
    }
    report
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
