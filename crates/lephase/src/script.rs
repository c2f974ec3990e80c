//! Phases backed by scripts from the extracted bundle.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use lereprise::{ExecError, ShellCommand};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::orchestrate::{PhaseAction, PhaseContext};

/// Script-driven phase: `script` applies, `check` tests, `rollback` reverts.
///
/// Paths are relative to the bundle directory. Every script runs with the
/// phase's isolated environment and the bundle directory as working directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptPhase {
    /// Apply script.
    pub script: PathBuf,
    /// Extra arguments for the apply script.
    #[serde(default)]
    pub args: Vec<String>,
    /// Idempotency predicate; exit 0 means "already applied".
    #[serde(default)]
    pub check: Option<PathBuf>,
    /// Compensation script.
    #[serde(default)]
    pub rollback: Option<PathBuf>,
}

impl ScriptPhase {
    /// Phase running `script`.
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            ..Self::default()
        }
    }

    fn command(&self, script: &Path, ctx: &PhaseContext) -> Result<ShellCommand> {
        let Some(bundle) = ctx.bundle_dir.as_deref() else {
            bail!("phase `{}` needs the artifact bundle, but none was prepared", ctx.phase);
        };
        if script.is_absolute()
            || script
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            bail!("script `{}` must stay inside the bundle", script.display());
        }

        let path = bundle.join(script);
        if !path.is_file() {
            bail!("script `{}` not found in bundle", script.display());
        }

        Ok(ShellCommand::new(path.display().to_string())
            .env_clear()
            .envs(ctx.env.clone())
            .current_dir(bundle))
    }
}

impl PhaseAction for ScriptPhase {
    fn apply(&self, ctx: &PhaseContext) -> Result<()> {
        let command = self.command(&self.script, ctx)?.args(self.args.clone());
        debug!(phase = %ctx.phase, command = %command.describe(), "running phase script");
        command
            .run()
            .with_context(|| format!("phase `{}` script failed", ctx.phase))?;
        Ok(())
    }

    fn is_applied(&self, ctx: &PhaseContext) -> Result<bool> {
        let Some(check) = &self.check else {
            return Ok(false);
        };
        match self.command(check, ctx)?.run() {
            Ok(_) => Ok(true),
            Err(ExecError::Failed { .. }) => Ok(false),
            Err(err) => Err(err).context("idempotency check could not run"),
        }
    }

    fn is_reversible(&self) -> bool {
        self.rollback.is_some()
    }

    fn rollback(&self, ctx: &PhaseContext) -> Result<()> {
        let Some(script) = &self.rollback else {
            bail!("phase `{}` has no rollback script", ctx.phase);
        };
        self.command(script, ctx)?
            .run()
            .with_context(|| format!("rollback of phase `{}` failed", ctx.phase))?;
        Ok(())
    }
}
