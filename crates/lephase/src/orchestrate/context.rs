use std::collections::BTreeMap;
use std::path::PathBuf;

use lesecret::MaterializedSecrets;

/// `PATH` handed to phases when the orchestrator itself has none.
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Environment variable naming the extracted bundle directory.
pub const BUNDLE_DIR_VAR: &str = "LEDEPLOY_BUNDLE_DIR";
/// Environment variable naming the materialized secrets directory.
pub const SECRETS_DIR_VAR: &str = "LEDEPLOY_SECRETS_DIR";
/// Environment variable naming the running phase.
pub const PHASE_VAR: &str = "LEDEPLOY_PHASE";

/// What preparation produced: the bundle, the secrets, and the base environment.
#[derive(Debug, Clone, Default)]
pub struct PhaseEnvironment {
    /// Extracted bundle directory.
    pub bundle_dir: Option<PathBuf>,
    /// Materialized secrets.
    pub secrets: MaterializedSecrets,
    /// Variables every phase receives (`PATH`, `HOME`).
    pub base: BTreeMap<String, String>,
}

impl PhaseEnvironment {
    /// Environment carrying only `PATH` and `HOME` from the current process.
    pub fn inherit_basics() -> Self {
        let mut base = BTreeMap::new();
        base.insert(
            "PATH".to_string(),
            std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string()),
        );
        if let Ok(home) = std::env::var("HOME") {
            base.insert("HOME".to_string(), home);
        }
        Self {
            base,
            ..Self::default()
        }
    }

    /// Attach the extracted bundle.
    pub fn with_bundle(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bundle_dir = Some(dir.into());
        self
    }

    /// Attach the materialized secrets.
    pub fn with_secrets(mut self, secrets: MaterializedSecrets) -> Self {
        self.secrets = secrets;
        self
    }
}

/// Per-phase view handed to a [`PhaseAction`](super::PhaseAction).
///
/// `env` is the complete, isolated environment of the phase: the base
/// variables, the bundle/secrets locations, and only the secrets the phase
/// declared.
#[derive(Debug, Clone)]
pub struct PhaseContext {
    /// Phase name.
    pub phase: String,
    /// Extracted bundle directory.
    pub bundle_dir: Option<PathBuf>,
    /// Isolated environment.
    pub env: BTreeMap<String, String>,
}

impl PhaseContext {
    /// Context with nothing but the phase name, for phases that need no inputs.
    pub fn bare(phase: impl Into<String>) -> Self {
        let phase = phase.into();
        let env = BTreeMap::from([(PHASE_VAR.to_string(), phase.clone())]);
        Self {
            phase,
            bundle_dir: None,
            env,
        }
    }

    /// Build the context of `phase` from the prepared environment.
    ///
    /// Fails with the first required secret that was not materialized.
    pub(crate) fn build(
        phase: &str,
        requires: &[String],
        prepared: &PhaseEnvironment,
    ) -> std::result::Result<Self, String> {
        let mut env = prepared.base.clone();
        env.insert(PHASE_VAR.to_string(), phase.to_string());
        if let Some(dir) = &prepared.bundle_dir {
            env.insert(BUNDLE_DIR_VAR.to_string(), dir.display().to_string());
        }
        if !prepared.secrets.is_empty() {
            env.insert(
                SECRETS_DIR_VAR.to_string(),
                prepared.secrets.dir.display().to_string(),
            );
        }
        env.extend(prepared.secrets.env_for(requires)?);

        Ok(Self {
            phase: phase.to_string(),
            bundle_dir: prepared.bundle_dir.clone(),
            env,
        })
    }
}
