// ledeploy - Core Orchestration
//
// *Le Déploiement* (The Deployment) - Unified API that brings together all
// LeDeploy crates

use std::collections::BTreeMap;
use std::sync::Arc;

use leartefact::{download_policy, select_store, ArtifactError, ArtifactFetcher, Checksum, ExtractedBundle};
use lephase::{
    FileMarkerStore, Phase, PhaseEnvironment, PhaseSequencer, Preparation, SequenceReport,
    StatusReport,
};
use lereconcile::{ApplyReport, CommandResource, Confirm, Reconciler, Resource};
use lereprise::{RetryError, RetryExecutor, Sleeper};
use lesecret::{
    materialize, CommandSecretStore, MaterializedSecrets, NoSecretStore, SecretError,
    SecretResolver, SecretStore,
};
use tracing::{debug, info};

use crate::config::{DeployConfig, DeployTargetConfig};
use crate::errors::{DeployError, Result};

/// LeDeploy - Main orchestration struct
///
/// Owns the configuration, operator-supplied secret values, and the single
/// retry executor every wrapped action shares.
///
/// # Example
///
/// ```ignore
/// let deploy = LeDeploy::new(DeployConfig::load(path)?);
/// let report = deploy.provision()?;
/// ```
pub struct LeDeploy {
    /// Loaded configuration
    config: DeployConfig,

    /// `--secret NAME=VALUE` values
    overrides: BTreeMap<String, String>,

    /// Shared retry executor
    retry: RetryExecutor,
}

/// Resource parameters for one `deploy` invocation
#[derive(Debug, Clone, Default)]
pub struct DeployTarget {
    /// Cloud project; falls back to `[deploy].project`
    pub project: Option<String>,

    /// Region; falls back to `[deploy].region`
    pub region: Option<String>,

    /// Extra `{key}` substitutions
    pub params: BTreeMap<String, String>,
}

impl DeployTarget {
    /// Template variables, command-line values first.
    pub fn variables(&self, defaults: &DeployTargetConfig) -> Result<BTreeMap<String, String>> {
        let mut vars = self.params.clone();

        let project = self.project.clone().or_else(|| defaults.project.clone());
        match project {
            Some(project) => {
                vars.insert("project".to_string(), project);
            }
            None if !defaults.resources.is_empty() => {
                return Err(DeployError::configuration(
                    "deploy",
                    anyhow::anyhow!("no project given; pass --project or set [deploy].project"),
                ));
            }
            None => {}
        }
        if let Some(region) = self.region.clone().or_else(|| defaults.region.clone()) {
            vars.insert("region".to_string(), region);
        }
        Ok(vars)
    }
}

impl LeDeploy {
    /// Create an orchestrator using the configured retry policy.
    pub fn new(config: DeployConfig) -> Self {
        let retry = RetryExecutor::new(config.retry.policy());
        Self {
            config,
            overrides: BTreeMap::new(),
            retry,
        }
    }

    /// Add explicit secret values; they win over every other source.
    pub fn with_secret_overrides<I>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.overrides.extend(values);
        self
    }

    /// Replace how retries wait.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retry = self.retry.with_sleeper(sleeper);
        self
    }

    /// Loaded configuration.
    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Secret resolver over the configured store, environment and fallback file.
    pub fn resolver(&self) -> SecretResolver {
        let store: Box<dyn SecretStore> = match &self.config.secrets.store_command {
            Some(argv) => Box::new(CommandSecretStore::new(argv.clone())),
            None => Box::new(NoSecretStore),
        };

        let mut resolver = SecretResolver::new(store);
        if let Some(path) = &self.config.secrets.fallback_file {
            resolver = resolver.with_fallback_file(path);
        }
        for (name, value) in &self.overrides {
            resolver = resolver.with_override(name.clone(), value.clone());
        }
        resolver
    }

    /// Resolve and write every required secret.
    pub fn materialize_secrets(&self) -> Result<MaterializedSecrets> {
        Ok(self.try_materialize()?)
    }

    /// Fetch, verify and extract the tooling bundle, if one is configured.
    pub fn fetch_bundle(&self) -> Result<Option<ExtractedBundle>> {
        Ok(self.try_fetch_bundle()?)
    }

    /// Phase sequencer over file markers.
    pub fn sequencer(&self) -> Result<PhaseSequencer> {
        let phases: Vec<Phase> = self
            .config
            .phases
            .iter()
            .map(|phase| {
                Phase::new(phase.name.clone(), phase.script.clone())
                    .requires(phase.requires.iter().cloned())
            })
            .collect();
        let markers = FileMarkerStore::new(
            self.config.host.marker_dir.clone(),
            self.config.host.namespace.clone(),
        );

        let sequencer = PhaseSequencer::new(phases, Box::new(markers), self.retry.clone())?
            .with_run_record(self.config.run_record_path());
        Ok(sequencer)
    }

    /// Run the host phases: secrets, bundle, then every pending phase.
    pub fn provision(&self) -> Result<SequenceReport> {
        info!(
            namespace = %self.config.host.namespace,
            phases = self.config.phases.len(),
            "provisioning host"
        );
        let mut sequencer = self.sequencer()?;
        let mut preparation = HostPreparation { deploy: self };
        Ok(sequencer.run(&mut preparation)?)
    }

    /// Marker state of every phase.
    pub fn status(&self) -> Result<StatusReport> {
        Ok(self.sequencer()?.status()?)
    }

    /// Clear markers so phases run again.
    pub fn reset(&self, phase: Option<&str>) -> Result<Vec<String>> {
        Ok(self.sequencer()?.reset(phase)?)
    }

    /// Reconciler over the configured resources.
    pub fn reconciler(&self, target: &DeployTarget) -> Result<Reconciler> {
        let vars = target.variables(&self.config.deploy)?;
        let resources: Vec<Box<dyn Resource>> = self
            .config
            .deploy
            .resources
            .iter()
            .map(|definition| Box::new(CommandResource::new(definition, &vars)) as Box<dyn Resource>)
            .collect();
        Ok(Reconciler::new(resources, self.retry.clone())?)
    }

    /// Plan, confirm and create the missing resources.
    pub fn deploy(
        &self,
        target: &DeployTarget,
        confirm: &mut dyn Confirm,
        dry_run: bool,
    ) -> Result<ApplyReport> {
        let reconciler = self.reconciler(target)?;
        Ok(reconciler.reconcile(confirm, dry_run)?)
    }

    fn try_materialize(&self) -> std::result::Result<MaterializedSecrets, SecretError> {
        let required = &self.config.secrets.required;
        if required.is_empty() {
            debug!("no secrets required");
            return Ok(MaterializedSecrets::default());
        }

        let resolver = self.resolver();
        self.retry
            .execute_classified(
                "materialize secrets",
                |_| materialize(&resolver, required, &self.config.secrets.dir),
                SecretError::is_transient,
            )
            .map_err(RetryError::into_inner)
    }

    fn try_fetch_bundle(&self) -> std::result::Result<Option<ExtractedBundle>, ArtifactError> {
        let Some(artifact) = &self.config.artifact else {
            debug!("no artifact bundle configured");
            return Ok(None);
        };

        let expected = Checksum::parse(&artifact.checksum)?;
        let store = select_store(&artifact.remote, artifact.fetch_command.as_deref())?;
        let retry = self.retry.with_policy(download_policy(self.retry.policy()));
        ArtifactFetcher::new(store, retry)
            .fetch(
                &artifact.remote,
                &expected,
                &artifact.cache_path,
                &self.config.host.work_dir,
            )
            .map(Some)
    }
}

/// Secrets then bundle, run by the sequencer before the first phase.
struct HostPreparation<'a> {
    deploy: &'a LeDeploy,
}

impl Preparation for HostPreparation<'_> {
    fn prepare(&mut self) -> anyhow::Result<PhaseEnvironment> {
        let secrets = self.deploy.try_materialize()?;
        let mut env = PhaseEnvironment::inherit_basics().with_secrets(secrets);
        if let Some(bundle) = self.deploy.try_fetch_bundle()? {
            env = env.with_bundle(bundle.dir);
        }
        Ok(env)
    }
}
