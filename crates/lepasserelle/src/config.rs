// Deployment Configuration
//
// *La Configuration* (The Configuration) - Host, retry, secret, artifact,
// phase and resource settings for LeDeploy

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use leartefact::Checksum;
use lephase::ScriptPhase;
use lereconcile::ResourceDefinition;
use lereprise::{Backoff, RetryPolicy};
use lesecret::SecretRequirement;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// System-wide configuration file
pub const DEFAULT_CONFIG_FILE: &str = "/etc/ledeploy/config.toml";

/// Environment variable overriding the configuration path
pub const CONFIG_ENV_VAR: &str = "LEDEPLOY_CONFIG";

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File exists but could not be read
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        /// Config path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for [`DeployConfig`]
    #[error("failed to parse config file {}: {message}", .path.display())]
    Parse {
        /// Config path
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// The configuration contains invalid values or settings
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete orchestrator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Host-level locations
    pub host: HostConfig,

    /// The one retry policy every wrapped action uses
    pub retry: RetryConfig,

    /// Secret resolution and materialization
    pub secrets: SecretsConfig,

    /// Tooling bundle; phases that need scripts fail without it
    pub artifact: Option<ArtifactConfig>,

    /// Ordered host phases
    pub phases: Vec<PhaseConfig>,

    /// Cloud resource reconciliation
    pub deploy: DeployTargetConfig,
}

impl DeployConfig {
    /// Path to load: `explicit`, then `$LEDEPLOY_CONFIG`, then the user
    /// config directory if a file exists there, then `/etc/ledeploy/config.toml`.
    pub fn locate(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        if let Some(user) = dirs::config_dir().map(|d| d.join("ledeploy").join("config.toml")) {
            if user.is_file() {
                return user;
            }
        }
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    /// Load and validate configuration from `path`.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config = Self::parse(&content).map_err(|err| match err {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: DeployConfig = toml::from_str(content).map_err(|err| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            message: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("host.namespace must not be empty".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid("retry.multiplier must be >= 1.0".into()));
        }

        if let Some(artifact) = &self.artifact {
            artifact.checksum()?;
            if artifact.remote.trim().is_empty() {
                return Err(ConfigError::Invalid("artifact.remote must not be empty".into()));
            }
        }

        let declared: BTreeSet<&str> = self
            .secrets
            .required
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        for phase in &self.phases {
            for secret in &phase.requires {
                if !declared.contains(secret.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "phase `{}` requires secret `{secret}`, which is not listed in [[secrets.required]]",
                        phase.name
                    )));
                }
            }
        }

        for resource in &self.deploy.resources {
            if resource.exists.is_empty() || resource.create.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "resource `{}` needs both `exists` and `create` commands",
                    resource.name
                )));
            }
        }
        Ok(())
    }

    /// Run record written next to the markers.
    pub fn run_record_path(&self) -> PathBuf {
        self.host
            .marker_dir
            .join(format!("{}-run.json", self.host.namespace))
    }
}

/// Host-level locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Marker file prefix
    pub namespace: String,

    /// Directory holding completion/failure markers
    pub marker_dir: PathBuf,

    /// Directory the bundle is extracted into
    pub work_dir: PathBuf,

    /// Durable append-only log file
    pub log_file: PathBuf,

    /// Serial or console device receiving a copy of every log line
    pub console_device: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            namespace: "ledeploy".to_string(),
            marker_dir: PathBuf::from("/var/lib"),
            work_dir: PathBuf::from("/opt/ledeploy/bundle"),
            log_file: PathBuf::from("/var/log/ledeploy.log"),
            console_device: None,
        }
    }
}

/// Retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per action
    pub max_attempts: u32,

    /// Delay before the first retry, in seconds
    pub base_delay_secs: u64,

    /// `fixed` or `exponential`
    pub backoff: Backoff,

    /// Exponential growth factor
    pub multiplier: f64,

    /// Cap on any single delay, in seconds
    pub max_delay_secs: u64,

    /// Budget for one action including its sleeps, in seconds
    pub budget_secs: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_secs: policy.base_delay.as_secs(),
            backoff: policy.backoff,
            multiplier: policy.multiplier,
            max_delay_secs: policy.max_delay.as_secs(),
            budget_secs: None,
        }
    }
}

impl RetryConfig {
    /// Build the policy.
    pub fn policy(&self) -> RetryPolicy {
        let policy = RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs(self.base_delay_secs),
            backoff: self.backoff,
            multiplier: self.multiplier,
            max_delay: Duration::from_secs(self.max_delay_secs),
            budget: self.budget_secs.map(Duration::from_secs),
        };
        policy.normalized()
    }
}

/// Secret settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Secret manager argv template; `{name}` is the secret name
    pub store_command: Option<Vec<String>>,

    /// `KEY=VALUE` fallback file
    pub fallback_file: Option<PathBuf>,

    /// Owner-only directory the secrets are written to
    pub dir: PathBuf,

    /// Secrets the host bootstrap must have
    pub required: Vec<SecretRequirement>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            store_command: None,
            fallback_file: None,
            dir: PathBuf::from("/run/ledeploy/secrets"),
            required: Vec::new(),
        }
    }
}

/// Tooling bundle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Remote bundle location
    pub remote: String,

    /// Expected checksum, `blake3:<hex>`, `sha256:<hex>` or bare blake3 hex
    pub checksum: String,

    /// Local cache of the downloaded archive
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,

    /// Download argv template with `{remote}` and `{dest}`
    #[serde(default)]
    pub fetch_command: Option<Vec<String>>,
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("/var/cache/ledeploy/bundle.tar.gz")
}

impl ArtifactConfig {
    /// Parsed expected checksum.
    pub fn checksum(&self) -> Result<Checksum, ConfigError> {
        Checksum::parse(&self.checksum).map_err(|err| ConfigError::Invalid(err.to_string()))
    }
}

/// One host phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// Unique phase name, also the marker key
    pub name: String,

    /// Scripts inside the bundle
    #[serde(flatten)]
    pub script: ScriptPhase,

    /// Secret names exported to the phase
    #[serde(default)]
    pub requires: Vec<String>,
}

/// Cloud reconciliation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployTargetConfig {
    /// Default `{project}`
    pub project: Option<String>,

    /// Default `{region}`
    pub region: Option<String>,

    /// Declared resources, in creation order
    pub resources: Vec<ResourceDefinition>,
}
