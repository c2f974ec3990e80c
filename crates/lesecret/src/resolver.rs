use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::kv::KeyValueFile;
use crate::store::{NoSecretStore, SecretStore};
use crate::value::SecretValue;
use crate::{Result, SecretError};

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretSource {
    /// Passed explicitly by the operator (command line).
    Explicit,
    /// Remote secret store.
    Store,
    /// Process environment variable.
    Environment,
    /// Local key-value fallback file.
    FallbackFile,
}

impl fmt::Display for SecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit argument"),
            Self::Store => write!(f, "secret store"),
            Self::Environment => write!(f, "environment"),
            Self::FallbackFile => write!(f, "fallback file"),
        }
    }
}

/// A resolved value with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// The value.
    pub value: SecretValue,
    /// Which source produced it.
    pub source: SecretSource,
}

/// A secret the host bootstrap must have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRequirement {
    /// Name in the remote store; also the materialized file name.
    pub name: String,
    /// Environment variable / fallback-file key. Defaults to the upper-cased name.
    #[serde(default)]
    pub env: Option<String>,
}

impl SecretRequirement {
    /// Requirement with the default env name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            env: None,
        }
    }

    /// Requirement with an explicit env name.
    pub fn with_env(name: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            env: Some(env.into()),
        }
    }

    /// Environment variable consulted for this secret.
    pub fn env_name(&self) -> String {
        match &self.env {
            Some(env) if !env.trim().is_empty() => env.clone(),
            _ => self
                .name
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() {
                        c.to_ascii_uppercase()
                    } else {
                        '_'
                    }
                })
                .collect(),
        }
    }
}

/// Source of environment lookups.
#[derive(Debug, Clone, Default)]
pub enum EnvSource {
    /// The real process environment.
    #[default]
    Process,
    /// A fixed map, for tests and sandboxed runs.
    Fixed(BTreeMap<String, String>),
}

impl EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        match self {
            Self::Process => std::env::var(key).ok(),
            Self::Fixed(map) => map.get(key).cloned(),
        }
    }
}

/// Resolves secrets through `explicit > store > environment > fallback file`.
///
/// Each source short-circuits on the first non-blank value. An unreachable
/// store is logged and skipped; a value missing everywhere is `NotFound`.
pub struct SecretResolver {
    overrides: BTreeMap<String, SecretValue>,
    store: Box<dyn SecretStore>,
    env: EnvSource,
    fallback_file: Option<PathBuf>,
}

impl Default for SecretResolver {
    fn default() -> Self {
        Self::new(Box::new(NoSecretStore))
    }
}

impl SecretResolver {
    /// Resolver over `store`, the process environment, and no fallback file.
    pub fn new(store: Box<dyn SecretStore>) -> Self {
        Self {
            overrides: BTreeMap::new(),
            store,
            env: EnvSource::Process,
            fallback_file: None,
        }
    }

    /// Replace the environment source.
    pub fn with_env(mut self, env: EnvSource) -> Self {
        self.env = env;
        self
    }

    /// Consult `path` as the last resort.
    pub fn with_fallback_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.fallback_file = Some(path.into());
        self
    }

    /// Add an explicit operator-supplied value, keyed by secret name.
    pub fn with_override(mut self, name: impl Into<String>, value: impl Into<SecretValue>) -> Self {
        self.overrides.insert(name.into(), value.into());
        self
    }

    /// Resolve `name`, using `env_name` for the environment and fallback file.
    pub fn resolve(&self, name: &str, env_name: &str) -> Result<Resolved> {
        let mut attempted = Vec::new();

        attempted.push(format!("{} `{name}`", SecretSource::Explicit));
        if let Some(value) = self.overrides.get(name).filter(|v| !v.is_blank()) {
            return Ok(self.found(name, value.clone(), SecretSource::Explicit));
        }

        attempted.push(format!("{} `{name}`", self.store.label()));
        match self.store.lookup(name) {
            Ok(Some(value)) if !value.is_blank() => {
                return Ok(self.found(name, value, SecretSource::Store));
            }
            Ok(_) => debug!(secret = name, "not present in {}", self.store.label()),
            Err(err) => warn!(
                secret = name,
                error = %err,
                "{} unavailable; falling back",
                self.store.label()
            ),
        }

        attempted.push(format!("environment variable `{env_name}`"));
        if let Some(value) = self.env.get(env_name).filter(|v| !v.trim().is_empty()) {
            return Ok(self.found(name, value.into(), SecretSource::Environment));
        }

        if let Some(path) = &self.fallback_file {
            attempted.push(format!("key `{env_name}` in {}", path.display()));
            if let Some(file) = KeyValueFile::load(path)? {
                if let Some(value) = file.get(env_name).filter(|v| !v.trim().is_empty()) {
                    return Ok(self.found(name, value.into(), SecretSource::FallbackFile));
                }
            }
        }

        Err(SecretError::NotFound {
            name: name.to_string(),
            attempted,
        })
    }

    /// Resolve a declared requirement.
    pub fn resolve_requirement(&self, requirement: &SecretRequirement) -> Result<Resolved> {
        self.resolve(&requirement.name, &requirement.env_name())
    }

    fn found(&self, name: &str, value: SecretValue, source: SecretSource) -> Resolved {
        debug!(secret = name, %source, "secret resolved");
        Resolved { value, source }
    }
}
