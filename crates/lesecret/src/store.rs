use std::collections::BTreeMap;

use lereprise::{render_template, ExecError, ShellCommand};
use thiserror::Error;

use crate::value::SecretValue;

/// Remote store could not answer. The resolver treats this as "unavailable".
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store client failed
    #[error("secret store command failed: {0}")]
    Command(#[from] ExecError),

    /// Store misconfigured
    #[error("secret store misconfigured: {0}")]
    Config(String),
}

/// A remote secret store queried by name.
pub trait SecretStore {
    /// Short label used in diagnostics.
    fn label(&self) -> &str;

    /// Look up `name`. `Ok(None)` means the store answered and has no such secret.
    fn lookup(&self, name: &str) -> Result<Option<SecretValue>, StoreError>;
}

/// Store backed by a secret-manager CLI.
///
/// `argv` is a template; `{name}` is replaced with the secret name. An empty
/// stdout, or a non-zero exit whose stderr says the secret does not exist,
/// means absent. Any other non-zero exit is an error.
#[derive(Debug, Clone)]
pub struct CommandSecretStore {
    argv: Vec<String>,
}

impl CommandSecretStore {
    /// Store running `argv` per lookup.
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    /// Google Secret Manager through `gcloud`.
    pub fn gcloud() -> Self {
        Self::new(
            [
                "gcloud",
                "secrets",
                "versions",
                "access",
                "latest",
                "--secret={name}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        )
    }
}

impl SecretStore for CommandSecretStore {
    fn label(&self) -> &str {
        "secret manager"
    }

    fn lookup(&self, name: &str) -> Result<Option<SecretValue>, StoreError> {
        if self.argv.is_empty() {
            return Err(StoreError::Config("empty store command".to_string()));
        }

        let vars = BTreeMap::from([("name".to_string(), name.to_string())]);
        let argv: Vec<String> = self
            .argv
            .iter()
            .map(|part| render_template(part, &vars))
            .collect();

        let output = match ShellCommand::from_argv(argv.as_slice())?.run() {
            Ok(output) => output,
            Err(ExecError::Failed { ref stderr, .. }) if reports_not_found(stderr) => {
                return Ok(None)
            }
            Err(err) => return Err(err.into()),
        };
        let value = output.stdout.trim_end_matches(['\r', '\n']);
        if value.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(SecretValue::new(value)))
        }
    }
}

/// Secret-manager CLIs exit non-zero for a missing secret; tell that apart
/// from an outage by the message.
fn reports_not_found(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    ["not_found", "not found", "does not exist"]
        .iter()
        .any(|marker| stderr.contains(marker))
}

/// In-memory store, for tests and pre-seeded values.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretStore {
    values: BTreeMap<String, SecretValue>,
    unreachable: bool,
}

impl StaticSecretStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one secret.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<SecretValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Store that fails every lookup, simulating an outage.
    pub fn unreachable() -> Self {
        Self {
            values: BTreeMap::new(),
            unreachable: true,
        }
    }
}

impl SecretStore for StaticSecretStore {
    fn label(&self) -> &str {
        "static store"
    }

    fn lookup(&self, name: &str) -> Result<Option<SecretValue>, StoreError> {
        if self.unreachable {
            return Err(StoreError::Config("store unreachable".to_string()));
        }
        Ok(self.values.get(name).cloned())
    }
}

/// Placeholder when no remote store is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecretStore;

impl SecretStore for NoSecretStore {
    fn label(&self) -> &str {
        "no secret store"
    }

    fn lookup(&self, _name: &str) -> Result<Option<SecretValue>, StoreError> {
        Ok(None)
    }
}
