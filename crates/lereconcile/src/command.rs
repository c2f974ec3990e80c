//! Cloud CLI resources
//!
//! A [`ResourceDefinition`] holds argv templates for the existence check,
//! the creation call and an optional deletion call. [`CommandResource`]
//! renders them once against the deployment parameters and runs them
//! through [`ShellCommand`].

use std::collections::BTreeMap;

use anyhow::{bail, Context};
use lereprise::{render_template, ShellCommand};
use serde::{Deserialize, Serialize};

use crate::resource::{AlreadyExists, Resource};

const ABSENT_MARKERS: &[&str] = &["not found", "not_found", "does not exist", "404"];
const CONFLICT_MARKERS: &[&str] = &["already exists", "already_exists", "409"];

/// Declarative resource entry, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    /// Unique resource name, also available as `{name}`.
    pub name: String,
    /// Display kind.
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Existence check argv. Exit 0 means present.
    pub exists: Vec<String>,
    /// Creation argv.
    pub create: Vec<String>,
    /// Deletion argv used by rollback.
    #[serde(default)]
    pub delete: Option<Vec<String>>,
}

fn default_kind() -> String {
    "resource".to_string()
}

/// A [`Resource`] driven by rendered command templates.
#[derive(Debug, Clone)]
pub struct CommandResource {
    name: String,
    kind: String,
    exists: Vec<String>,
    create: Vec<String>,
    delete: Option<Vec<String>>,
}

impl CommandResource {
    /// Render `definition` with `params`; `{name}` is always the resource name.
    pub fn new(definition: &ResourceDefinition, params: &BTreeMap<String, String>) -> Self {
        let mut vars = params.clone();
        vars.insert("name".to_string(), definition.name.clone());
        let render = |argv: &[String]| -> Vec<String> {
            argv.iter().map(|part| render_template(part, &vars)).collect()
        };

        Self {
            name: definition.name.clone(),
            kind: definition.kind.clone(),
            exists: render(&definition.exists),
            create: render(&definition.create),
            delete: definition.delete.as_deref().map(render),
        }
    }

    /// Rendered creation command line.
    pub fn create_command(&self) -> String {
        self.create.join(" ")
    }
}

fn mentions(stderr: &str, markers: &[&str]) -> bool {
    let lower = stderr.to_ascii_lowercase();
    markers.iter().any(|marker| lower.contains(marker))
}

impl Resource for CommandResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn exists(&self) -> anyhow::Result<bool> {
        let output = ShellCommand::from_argv(self.exists.as_slice())?.output()?;
        if output.success() {
            return Ok(true);
        }
        let stderr = output.stderr.trim();
        if stderr.is_empty() || mentions(stderr, ABSENT_MARKERS) {
            return Ok(false);
        }
        bail!(
            "existence check `{}` exited with {:?}: {stderr}",
            self.exists.join(" "),
            output.code
        )
    }

    fn create(&self) -> anyhow::Result<()> {
        let output = ShellCommand::from_argv(self.create.as_slice())?.output()?;
        if output.success() {
            return Ok(());
        }
        let stderr = output.stderr.trim().to_string();
        if mentions(&stderr, CONFLICT_MARKERS) {
            return Err(anyhow::Error::new(AlreadyExists(self.name.clone())).context(stderr));
        }
        bail!(
            "`{}` exited with {:?}: {stderr}",
            self.create_command(),
            output.code
        )
    }

    fn is_deletable(&self) -> bool {
        self.delete.is_some()
    }

    fn delete(&self) -> anyhow::Result<()> {
        let Some(argv) = &self.delete else {
            bail!("`{}` has no delete command", self.name);
        };
        ShellCommand::from_argv(argv.as_slice())?
            .run()
            .with_context(|| format!("deleting `{}`", self.name))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::is_conflict;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    fn definition(exists: &str, create: &str) -> ResourceDefinition {
        ResourceDefinition {
            name: "assets".into(),
            kind: "bucket".into(),
            exists: sh(exists),
            create: sh(create),
            delete: None,
        }
    }

    #[test]
    fn templates_are_rendered_with_params_and_name() {
        let def = ResourceDefinition {
            name: "assets".into(),
            kind: "bucket".into(),
            exists: vec!["gcloud".into(), "storage".into(), "buckets".into(), "describe".into(), "gs://{project}-{name}".into()],
            create: vec!["gcloud".into(), "storage".into(), "buckets".into(), "create".into(), "gs://{project}-{name}".into(), "--location={region}".into()],
            delete: Some(vec!["gcloud".into(), "storage".into(), "rm".into(), "-r".into(), "gs://{project}-{name}".into()]),
        };
        let params = BTreeMap::from([
            ("project".to_string(), "acme".to_string()),
            ("region".to_string(), "europe-west1".to_string()),
        ]);

        let resource = CommandResource::new(&def, &params);
        assert_eq!(
            resource.create_command(),
            "gcloud storage buckets create gs://acme-assets --location=europe-west1"
        );
        assert!(resource.is_deletable());
        assert_eq!(resource.kind(), "bucket");
    }

    #[cfg(unix)]
    #[test]
    fn existence_check_classifies_exit_and_stderr() {
        let params = BTreeMap::new();
        let present = CommandResource::new(&definition("true", "true"), &params);
        assert!(present.exists().expect("check"));

        let missing = CommandResource::new(
            &definition("echo 'ERROR: NOT_FOUND: bucket' >&2; exit 1", "true"),
            &params,
        );
        assert!(!missing.exists().expect("check"));

        let silent = CommandResource::new(&definition("exit 1", "true"), &params);
        assert!(!silent.exists().expect("check"));

        let unknown = CommandResource::new(
            &definition("echo 'permission denied' >&2; exit 1", "true"),
            &params,
        );
        assert!(unknown.exists().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn create_conflict_is_reported_as_already_exists() {
        let resource = CommandResource::new(
            &definition("exit 1", "echo 'ERROR: bucket already exists' >&2; exit 1"),
            &BTreeMap::new(),
        );
        let err = resource.create().expect_err("conflict");
        assert!(is_conflict(&err));

        let failing = CommandResource::new(
            &definition("exit 1", "echo 'quota exceeded' >&2; exit 1"),
            &BTreeMap::new(),
        );
        assert!(!is_conflict(&failing.create().expect_err("failure")));
    }
}
