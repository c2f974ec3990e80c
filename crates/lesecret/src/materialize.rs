//! Secret materialization
//!
//! Resolves every required secret, then writes each one to its own file
//! under an owner-only directory. Resolution happens before any write, so a
//! missing secret leaves nothing behind; a failed write removes the files
//! written by the same call.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::resolver::{SecretRequirement, SecretResolver, SecretSource};
use crate::value::SecretValue;
use crate::{Result, SecretError};

/// Directory mode: owner-only traversal.
pub const SECRET_DIR_MODE: u32 = 0o700;
/// File mode: owner read/write.
pub const SECRET_FILE_MODE: u32 = 0o600;

/// One secret written to disk.
#[derive(Debug, Clone)]
pub struct MaterializedSecret {
    /// Environment variable name exported to child processes.
    pub env: String,
    /// Resolved value.
    pub value: SecretValue,
    /// Where the value was found.
    pub source: SecretSource,
    /// File holding the value.
    pub path: PathBuf,
}

/// The complete set of materialized secrets.
#[derive(Debug, Clone, Default)]
pub struct MaterializedSecrets {
    /// Directory holding the secret files.
    pub dir: PathBuf,
    entries: BTreeMap<String, MaterializedSecret>,
}

impl MaterializedSecrets {
    /// Entry for secret `name`.
    pub fn get(&self, name: &str) -> Option<&MaterializedSecret> {
        self.entries.get(name)
    }

    /// True when `name` was materialized.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Secret names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of secrets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was required.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `ENV=value` pairs for the listed secret names.
    ///
    /// Names that were not materialized are returned as `Err` with the first missing name.
    pub fn env_for<'a, I>(&self, names: I) -> std::result::Result<BTreeMap<String, String>, String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut vars = BTreeMap::new();
        for name in names {
            let entry = self.entries.get(name).ok_or_else(|| name.clone())?;
            vars.insert(entry.env.clone(), entry.value.expose().to_string());
        }
        Ok(vars)
    }
}

/// Resolve every requirement and write the set under `dir`.
pub fn materialize(
    resolver: &SecretResolver,
    requirements: &[SecretRequirement],
    dir: &Path,
) -> Result<MaterializedSecrets> {
    let mut resolved = Vec::with_capacity(requirements.len());
    for requirement in requirements {
        validate_name(&requirement.name)?;
        let found = resolver.resolve_requirement(requirement)?;
        resolved.push((requirement, found));
    }

    prepare_dir(dir)?;

    let mut written: Vec<PathBuf> = Vec::new();
    let mut entries = BTreeMap::new();
    for (requirement, found) in resolved {
        let path = dir.join(&requirement.name);
        if let Err(err) = write_secret(&path, &found.value) {
            for stale in &written {
                let _ = fs::remove_file(stale);
            }
            return Err(err);
        }
        debug!(secret = %requirement.name, source = %found.source, "secret materialized");
        written.push(path.clone());
        entries.insert(
            requirement.name.clone(),
            MaterializedSecret {
                env: requirement.env_name(),
                value: found.value,
                source: found.source,
                path,
            },
        );
    }

    info!(count = entries.len(), dir = %dir.display(), "secrets materialized");
    Ok(MaterializedSecrets {
        dir: dir.to_path_buf(),
        entries,
    })
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(SecretError::InvalidName(name.to_string()))
    }
}

fn prepare_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|err| SecretError::io(dir, err))?;
    set_mode(dir, SECRET_DIR_MODE)
}

/// Stage `value` beside `path` and move it into place once fully written.
/// The staging file is removed on any failure.
fn write_secret(path: &Path, value: &SecretValue) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut staging = tempfile::Builder::new()
        .prefix(".secret-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|err| SecretError::io(dir, err))?;
    let staging_path = staging.path().to_path_buf();

    set_mode(&staging_path, SECRET_FILE_MODE)?;
    staging
        .write_all(value.expose().as_bytes())
        .and_then(|()| staging.as_file().sync_all())
        .map_err(|err| SecretError::io(&staging_path, err))?;
    staging
        .persist(path)
        .map_err(|err| SecretError::io(path, err.error))?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|err| SecretError::io(path, err))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
