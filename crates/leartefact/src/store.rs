use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use lereprise::{render_template, ShellCommand};
use tracing::debug;

use crate::{ArtifactError, Result};

/// Default per-request timeout for HTTP downloads.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Remote object storage, addressed by path.
pub trait ObjectStore {
    /// Short label used in diagnostics.
    fn label(&self) -> &str;

    /// Copy the object at `remote` into `dest`, returning the bytes written.
    ///
    /// Any failure is a single-attempt transfer error; the caller retries.
    fn download(&self, remote: &str, dest: &Path) -> Result<u64>;
}

/// HTTP(S) object store using a blocking client.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::blocking::Client,
}

impl HttpObjectStore {
    /// Client with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ArtifactError::transfer("http client", err))?;
        Ok(Self { client })
    }
}

impl ObjectStore for HttpObjectStore {
    fn label(&self) -> &str {
        "http"
    }

    fn download(&self, remote: &str, dest: &Path) -> Result<u64> {
        let mut response = self
            .client
            .get(remote)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|err| ArtifactError::transfer(remote, err))?;
        debug!(remote, status = %response.status(), "download response");

        let mut file = File::create(dest).map_err(|err| ArtifactError::io(dest, err))?;
        response
            .copy_to(&mut file)
            .map_err(|err| ArtifactError::transfer(remote, err))
    }
}

/// Object store driven by an external CLI (e.g. `gsutil cp {remote} {dest}`).
#[derive(Debug, Clone)]
pub struct CommandObjectStore {
    argv: Vec<String>,
}

impl CommandObjectStore {
    /// Store running `argv`, with `{remote}` and `{dest}` substituted.
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl ObjectStore for CommandObjectStore {
    fn label(&self) -> &str {
        "command"
    }

    fn download(&self, remote: &str, dest: &Path) -> Result<u64> {
        let vars = BTreeMap::from([
            ("remote".to_string(), remote.to_string()),
            ("dest".to_string(), dest.display().to_string()),
        ]);
        let argv: Vec<String> = self
            .argv
            .iter()
            .map(|part| render_template(part, &vars))
            .collect();

        ShellCommand::from_argv(argv.as_slice())
            .and_then(|command| command.run())
            .map_err(|err| ArtifactError::transfer(remote, err))?;

        let metadata = fs::metadata(dest).map_err(|err| {
            ArtifactError::transfer(remote, format!("command produced no file: {err}"))
        })?;
        Ok(metadata.len())
    }
}

/// Object store on a local or mounted filesystem.
#[derive(Debug, Clone, Default)]
pub struct LocalObjectStore {
    root: Option<PathBuf>,
}

impl LocalObjectStore {
    /// Store resolving remote paths as given (absolute or cwd-relative).
    pub fn new() -> Self {
        Self::default()
    }

    /// Store resolving relative remote paths under `root`.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, remote: &str) -> PathBuf {
        let path = Path::new(remote.strip_prefix("file://").unwrap_or(remote));
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl ObjectStore for LocalObjectStore {
    fn label(&self) -> &str {
        "local"
    }

    fn download(&self, remote: &str, dest: &Path) -> Result<u64> {
        let source = self.resolve(remote);
        fs::copy(&source, dest).map_err(|err| ArtifactError::transfer(remote, err))
    }
}

/// Pick a backend for `remote`: the configured fetch command, HTTP for
/// `http(s)://`, otherwise the local filesystem.
pub fn select_store(remote: &str, fetch_command: Option<&[String]>) -> Result<Box<dyn ObjectStore>> {
    if let Some(argv) = fetch_command.filter(|argv| !argv.is_empty()) {
        return Ok(Box::new(CommandObjectStore::new(argv.to_vec())));
    }
    if remote.starts_with("http://") || remote.starts_with("https://") {
        return Ok(Box::new(HttpObjectStore::new(HTTP_TIMEOUT)?));
    }
    Ok(Box::new(LocalObjectStore::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_store_copies_and_reports_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("bundle.tar.gz"), b"payload").expect("write");

        let store = LocalObjectStore::rooted(dir.path());
        let dest = dir.path().join("copy");
        let written = store.download("bundle.tar.gz", &dest).expect("download");

        assert_eq!(written, 7);
        assert_eq!(fs::read(&dest).expect("read"), b"payload");
    }

    #[test]
    fn local_store_missing_object_is_transfer_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = LocalObjectStore::rooted(dir.path())
            .download("absent.tar.gz", &dir.path().join("copy"))
            .expect_err("must fail");
        assert!(err.is_transient());
    }

    #[cfg(unix)]
    #[test]
    fn command_store_substitutes_remote_and_dest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("remote.bin");
        fs::write(&source, b"abc").expect("write");
        let dest = dir.path().join("dest.bin");

        let store = CommandObjectStore::new(vec![
            "cp".to_string(),
            "{remote}".to_string(),
            "{dest}".to_string(),
        ]);
        let written = store
            .download(&source.display().to_string(), &dest)
            .expect("download");
        assert_eq!(written, 3);
    }

    #[test]
    fn selection_follows_scheme_and_command() {
        let command = vec!["gsutil".to_string(), "cp".to_string()];
        assert_eq!(
            select_store("gs://bucket/b.tgz", Some(command.as_slice()))
                .expect("store")
                .label(),
            "command"
        );
        assert_eq!(
            select_store("https://example.org/b.tgz", None)
                .expect("store")
                .label(),
            "http"
        );
        assert_eq!(
            select_store("/srv/bundles/b.tgz", Some(&[]))
                .expect("store")
                .label(),
            "local"
        );
    }
}
