//! Cached, retried, checksum-gated bundle fetch.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lereprise::{success, RetryExecutor, RetryPolicy};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::checksum::Checksum;
use crate::extract::{extract_bundle, ExtractSummary};
use crate::store::ObjectStore;
use crate::{ArtifactError, Result};

/// First inter-attempt delay for bundle downloads.
pub const DOWNLOAD_BASE_DELAY: Duration = Duration::from_secs(2);

/// Download policy derived from the orchestrator policy: exponential from 2s,
/// same attempt count, multiplier and cap.
pub fn download_policy(base: &RetryPolicy) -> RetryPolicy {
    let mut policy = RetryPolicy::exponential(
        base.max_attempts,
        DOWNLOAD_BASE_DELAY,
        base.max_delay.max(DOWNLOAD_BASE_DELAY),
    )
    .with_multiplier(base.multiplier);
    policy.budget = base.budget;
    policy
}

/// A verified bundle unpacked into a working directory.
#[derive(Debug, Clone)]
pub struct ExtractedBundle {
    /// Directory holding the bundle contents.
    pub dir: PathBuf,
    /// Verified archive in the cache.
    pub archive: PathBuf,
    /// Verified checksum.
    pub checksum: Checksum,
    /// True when the cached archive was reused without downloading.
    pub cache_hit: bool,
    /// What extraction produced.
    pub summary: ExtractSummary,
}

enum Attempt {
    Transfer(ArtifactError),
    Mismatch(Checksum),
}

impl std::fmt::Display for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Attempt::Transfer(err) => write!(f, "{err}"),
            Attempt::Mismatch(actual) => write!(f, "checksum mismatch (got {actual})"),
        }
    }
}

/// Fetches bundles from an [`ObjectStore`] under a retry policy.
pub struct ArtifactFetcher {
    store: Box<dyn ObjectStore>,
    retry: RetryExecutor,
}

impl ArtifactFetcher {
    /// Fetcher using `retry` for downloads. See [`download_policy`].
    pub fn new(store: Box<dyn ObjectStore>, retry: RetryExecutor) -> Self {
        Self { store, retry }
    }

    /// Ensure a verified copy of `remote` exists at `cache_path`.
    ///
    /// Returns `true` on a cache hit. A mismatching cached file is replaced;
    /// a download that never verifies is removed and reported as
    /// [`ArtifactError::Integrity`].
    pub fn ensure_cached(&self, remote: &str, expected: &Checksum, cache_path: &Path) -> Result<bool> {
        if cache_path.is_file() {
            let cached = expected.compute(cache_path)?;
            if cached == *expected {
                info!(path = %cache_path.display(), "bundle cache hit");
                return Ok(true);
            }
            warn!(
                path = %cache_path.display(),
                expected = %expected,
                actual = %cached,
                "cached bundle does not match; re-fetching"
            );
        }

        let parent = cache_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|err| ArtifactError::io(parent, err))?;
        let description = format!("download {remote}");

        // A mismatch on any attempt makes the fetch an integrity failure, even
        // when later attempts only fail in transport.
        let mut mismatch: Option<Checksum> = None;
        let outcome = self.retry.execute(&description, |attempt| {
            let staging = staging_file(parent).map_err(Attempt::Transfer)?;
            let bytes = self
                .store
                .download(remote, staging.path())
                .map_err(Attempt::Transfer)?;
            let actual = expected.compute(staging.path()).map_err(Attempt::Transfer)?;
            if actual != *expected {
                mismatch = Some(actual.clone());
                return Err(Attempt::Mismatch(actual));
            }
            info!(remote, attempt, bytes, store = self.store.label(), "bundle downloaded and verified");
            Ok(staging)
        });

        match outcome {
            Ok(staging) => {
                staging
                    .persist(cache_path)
                    .map_err(|err| ArtifactError::io(cache_path, err.error))?;
                Ok(false)
            }
            Err(err) => {
                let attempts = err.attempts;
                Err(match (err.into_inner(), mismatch) {
                    (Attempt::Mismatch(actual), _) | (Attempt::Transfer(_), Some(actual)) => {
                        ArtifactError::Integrity {
                            remote: remote.to_string(),
                            expected: expected.to_string(),
                            actual: actual.to_string(),
                            attempts,
                        }
                    }
                    (Attempt::Transfer(inner), None) => ArtifactError::DownloadExhausted {
                        remote: remote.to_string(),
                        attempts,
                        reason: inner.to_string(),
                    },
                })
            }
        }
    }

    /// Fetch, verify, and extract `remote` into `work_dir`.
    pub fn fetch(
        &self,
        remote: &str,
        expected: &Checksum,
        cache_path: &Path,
        work_dir: &Path,
    ) -> Result<ExtractedBundle> {
        let cache_hit = self.ensure_cached(remote, expected, cache_path)?;
        let summary = extract_bundle(cache_path, work_dir)?;
        success!(
            dir = %work_dir.display(),
            files = summary.files,
            scripts = summary.scripts.len(),
            "artifact bundle ready"
        );
        Ok(ExtractedBundle {
            dir: work_dir.to_path_buf(),
            archive: cache_path.to_path_buf(),
            checksum: expected.clone(),
            cache_hit,
            summary,
        })
    }
}

/// Fresh hidden sibling for one download attempt; removed on drop unless persisted.
fn staging_file(dir: &Path) -> Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(".bundle-")
        .suffix(".partial")
        .tempfile_in(dir)
        .map_err(|err| ArtifactError::io(dir, err))
}
