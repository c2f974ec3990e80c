//! Fetch-verify-extract through the public API with a local object store.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use leartefact::{
    download_policy, ArtifactError, ArtifactFetcher, Checksum, ChecksumAlgorithm, LocalObjectStore,
};
use lereprise::{RecordingSleeper, RetryExecutor, RetryPolicy};

fn bundle_bytes() -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, data) in [
        ("bundle/phases/10-nginx.sh", &b"#!/bin/sh\necho nginx\n"[..]),
        ("bundle/phases/20-certbot.sh", &b"#!/bin/sh\necho certbot\n"[..]),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, path, data).expect("append");
    }
    builder
        .into_inner()
        .expect("tar")
        .finish()
        .expect("gzip")
}

fn fetcher(root: &Path) -> (ArtifactFetcher, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::default());
    let retry =
        RetryExecutor::new(download_policy(&RetryPolicy::default())).with_sleeper(sleeper.clone());
    (
        ArtifactFetcher::new(Box::new(LocalObjectStore::rooted(root)), retry),
        sleeper,
    )
}

#[test]
fn second_fetch_is_a_cache_hit() {
    let remote_dir = tempfile::tempdir().expect("tempdir");
    let host_dir = tempfile::tempdir().expect("tempdir");
    let bytes = bundle_bytes();
    fs::write(remote_dir.path().join("bundle-1.0.tar.gz"), &bytes).expect("publish");
    let expected = Checksum::of_bytes(ChecksumAlgorithm::Sha256, &bytes);

    let (fetcher, sleeper) = fetcher(remote_dir.path());
    let cache = host_dir.path().join("cache/bundle.tar.gz");
    let work = host_dir.path().join("work");

    let first = fetcher
        .fetch("bundle-1.0.tar.gz", &expected, &cache, &work)
        .expect("first fetch");
    assert!(!first.cache_hit);
    assert_eq!(first.summary.scripts.len(), 2);
    assert!(work.join("phases/10-nginx.sh").is_file());

    fs::remove_file(remote_dir.path().join("bundle-1.0.tar.gz")).expect("unpublish");
    let second = fetcher
        .fetch("bundle-1.0.tar.gz", &expected, &cache, &work)
        .expect("second fetch");
    assert!(second.cache_hit);
    assert!(sleeper.delays().is_empty());
}

#[test]
fn mismatched_bundle_is_never_extracted() {
    let remote_dir = tempfile::tempdir().expect("tempdir");
    let host_dir = tempfile::tempdir().expect("tempdir");
    fs::write(remote_dir.path().join("bundle.tar.gz"), bundle_bytes()).expect("publish");
    let expected = Checksum::of_bytes(ChecksumAlgorithm::Blake3, b"the bundle we expected");

    let (fetcher, sleeper) = fetcher(remote_dir.path());
    let cache = host_dir.path().join("bundle.tar.gz");
    let work = host_dir.path().join("work");

    let err = fetcher
        .fetch("bundle.tar.gz", &expected, &cache, &work)
        .expect_err("must fail");

    assert!(matches!(err, ArtifactError::Integrity { attempts: 5, .. }));
    assert_eq!(sleeper.delays().len(), 4);
    assert!(!cache.exists());
    assert!(!work.exists());
}
