//! End-to-end runs of the orchestrator against a local bundle and shell-backed
//! resources.

#![cfg(unix)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use leartefact::{Checksum, ChecksumAlgorithm};
use lephase::MarkerState;
use lereconcile::AutoApprove;
use lereprise::RecordingSleeper;
use lepasserelle::{DeployConfig, DeployTarget, ErrorKind, LeDeploy};
use tempfile::TempDir;

const WRITE_TOKEN: &str = "#!/bin/sh\nprintf '%s' \"$API_TOKEN\" > \"$1\"\n";
const COUNT_RUN: &str = "#!/bin/sh\necho run >> \"$1\"\n";

struct Host {
    root: TempDir,
}

impl Host {
    fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("tempdir"),
        }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    /// Gzip tarball with a top-level `bundle/` directory.
    fn write_bundle(&self) -> PathBuf {
        let archive = self.path("remote/bundle.tar.gz");
        fs::create_dir_all(archive.parent().expect("parent")).expect("mkdir");

        let file = fs::File::create(&archive).expect("create archive");
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, body) in [("write-token.sh", WRITE_TOKEN), ("count-run.sh", COUNT_RUN)] {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("bundle/{name}"), body.as_bytes())
                .expect("append");
        }
        builder
            .into_inner()
            .expect("finish tar")
            .finish()
            .expect("finish gzip");
        archive
    }

    fn config(&self, archive: &Path, checksum: &str) -> DeployConfig {
        let text = format!(
            r#"
[host]
namespace = "webhost"
marker_dir = "{markers}"
work_dir = "{work}"
log_file = "{log}"

[retry]
max_attempts = 2
base_delay_secs = 1

[secrets]
dir = "{secrets}"
required = [{{ name = "api-token", env = "API_TOKEN" }}]

[artifact]
remote = "{remote}"
checksum = "{checksum}"
cache_path = "{cache}"

[[phases]]
name = "token"
script = "write-token.sh"
args = ["{token_out}"]
requires = ["api-token"]

[[phases]]
name = "counter"
script = "count-run.sh"
args = ["{count_out}"]
"#,
            markers = self.path("markers").display(),
            work = self.path("opt/bundle").display(),
            log = self.path("log/ledeploy.log").display(),
            secrets = self.path("run/secrets").display(),
            remote = archive.display(),
            cache = self.path("cache/bundle.tar.gz").display(),
            token_out = self.path("token.out").display(),
            count_out = self.path("count.out").display(),
        );
        DeployConfig::parse(&text).expect("config")
    }

    fn deploy(&self, config: DeployConfig) -> (LeDeploy, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        let deploy = LeDeploy::new(config)
            .with_secret_overrides([("api-token".to_string(), "s3cr3t".to_string())])
            .with_sleeper(sleeper.clone());
        (deploy, sleeper)
    }
}

#[test]
fn provision_runs_every_phase_once() {
    let host = Host::new();
    let archive = host.write_bundle();
    let checksum = Checksum::of_file(ChecksumAlgorithm::Blake3, &archive)
        .expect("checksum")
        .to_string();
    let (deploy, sleeper) = host.deploy(host.config(&archive, &checksum));

    let report = deploy.provision().expect("first run");
    assert!(!report.already_complete);
    assert_eq!(report.completed, vec!["token", "counter"]);
    assert_eq!(
        fs::read_to_string(host.path("token.out")).expect("token"),
        "s3cr3t"
    );
    assert!(sleeper.delays().is_empty());

    let status = deploy.status().expect("status");
    assert!(status.all_complete);
    assert!(status
        .phases
        .iter()
        .all(|phase| phase.state == MarkerState::Completed));

    let again = deploy.provision().expect("second run");
    assert!(again.already_complete);
    assert_eq!(
        fs::read_to_string(host.path("count.out")).expect("count"),
        "run\n"
    );
}

#[test]
fn reset_phase_reruns_only_that_phase() {
    let host = Host::new();
    let archive = host.write_bundle();
    let checksum = Checksum::of_file(ChecksumAlgorithm::Blake3, &archive)
        .expect("checksum")
        .to_string();
    let (deploy, _) = host.deploy(host.config(&archive, &checksum));

    deploy.provision().expect("first run");
    let cleared = deploy.reset(Some("counter")).expect("reset");
    assert!(cleared.contains(&"counter".to_string()));

    let report = deploy.provision().expect("rerun");
    assert_eq!(report.completed, vec!["counter"]);
    assert_eq!(
        fs::read_to_string(host.path("count.out")).expect("count"),
        "run\nrun\n"
    );
}

#[test]
fn checksum_mismatch_stops_before_any_phase() {
    let host = Host::new();
    let archive = host.write_bundle();
    let wrong = format!("blake3:{}", "0".repeat(64));
    let (deploy, _) = host.deploy(host.config(&archive, &wrong));

    let err = deploy.provision().expect_err("integrity failure");
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert_eq!(err.kind().exit_code(), 3);
    assert!(!host.path("token.out").exists());
    assert!(!host.path("count.out").exists());

    let status = deploy.status().expect("status");
    assert!(!status.all_complete);
}

#[test]
fn deploy_creates_only_missing_resources() {
    let host = Host::new();
    let state = host.path("cloud");
    fs::create_dir_all(&state).expect("mkdir");
    fs::write(state.join("acme-network"), b"").expect("existing resource");

    let text = r#"
[deploy]
project = "acme"

[[deploy.resources]]
name = "network"
kind = "network"
exists = ["sh", "-c", "test -f {state}/{project}-{name}"]
create = ["sh", "-c", "touch {state}/{project}-{name}"]

[[deploy.resources]]
name = "bucket"
kind = "bucket"
exists = ["sh", "-c", "test -f {state}/{project}-{name}"]
create = ["sh", "-c", "touch {state}/{project}-{name}"]
"#;
    let config = DeployConfig::parse(text).expect("config");
    let (deploy, _) = host.deploy(config);
    let target = DeployTarget {
        params: BTreeMap::from([("state".to_string(), state.display().to_string())]),
        ..DeployTarget::default()
    };

    let dry = deploy
        .deploy(&target, &mut AutoApprove, true)
        .expect("dry run");
    assert_eq!(dry.plan.create_count(), 1);
    assert!(!dry.applied);
    assert!(!state.join("acme-bucket").exists());

    let applied = deploy
        .deploy(&target, &mut AutoApprove, false)
        .expect("apply");
    assert_eq!(applied.created, vec!["bucket"]);
    assert!(state.join("acme-bucket").exists());

    let again = deploy
        .deploy(&target, &mut AutoApprove, false)
        .expect("second apply");
    assert!(again.plan.is_noop());
    assert!(!again.applied);
}
