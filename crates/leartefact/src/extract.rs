//! Bundle extraction
//!
//! Unpacks a gzip tarball into a fresh directory, dropping the archive's
//! top-level directory. Entries that would land outside the destination are
//! refused, and scripts come out executable.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use serde::Serialize;
use tar::Archive;
use tracing::debug;

use crate::{ArtifactError, Result};

/// Mode applied to extracted scripts.
pub const SCRIPT_MODE: u32 = 0o755;

/// What an extraction produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractSummary {
    /// Regular files written.
    pub files: usize,
    /// Scripts marked executable, relative to the destination.
    pub scripts: Vec<PathBuf>,
}

/// Extract `archive` into `dest`, replacing any previous contents.
///
/// The tree is unpacked into a sibling staging directory first and only
/// moved into place once every entry was accepted.
pub fn extract_bundle(archive: &Path, dest: &Path) -> Result<ExtractSummary> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| ArtifactError::io(parent, err))?;
    }

    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bundle".to_string());
    let staging = dest.with_file_name(format!(".{name}.extracting"));
    if staging.exists() {
        fs::remove_dir_all(&staging).map_err(|err| ArtifactError::io(&staging, err))?;
    }
    fs::create_dir_all(&staging).map_err(|err| ArtifactError::io(&staging, err))?;

    let summary = match unpack_into(archive, &staging) {
        Ok(summary) => summary,
        Err(err) => {
            let _ = fs::remove_dir_all(&staging);
            return Err(err);
        }
    };

    if dest.exists() {
        fs::remove_dir_all(dest).map_err(|err| ArtifactError::io(dest, err))?;
    }
    fs::rename(&staging, dest).map_err(|err| ArtifactError::io(dest, err))?;

    debug!(
        archive = %archive.display(),
        dest = %dest.display(),
        files = summary.files,
        "bundle extracted"
    );
    Ok(summary)
}

fn unpack_into(archive: &Path, root: &Path) -> Result<ExtractSummary> {
    let malformed = |source: std::io::Error| ArtifactError::Archive {
        path: archive.to_path_buf(),
        source,
    };

    let file = File::open(archive).map_err(|err| ArtifactError::io(archive, err))?;
    let mut tarball = Archive::new(GzDecoder::new(file));
    tarball.set_preserve_permissions(false);
    tarball.set_preserve_ownerships(false);

    let mut summary = ExtractSummary::default();
    for entry in tarball.entries().map_err(malformed)? {
        let mut entry = entry.map_err(malformed)?;
        let raw = entry.path().map_err(malformed)?.into_owned();
        let Some(relative) = strip_top_level(&raw)? else {
            continue;
        };

        let kind = entry.header().entry_type();
        if kind.is_hard_link() {
            return Err(ArtifactError::UnsafeEntry(raw.display().to_string()));
        }
        if kind.is_symlink() {
            let link = entry.link_name().map_err(malformed)?.map(|l| l.into_owned());
            if link.as_deref().map_or(true, |l| !is_contained(l)) {
                return Err(ArtifactError::UnsafeEntry(raw.display().to_string()));
            }
        }

        let target = root.join(&relative);
        if kind.is_dir() {
            fs::create_dir_all(&target).map_err(|err| ArtifactError::io(&target, err))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|err| ArtifactError::io(parent, err))?;
        }
        entry.unpack(&target).map_err(malformed)?;

        if kind.is_file() {
            summary.files += 1;
            if is_script(&target)? {
                make_executable(&target)?;
                summary.scripts.push(relative);
            }
        }
    }

    Ok(summary)
}

/// Drop the first path component, `.` included. `None` for the top-level
/// entry itself.
fn strip_top_level(path: &Path) -> Result<Option<PathBuf>> {
    if !is_contained(path) {
        return Err(ArtifactError::UnsafeEntry(path.display().to_string()));
    }
    let mut components = path.components();
    components.next();
    let rest = components.as_path();
    Ok((!rest.as_os_str().is_empty()).then(|| rest.to_path_buf()))
}

fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn is_script(path: &Path) -> Result<bool> {
    if path.extension().is_some_and(|ext| ext == "sh") {
        return Ok(true);
    }
    let mut head = [0u8; 2];
    let mut file = File::open(path).map_err(|err| ArtifactError::io(path, err))?;
    let read = file
        .read(&mut head)
        .map_err(|err| ArtifactError::io(path, err))?;
    Ok(read == 2 && &head == b"#!")
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(SCRIPT_MODE))
        .map_err(|err| ArtifactError::io(path, err))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use rstest::rstest;
    use tar::{EntryType, Header};

    fn gzip_tar(build: impl FnOnce(&mut tar::Builder<GzEncoder<Vec<u8>>>)) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        build(&mut builder);
        builder
            .into_inner()
            .expect("finish tar")
            .finish()
            .expect("finish gzip")
    }

    fn add_file(builder: &mut tar::Builder<GzEncoder<Vec<u8>>>, path: &str, data: &[u8]) {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, path, data)
            .expect("append");
    }

    /// Entry whose name is stored byte for byte, bypassing path normalization.
    fn add_raw(
        builder: &mut tar::Builder<GzEncoder<Vec<u8>>>,
        raw_name: &str,
        kind: EntryType,
        data: &[u8],
    ) {
        let mut header = Header::new_old();
        header.as_old_mut().name[..raw_name.len()].copy_from_slice(raw_name.as_bytes());
        header.set_entry_type(kind);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, data).expect("append raw");
    }

    fn write_archive(dir: &Path, bytes: &[u8]) -> PathBuf {
        let path = dir.join("bundle.tar.gz");
        fs::write(&path, bytes).expect("write archive");
        path
    }

    #[test]
    fn strips_top_level_and_marks_scripts_executable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = write_archive(
            dir.path(),
            &gzip_tar(|b| {
                let mut top = Header::new_gnu();
                top.set_entry_type(EntryType::Directory);
                top.set_size(0);
                top.set_mode(0o755);
                b.append_data(&mut top, "bundle-1.4/", std::io::empty())
                    .expect("dir");
                add_file(b, "bundle-1.4/phases/01-swap.sh", b"echo swap\n");
                add_file(b, "bundle-1.4/bin/certctl", b"#!/usr/bin/env python3\n");
                add_file(b, "bundle-1.4/README", b"docs\n");
            }),
        );
        let dest = dir.path().join("work");

        let summary = extract_bundle(&archive, &dest).expect("extract");

        assert_eq!(summary.files, 3);
        assert_eq!(
            summary.scripts,
            vec![PathBuf::from("phases/01-swap.sh"), PathBuf::from("bin/certctl")]
        );
        assert!(dest.join("README").is_file());
        assert!(!dest.join("bundle-1.4").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = |p: &str| {
                fs::metadata(dest.join(p))
                    .expect("meta")
                    .permissions()
                    .mode()
                    & 0o777
            };
            assert_eq!(mode("phases/01-swap.sh"), SCRIPT_MODE);
            assert_eq!(mode("bin/certctl"), SCRIPT_MODE);
            assert_ne!(mode("README") & 0o111, 0o111);
        }
    }

    #[test]
    fn dot_prefixed_archive_keeps_its_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = write_archive(
            dir.path(),
            &gzip_tar(|b| {
                add_raw(b, "./", EntryType::Directory, b"");
                add_raw(b, "./setup.sh", EntryType::Regular, b"echo setup\n");
                add_raw(b, "./phases/", EntryType::Directory, b"");
                add_raw(b, "./phases/01-swap.sh", EntryType::Regular, b"echo swap\n");
            }),
        );
        let dest = dir.path().join("work");

        let summary = extract_bundle(&archive, &dest).expect("extract");

        assert_eq!(summary.files, 2);
        assert_eq!(
            summary.scripts,
            vec![PathBuf::from("setup.sh"), PathBuf::from("phases/01-swap.sh")]
        );
        assert!(dest.join("setup.sh").is_file());
        assert!(dest.join("phases/01-swap.sh").is_file());
        assert!(!dest.join("01-swap.sh").exists());
    }

    #[test]
    fn replaces_previous_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("work");
        fs::create_dir_all(&dest).expect("mkdir");
        fs::write(dest.join("stale"), b"old").expect("write");

        let archive = write_archive(
            dir.path(),
            &gzip_tar(|b| add_file(b, "top/fresh", b"new")),
        );
        extract_bundle(&archive, &dest).expect("extract");

        assert!(dest.join("fresh").exists());
        assert!(!dest.join("stale").exists());
    }

    #[rstest]
    #[case("top/../../etc/cron.d/evil")]
    #[case("/etc/passwd")]
    fn refuses_escaping_entries(#[case] raw_name: &str) {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = write_archive(dir.path(), &gzip_tar(|b| add_raw(b, raw_name, EntryType::Regular, b"x")));
        let dest = dir.path().join("work");

        let err = extract_bundle(&archive, &dest).expect_err("must refuse");

        assert!(matches!(err, ArtifactError::UnsafeEntry(_)));
        assert!(!dest.exists());
    }

    #[test]
    fn garbage_is_an_archive_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = write_archive(dir.path(), b"definitely not gzip");
        let err = extract_bundle(&archive, &dir.path().join("work")).expect_err("must fail");
        assert!(err.is_integrity());
    }
}
