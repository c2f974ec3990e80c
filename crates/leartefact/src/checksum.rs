use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{ArtifactError, Result};

const READ_CHUNK: usize = 64 * 1024;

/// Hash function behind a [`Checksum`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// BLAKE3, 32-byte digest. Default for bare hex strings.
    Blake3,
    /// SHA-256, 32-byte digest.
    Sha256,
}

impl ChecksumAlgorithm {
    fn prefix(self) -> &'static str {
        match self {
            Self::Blake3 => "blake3",
            Self::Sha256 => "sha256",
        }
    }
}

/// An expected content hash, supplied out-of-band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    digest: String,
}

impl Checksum {
    /// Parse `blake3:<hex>`, `sha256:<hex>`, or bare `<hex>` (BLAKE3).
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let (algorithm, hex_digest) = match trimmed.split_once(':') {
            Some((prefix, rest)) => {
                let algorithm = match prefix.to_ascii_lowercase().as_str() {
                    "blake3" => ChecksumAlgorithm::Blake3,
                    "sha256" | "sha-256" => ChecksumAlgorithm::Sha256,
                    _ => return Err(ArtifactError::InvalidChecksum(value.to_string())),
                };
                (algorithm, rest)
            }
            None => (ChecksumAlgorithm::Blake3, trimmed),
        };

        let digest = hex_digest.to_ascii_lowercase();
        match hex::decode(&digest) {
            Ok(bytes) if bytes.len() == 32 => Ok(Self { algorithm, digest }),
            _ => Err(ArtifactError::InvalidChecksum(value.to_string())),
        }
    }

    /// Checksum of `bytes` under `algorithm`.
    pub fn of_bytes(algorithm: ChecksumAlgorithm, bytes: &[u8]) -> Self {
        let digest = match algorithm {
            ChecksumAlgorithm::Blake3 => blake3::hash(bytes).to_hex().to_string(),
            ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
        };
        Self { algorithm, digest }
    }

    /// Stream the file at `path` through `algorithm`.
    pub fn of_file(algorithm: ChecksumAlgorithm, path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(|err| ArtifactError::io(path, err))?;
        let mut buf = vec![0u8; READ_CHUNK];
        let mut blake = blake3::Hasher::new();
        let mut sha = Sha256::new();

        loop {
            let read = file
                .read(&mut buf)
                .map_err(|err| ArtifactError::io(path, err))?;
            if read == 0 {
                break;
            }
            match algorithm {
                ChecksumAlgorithm::Blake3 => {
                    blake.update(&buf[..read]);
                }
                ChecksumAlgorithm::Sha256 => sha.update(&buf[..read]),
            }
        }

        let digest = match algorithm {
            ChecksumAlgorithm::Blake3 => blake.finalize().to_hex().to_string(),
            ChecksumAlgorithm::Sha256 => hex::encode(sha.finalize()),
        };
        Ok(Self { algorithm, digest })
    }

    /// Hash function.
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Lower-case hex digest.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Checksum of the file at `path` computed with this checksum's algorithm.
    pub fn compute(&self, path: &Path) -> Result<Self> {
        Self::of_file(self.algorithm, path)
    }

    /// True when the file at `path` hashes to this checksum.
    pub fn matches_file(&self, path: &Path) -> Result<bool> {
        Ok(self.compute(path)? == *self)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.prefix(), self.digest)
    }
}

impl std::str::FromStr for Checksum {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;

    // sha256("abc")
    const SHA256_ABC: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn sha256_matches_known_vector() {
        let sum = Checksum::of_bytes(ChecksumAlgorithm::Sha256, b"abc");
        assert_eq!(sum.digest(), SHA256_ABC);
        assert_eq!(sum, Checksum::parse(&format!("sha256:{SHA256_ABC}")).expect("parse"));
    }

    #[test]
    fn bare_hex_is_blake3() {
        let expected = blake3::hash(b"bundle").to_hex().to_string();
        let sum = Checksum::parse(&expected.to_ascii_uppercase()).expect("parse");
        assert_eq!(sum.algorithm(), ChecksumAlgorithm::Blake3);
        assert_eq!(sum.digest(), expected);
        assert_eq!(sum.to_string(), format!("blake3:{expected}"));
    }

    #[rstest]
    #[case("")]
    #[case("md5:900150983cd24fb0d6963f7d28e17f72")]
    #[case("sha256:abc")]
    #[case("blake3:zz")]
    fn rejects_malformed_checksums(#[case] input: &str) {
        assert!(matches!(
            Checksum::parse(input),
            Err(ArtifactError::InvalidChecksum(_))
        ));
    }

    #[rstest]
    #[case(ChecksumAlgorithm::Blake3)]
    #[case(ChecksumAlgorithm::Sha256)]
    fn file_hash_equals_in_memory_hash(#[case] algorithm: ChecksumAlgorithm) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bundle.tar.gz");
        let content = vec![7u8; READ_CHUNK * 2 + 13];
        fs::write(&path, &content).expect("write");

        let expected = Checksum::of_bytes(algorithm, &content);
        assert!(expected.matches_file(&path).expect("hash"));
        fs::write(&path, b"truncated").expect("rewrite");
        assert!(!expected.matches_file(&path).expect("hash"));
    }
}
