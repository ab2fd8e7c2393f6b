//! C2: ArtifactStore — named-blob persistence with atomic write and
//! hash-on-write, plus a write-once-read-many (WORM) namespace for sealed
//! manifests.
//!
//! The concrete storage adapter (filesystem vs. blob) is pluggable; this
//! crate provides the `ArtifactStore` capability trait plus a filesystem
//! implementation as the default, following an explicit-capability-passed-
//! by-reference shape with no ambient state.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub mod fs;

#[cfg(any(test, feature = "testing"))]
pub mod memory;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("artifact already sealed and immutable: {0}")]
    AlreadySealed(String),
    #[error("io error writing artifact {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// The outcome of a successful write: the path it was written under, its
/// content hash,
/// and its size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    pub path: String,
    pub sha256: String,
    pub size_bytes: u64,
}

/// A named-blob store with atomic writes and content hashing.
///
/// Implementations MUST make `put` atomic (write-to-tmp, fsync, rename) so a
/// reader never observes a partially written artifact, and MUST compute the
/// SHA-256 digest in the same pass as the write, "ArtifactStore
/// writes are atomic... and content-addressed for manifests".
#[async_trait]
pub trait ArtifactStore: Send + Sync + 'static {
    /// Write `bytes` under `path`, replacing any prior contents.
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<PutResult, Error>;

    /// Read back the full contents previously written under `path`.
    async fn get(&self, path: &str) -> Result<Vec<u8>, Error>;

    /// Whether an artifact exists under `path`.
    async fn exists(&self, path: &str) -> Result<bool, Error>;

    /// Seal `bytes` into the immutable WORM namespace, keyed by
    /// `correlation_id` and a monotonically increasing `sequence` so repeat
    /// calls for the same correlation/sequence are rejected rather than
    /// silently overwriting. Returns the path the sealed copy was written under.
    async fn seal(
        &self,
        correlation_id: &str,
        sequence: u64,
        bytes: &[u8],
        sealed_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<PutResult, Error>;

    /// Whether a sealed artifact already exists for this correlation/sequence.
    async fn is_sealed(&self, correlation_id: &str, sequence: u64) -> Result<bool, Error>;
}

/// Compute the SHA-256 digest of a byte slice as lowercase hex, matching the
/// `sha256` field format used throughout §3/§4.9/§6.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// The well-known WORM path layout:
/// `<root>/immutable/worm/<YYYY-MM-DD>/sealed_manifest_<correlation>_<seq>_<ts>.json`.
pub fn worm_path(correlation_id: &str, sequence: u64, sealed_at: chrono::DateTime<chrono::Utc>) -> String {
    format!(
        "immutable/worm/{}/sealed_manifest_{}_{}_{}.json",
        sealed_at.format("%Y-%m-%d"),
        correlation_id,
        sequence,
        sealed_at.timestamp()
    )
}

pub(crate) fn join(root: &Path, relative: &str) -> PathBuf {
    root.join(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_lowercase_64_chars() {
        let digest = sha256_hex(b"hello world");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(
            digest,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde"
        );
    }

    #[test]
    fn worm_path_matches_layout() {
        let ts = chrono::DateTime::parse_from_rfc3339("2024-03-05T10:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let p = worm_path("corr-1", 7, ts);
        assert!(p.starts_with("immutable/worm/2024-03-05/sealed_manifest_corr-1_7_"));
        assert!(p.ends_with(".json"));
    }
}
