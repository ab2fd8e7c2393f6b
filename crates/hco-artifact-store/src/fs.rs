//! The default `ArtifactStore`: a filesystem-rooted implementation with
//! atomic tmp-write-fsync-rename semantics.

use super::{sha256_hex, worm_path, ArtifactStore, Error, PutResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Writes artifacts under a configured root directory, matching the
/// `<root>/...` persisted-state path layout
pub struct FilesystemArtifactStore {
    root: PathBuf,
}

impl FilesystemArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Error> {
        let parent = path.parent().expect("artifact path has a parent");
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| Error::Io {
                path: path.display().to_string(),
                source,
            })?;

        let tmp_path = parent.join(format!(
            ".{}.tmp-{}",
            path.file_name().unwrap().to_string_lossy(),
            uuid::Uuid::new_v4()
        ));

        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|source| Error::Io {
                path: tmp_path.display().to_string(),
                source,
            })?;
        file.write_all(bytes).await.map_err(|source| Error::Io {
            path: tmp_path.display().to_string(),
            source,
        })?;
        file.sync_all().await.map_err(|source| Error::Io {
            path: tmp_path.display().to_string(),
            source,
        })?;
        drop(file);

        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|source| Error::Io {
                path: path.display().to_string(),
                source,
            })?;

        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for FilesystemArtifactStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<PutResult, Error> {
        let resolved = self.resolve(path);
        Self::write_atomic(&resolved, bytes).await?;

        tracing::debug!(path, size = bytes.len(), "wrote artifact");

        Ok(PutResult {
            path: path.to_string(),
            sha256: sha256_hex(bytes),
            size_bytes: bytes.len() as u64,
        })
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, Error> {
        let resolved = self.resolve(path);
        tokio::fs::read(&resolved)
            .await
            .map_err(|source| match source.kind() {
                std::io::ErrorKind::NotFound => Error::NotFound(path.to_string()),
                _ => Error::Io {
                    path: path.to_string(),
                    source,
                },
            })
    }

    async fn exists(&self, path: &str) -> Result<bool, Error> {
        Ok(tokio::fs::metadata(self.resolve(path)).await.is_ok())
    }

    async fn seal(
        &self,
        correlation_id: &str,
        sequence: u64,
        bytes: &[u8],
        sealed_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<PutResult, Error> {
        let path = worm_path(correlation_id, sequence, sealed_at);
        if self.exists(&path).await? {
            return Err(Error::AlreadySealed(path));
        }
        self.put(&path, bytes).await
    }

    async fn is_sealed(&self, correlation_id: &str, sequence: u64) -> Result<bool, Error> {
        // The timestamp component of the WORM path makes an exact match
        // impossible without it; search the day's directory for a prefix
        // match instead, which is sufficient since sequence numbers are
        // unique per correlation.
        let prefix = format!("sealed_manifest_{}_{}_", correlation_id, sequence);
        let dir = self.root.join("immutable/worm");
        let Ok(mut days) = tokio::fs::read_dir(&dir).await else {
            return Ok(false);
        };
        while let Ok(Some(day)) = days.next_entry().await {
            let Ok(mut files) = tokio::fs::read_dir(day.path()).await else {
                continue;
            };
            while let Ok(Some(file)) = files.next_entry().await {
                if file.file_name().to_string_lossy().starts_with(&prefix) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips_and_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemArtifactStore::new(dir.path());

        let result = store.put("matter/acme/GDC/a@x.com/000000_file.eml", b"hello").await.unwrap();
        assert_eq!(result.size_bytes, 5);
        assert_eq!(result.sha256, sha256_hex(b"hello"));

        let read_back = store.get("matter/acme/GDC/a@x.com/000000_file.eml").await.unwrap();
        assert_eq!(read_back, b"hello");
        assert!(store.exists("matter/acme/GDC/a@x.com/000000_file.eml").await.unwrap());
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemArtifactStore::new(dir.path());
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn seal_is_forbidden_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemArtifactStore::new(dir.path());
        let ts = chrono::Utc::now();

        store.seal("corr-1", 1, b"manifest body", ts).await.unwrap();
        let err = store.seal("corr-1", 1, b"manifest body", ts).await.unwrap_err();
        assert!(matches!(err, Error::AlreadySealed(_)));

        assert!(store.is_sealed("corr-1", 1).await.unwrap());
        assert!(!store.is_sealed("corr-1", 2).await.unwrap());
    }
}
