//! An in-memory `ArtifactStore` for unit tests that don't need real files.

use super::{sha256_hex, worm_path, ArtifactStore, Error, PutResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryArtifactStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<PutResult, Error> {
        self.blobs
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
        Ok(PutResult {
            path: path.to_string(),
            sha256: sha256_hex(bytes),
            size_bytes: bytes.len() as u64,
        })
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, Error> {
        self.blobs
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    async fn exists(&self, path: &str) -> Result<bool, Error> {
        Ok(self.blobs.lock().unwrap().contains_key(path))
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
        let needle = format!("sealed_manifest_{}_{}_", correlation_id, sequence);
        Ok(self
            .blobs
            .lock()
            .unwrap()
            .keys()
            .any(|k| k.starts_with("immutable/worm/") && k.contains(&needle)))
    }
}
