//! C9: Manifest Generator — builds, hashes, optionally signs, and seals
//! the per-job chain-of-custody record.
//!
//! Hashing follows a "zero the placeholders, then hash" two-pass scheme:
//! `items_hash` is computed over the canonical serialization of `items`
//! alone, then `manifest_hash` over the whole structure with `signature`,
//! `manifest_hash`, and `items_hash` zeroed out, matching the two-pass scheme described above.
//! Signing sits behind [`ManifestSigner`] so a deployment without a
//! configured key gets [`UnsignedSigner`] and one with a shared secret
//! gets [`HmacSigner`] — `hmac`+`sha2` rather than a new asymmetric-crypto
//! dependency (see the root DESIGN.md for why).

use chrono::{DateTime, Utc};
use hco_artifact_store::ArtifactStore;
use hco_models::entities::{CollectedItem, Job, JobType, Route};
use hco_store::MetadataStore;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("manifest {0} already sealed")]
    AlreadySealed(Uuid),
    #[error(transparent)]
    ArtifactStore(#[from] hco_artifact_store::Error),
    #[error(transparent)]
    Store(#[from] hco_store::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// `ManifestEntry`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestEntry {
    pub source_item_id: String,
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_date: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
    pub size_bytes: i64,
    pub sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    pub is_successful: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub sequence: i64,
    pub custodian: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Totals {
    pub items: i64,
    pub successful: i64,
    pub failed: i64,
    pub bytes: i64,
    pub estimated_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Integrity {
    pub hash_algo: String,
    pub items_hash: String,
    pub manifest_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_algo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_cert_thumbprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub immutable_policy_id: Option<String>,
    pub worm_compliant: bool,
}

/// The per-job chain-of-custody manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub manifest_id: Uuid,
    pub job_id: Uuid,
    pub matter_id: i64,
    pub custodian: String,
    pub job_type: JobType,
    pub route: Route,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
    pub totals: Totals,
    pub items: Vec<ManifestEntry>,
    pub integrity: Integrity,
}

/// `VerificationResult ∈ {Valid, Invalid, Inconclusive, Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum VerificationResult {
    Valid,
    Invalid,
    Inconclusive,
    Error,
}

/// Signs/verifies a detached signature over `manifest_hash`. The default
/// [`UnsignedSigner`] leaves `signature`/`signature_algo` unset; a
/// configured deployment swaps in [`HmacSigner`].
pub trait ManifestSigner: Send + Sync {
    /// Returns `(signature_algo, signature_hex)`, or `None` if unconfigured.
    fn sign(&self, manifest_hash: &str) -> Option<(String, String)>;

    /// Verifies a previously produced signature. `Ok(true)` only for a
    /// match; returns `Ok(false)` on mismatch, not an error.
    fn verify(&self, manifest_hash: &str, algo: &str, signature_hex: &str) -> bool;
}

pub struct UnsignedSigner;

impl ManifestSigner for UnsignedSigner {
    fn sign(&self, _manifest_hash: &str) -> Option<(String, String)> {
        None
    }

    fn verify(&self, _manifest_hash: &str, _algo: &str, _signature_hex: &str) -> bool {
        false
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Detached HMAC-SHA256 signature over `manifest_hash`, keyed by a shared
/// secret. Chosen instead of an asymmetric scheme to avoid introducing a
/// new crypto dependency beyond what the workspace already carries
/// (`hmac`/`sha2`, used elsewhere for webhook signing).
pub struct HmacSigner {
    key: Vec<u8>,
}

impl HmacSigner {
    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }
}

impl ManifestSigner for HmacSigner {
    fn sign(&self, manifest_hash: &str) -> Option<(String, String)> {
        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(manifest_hash.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        Some(("HMAC-SHA256".to_string(), signature))
    }

    fn verify(&self, manifest_hash: &str, algo: &str, signature_hex: &str) -> bool {
        if algo != "HMAC-SHA256" {
            return false;
        }
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
            return false;
        };
        mac.update(manifest_hash.as_bytes());
        let Ok(expected) = hex::decode(signature_hex) else {
            return false;
        };
        mac.verify_slice(&expected).is_ok()
    }
}

/// Canonical serialization: UTF-8, fixed key order, no insignificant
/// whitespace. Struct field order is fixed by `derive`,
/// and the workspace's `serde_json` is built without `preserve_order`, so
/// nested `Value::Object`s serialize with sorted keys — both give a
/// deterministic byte stream suitable for hashing.
fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn sha256_hex(bytes: &[u8]) -> String {
    hco_artifact_store::sha256_hex(bytes)
}

fn zeroed_hash() -> String {
    "0".repeat(64)
}

/// Builds, persists, seals, and verifies per-job manifests.
pub struct ManifestGenerator {
    artifacts: Arc<dyn ArtifactStore>,
    signer: Arc<dyn ManifestSigner>,
}

impl ManifestGenerator {
    pub fn new(artifacts: Arc<dyn ArtifactStore>, signer: Arc<dyn ManifestSigner>) -> Self {
        Self { artifacts, signer }
    }

    /// Step 1-3: stream `items` (already ordered by `(shard_index, id)` by
    /// the caller step 1), emit `ManifestEntry`s with a
    /// monotonically increasing `sequence`, and compute both hashes.
    #[tracing::instrument(skip(self, job, items), fields(job_id = %job.id), err)]
    pub fn build(
        &self,
        manifest_id: Uuid,
        job: &Job,
        items: &[CollectedItem],
        correlation_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Manifest> {
        let mut entries = Vec::with_capacity(items.len());
        let mut successful = 0i64;
        let mut failed = 0i64;
        let mut bytes = 0i64;

        for (index, item) in items.iter().enumerate() {
            if item.is_successful {
                successful += 1;
            } else {
                failed += 1;
            }
            bytes += item.size_bytes;

            entries.push(ManifestEntry {
                source_item_id: item.source_item_id.clone(),
                item_type: item.item_type.clone(),
                subject: item.subject.clone(),
                from: item.from.clone(),
                to: item.to.clone(),
                item_date: item.item_date,
                collected_at: item.collected_at,
                size_bytes: item.size_bytes,
                sha256: item.sha256.clone(),
                artifact_path: item.artifact_path.clone(),
                is_successful: item.is_successful,
                error: item.error.clone(),
                sequence: index as i64 + 1,
                custodian: job.custodian_email.clone(),
                correlation_id,
            });
        }

        let items_hash = sha256_hex(&canonical_bytes(&entries)?);

        let totals = Totals {
            items: entries.len() as i64,
            successful,
            failed,
            bytes,
            estimated_bytes: job.estimated_bytes,
        };

        let mut manifest = Manifest {
            manifest_id,
            job_id: job.id,
            matter_id: job.matter_id,
            custodian: job.custodian_email.clone(),
            job_type: job.job_type,
            route: job.route,
            started_at: job.started_at,
            ended_at: job.ended_at,
            created_at: now,
            finalized_at: None,
            totals,
            items: entries,
            integrity: Integrity {
                hash_algo: "SHA-256".to_string(),
                items_hash: items_hash.clone(),
                manifest_hash: zeroed_hash(),
                signature_algo: None,
                signature: None,
                signing_cert_thumbprint: None,
                immutable_policy_id: None,
                worm_compliant: false,
            },
        };

        // Hash the full structure with signature/manifest_hash/items_hash
        // zeroed, then fill in the real values and sign.
        let manifest_hash = sha256_hex(&canonical_bytes(&manifest)?);
        manifest.integrity.manifest_hash = manifest_hash.clone();
        if let Some((algo, signature)) = self.signer.sign(&manifest_hash) {
            manifest.integrity.signature_algo = Some(algo);
            manifest.integrity.signature = Some(signature);
        }

        Ok(manifest)
    }

    /// Convenience wrapper around [`Self::build`] that streams the job's
    /// `CollectedItem` rows from the store ("ordered by
    /// `(shard_index, id)`", already guaranteed by
    /// `MetadataStore::list_items_for_job`).
    pub async fn build_for_job(
        &self,
        store: &dyn MetadataStore,
        manifest_id: Uuid,
        job: &Job,
        correlation_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Manifest> {
        let items = store.list_items_for_job(job.id).await?;
        self.build(manifest_id, job, &items, correlation_id, now)
    }

    fn json_path(job_id: Uuid, manifest_id: Uuid) -> String {
        format!("manifests/{job_id}/{manifest_id}.json")
    }

    fn csv_path(job_id: Uuid, manifest_id: Uuid) -> String {
        format!("manifests/{job_id}/{manifest_id}.csv")
    }

    /// Step 4: persist JSON and CSV forms via C2.
    pub async fn persist(&self, manifest: &Manifest) -> Result<(String, String)> {
        let json_bytes = serde_json::to_vec_pretty(manifest)?;
        let json_path = Self::json_path(manifest.job_id, manifest.manifest_id);
        self.artifacts.put(&json_path, &json_bytes).await?;

        let csv_bytes = Self::render_csv(manifest)?;
        let csv_path = Self::csv_path(manifest.job_id, manifest.manifest_id);
        self.artifacts.put(&csv_path, &csv_bytes).await?;

        Ok((json_path, csv_path))
    }

    fn render_csv(manifest: &Manifest) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new().from_writer(vec![]);
        writer.write_record([
            "source_item_id",
            "item_type",
            "subject",
            "collected_at",
            "size_bytes",
            "sha256",
            "is_successful",
            "error",
            "sequence",
        ])?;
        for entry in &manifest.items {
            writer.write_record([
                entry.source_item_id.as_str(),
                entry.item_type.as_str(),
                entry.subject.as_deref().unwrap_or(""),
                &entry.collected_at.to_rfc3339(),
                &entry.size_bytes.to_string(),
                entry.sha256.as_str(),
                &entry.is_successful.to_string(),
                entry.error.as_deref().unwrap_or(""),
                &entry.sequence.to_string(),
            ])?;
        }
        Ok(writer.into_inner().map_err(|e| e.into_error())?)
    }

    /// Step 5: seal the manifest's JSON form into the WORM namespace.
    /// Idempotent-forbidden: a second `seal` for the same `manifest_id`
    /// returns [`Error::AlreadySealed`].
    pub async fn seal(&self, manifest: &mut Manifest, now: DateTime<Utc>) -> Result<String> {
        let sequence = manifest.manifest_id.as_u128() as u64;
        if self
            .artifacts
            .is_sealed(&manifest.job_id.to_string(), sequence)
            .await?
        {
            return Err(Error::AlreadySealed(manifest.manifest_id));
        }
        manifest.finalized_at = Some(now);
        manifest.integrity.worm_compliant = true;
        manifest.integrity.manifest_hash = zeroed_hash();
        manifest.integrity.signature = None;
        let manifest_hash = sha256_hex(&canonical_bytes(&*manifest)?);
        manifest.integrity.manifest_hash = manifest_hash.clone();
        if let Some((algo, signature)) = self.signer.sign(&manifest_hash) {
            manifest.integrity.signature_algo = Some(algo);
            manifest.integrity.signature = Some(signature);
        }

        let json_bytes = serde_json::to_vec_pretty(manifest)?;
        let result = self
            .artifacts
            .seal(&manifest.job_id.to_string(), sequence, &json_bytes, now)
            .await?;
        Ok(result.path)
    }

    /// `verify(manifest_id)`: recomputes `manifest_hash`, checks any
    /// signature, and confirms WORM storage presence.
    pub async fn verify(&self, manifest: &Manifest) -> Result<VerificationResult> {
        let mut recomputed = manifest.clone();
        recomputed.integrity.manifest_hash = zeroed_hash();
        recomputed.integrity.signature = None;
        let expected_hash = sha256_hex(&canonical_bytes(&recomputed)?);

        if expected_hash != manifest.integrity.manifest_hash {
            return Ok(VerificationResult::Invalid);
        }

        if let (Some(algo), Some(signature)) = (
            &manifest.integrity.signature_algo,
            &manifest.integrity.signature,
        ) {
            if !self.signer.verify(&manifest.integrity.manifest_hash, algo, signature) {
                return Ok(VerificationResult::Invalid);
            }
        }

        if manifest.integrity.worm_compliant {
            let sequence = manifest.manifest_id.as_u128() as u64;
            match self
                .artifacts
                .is_sealed(&manifest.job_id.to_string(), sequence)
                .await
            {
                Ok(true) => Ok(VerificationResult::Valid),
                Ok(false) => Ok(VerificationResult::Inconclusive),
                Err(_) => Ok(VerificationResult::Error),
            }
        } else {
            Ok(VerificationResult::Valid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hco_artifact_store::memory::InMemoryArtifactStore;
    use hco_models::entities::JobStatus;

    fn sample_job() -> Job {
        Job {
            id: Uuid::new_v4(),
            matter_id: 1,
            custodian_email: "jdoe@example.com".to_string(),
            job_type: JobType::Email,
            status: JobStatus::Running,
            route: Route::PerItemApi,
            priority: 0,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            ended_at: None,
            estimated_bytes: 1000,
            estimated_items: 2,
            actual_bytes: 0,
            actual_items: 0,
            output_prefix: "jdoe".to_string(),
            manifest_hash: None,
            error: None,
        }
    }

    fn sample_items(shard_id: Uuid) -> Vec<CollectedItem> {
        vec![
            CollectedItem {
                id: Uuid::new_v4(),
                shard_id,
                source_item_id: "msg-1".to_string(),
                item_type: "Email".to_string(),
                subject: Some("hello".to_string()),
                from: None,
                to: None,
                item_date: None,
                collected_at: Utc::now(),
                size_bytes: 500,
                sha256: "a".repeat(64),
                artifact_path: Some("items/msg-1".to_string()),
                is_successful: true,
                error: None,
            },
            CollectedItem {
                id: Uuid::new_v4(),
                shard_id,
                source_item_id: "msg-2".to_string(),
                item_type: "Email".to_string(),
                subject: None,
                from: None,
                to: None,
                item_date: None,
                collected_at: Utc::now(),
                size_bytes: 500,
                sha256: "b".repeat(64),
                artifact_path: Some("items/msg-2".to_string()),
                is_successful: false,
                error: Some("timeout".to_string()),
            },
        ]
    }

    fn generator() -> ManifestGenerator {
        ManifestGenerator::new(
            Arc::new(InMemoryArtifactStore::new()),
            Arc::new(UnsignedSigner),
        )
    }

    #[test]
    fn build_assigns_monotonic_sequence_and_totals() {
        let gen = generator();
        let job = sample_job();
        let items = sample_items(Uuid::new_v4());
        let manifest = gen
            .build(Uuid::new_v4(), &job, &items, None, Utc::now())
            .unwrap();

        assert_eq!(manifest.items[0].sequence, 1);
        assert_eq!(manifest.items[1].sequence, 2);
        assert_eq!(manifest.totals.items, 2);
        assert_eq!(manifest.totals.successful, 1);
        assert_eq!(manifest.totals.failed, 1);
        assert_eq!(manifest.totals.bytes, 1000);
        assert_ne!(manifest.integrity.manifest_hash, zeroed_hash());
        assert_ne!(manifest.integrity.items_hash, zeroed_hash());
    }

    #[test]
    fn build_is_deterministic_for_identical_inputs() {
        let gen = generator();
        let job = sample_job();
        let shard_id = Uuid::new_v4();
        let items = sample_items(shard_id);
        let manifest_id = Uuid::new_v4();
        let now = Utc::now();

        let a = gen.build(manifest_id, &job, &items, None, now).unwrap();
        let b = gen.build(manifest_id, &job, &items, None, now).unwrap();
        assert_eq!(a.integrity.manifest_hash, b.integrity.manifest_hash);
        assert_eq!(a.integrity.items_hash, b.integrity.items_hash);
    }

    #[tokio::test]
    async fn persist_writes_json_and_csv() {
        let gen = generator();
        let job = sample_job();
        let items = sample_items(Uuid::new_v4());
        let manifest = gen
            .build(Uuid::new_v4(), &job, &items, None, Utc::now())
            .unwrap();

        let (json_path, csv_path) = gen.persist(&manifest).await.unwrap();
        assert!(gen.artifacts.exists(&json_path).await.unwrap());
        assert!(gen.artifacts.exists(&csv_path).await.unwrap());
    }

    #[tokio::test]
    async fn seal_is_forbidden_after_success() {
        let gen = generator();
        let job = sample_job();
        let items = sample_items(Uuid::new_v4());
        let mut manifest = gen
            .build(Uuid::new_v4(), &job, &items, None, Utc::now())
            .unwrap();

        gen.seal(&mut manifest, Utc::now()).await.unwrap();
        assert!(manifest.integrity.worm_compliant);

        let err = gen.seal(&mut manifest, Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::AlreadySealed(_)));
    }

    #[tokio::test]
    async fn verify_after_seal_is_valid() {
        let gen = generator();
        let job = sample_job();
        let items = sample_items(Uuid::new_v4());
        let mut manifest = gen
            .build(Uuid::new_v4(), &job, &items, None, Utc::now())
            .unwrap();

        gen.seal(&mut manifest, Utc::now()).await.unwrap();
        assert!(manifest.integrity.worm_compliant);
        assert!(manifest.finalized_at.is_some());

        assert_eq!(gen.verify(&manifest).await.unwrap(), VerificationResult::Valid);
    }

    #[tokio::test]
    async fn verify_detects_tampered_totals() {
        let gen = generator();
        let job = sample_job();
        let items = sample_items(Uuid::new_v4());
        let mut manifest = gen
            .build(Uuid::new_v4(), &job, &items, None, Utc::now())
            .unwrap();

        assert_eq!(gen.verify(&manifest).await.unwrap(), VerificationResult::Valid);

        manifest.totals.bytes += 1;
        assert_eq!(gen.verify(&manifest).await.unwrap(), VerificationResult::Invalid);
    }

    #[tokio::test]
    async fn build_for_job_streams_items_from_the_store() {
        use hco_store::fake::FakeStore;

        let store = FakeStore::new();
        let job = sample_job();
        store.create_job(job.clone()).await.unwrap();
        let shard_id = Uuid::new_v4();
        for item in sample_items(shard_id) {
            store.insert_items(vec![item]).await.unwrap();
        }

        let gen = generator();
        let manifest = gen
            .build_for_job(&store, Uuid::new_v4(), &job, None, Utc::now())
            .await
            .unwrap();
        assert_eq!(manifest.totals.items, 2);
    }

    #[test]
    fn hmac_signer_round_trips_and_rejects_tampering() {
        let signer = HmacSigner::new(b"shared-secret".to_vec());
        let (algo, signature) = signer.sign("deadbeef").unwrap();
        assert!(signer.verify("deadbeef", &algo, &signature));
        assert!(!signer.verify("tampered", &algo, &signature));
    }
}
