//! C3: MetadataStore — the single capability through which every other
//! component reads and writes persistent state.
//!
//! `MetadataStore` is an `async_trait` rather than a concrete struct so
//! `hco-scheduler`, `hco-checkpoints`, `hco-manifest`, `hco-reconciler` and
//! `hco-orchestrator` depend on the capability, not on Postgres. There are
//! two implementations: [`postgres::PgMetadataStore`] (feature `postgres`)
//! backed by `sqlx`, and [`fake::FakeStore`] (feature `testing`, enabled by
//! default) — an in-memory double used throughout the workspace's test
//! suites.

pub mod error;
pub mod fake;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use error::{Error, Result};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hco_models::entities::{
    Checkpoint, CollectedItem, DeltaCursor, DeltaType, Job, JobLog, JobManifest, JobStatus,
    Matter, Shard,
};
use serde::Serialize;
use uuid::Uuid;

/// Result of a lease-mutating claim/extend/release/complete/fail call:
/// `false` means the caller's `lease_token` no longer matched the row (the
/// lease expired and was reaped, or another worker already completed it).
pub type LeaseOutcome = bool;

/// Outcome of an explicit `retry` call against a terminally `Failed` shard:
/// `retry(shard_id, reason) -> ok|exhausted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RetryOutcome {
    /// The shard was `Failed` and under its retry budget; it is now
    /// `Pending` again with `retry_count` incremented.
    Retried,
    /// The shard was `Failed` but already at `max_retries`; it remains
    /// terminally `Failed`.
    Exhausted,
    /// The shard was not in a `Failed` state, so there was nothing to retry.
    NotFailed,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create_matter(&self, matter: Matter) -> Result<()>;
    async fn get_matter(&self, id: i64) -> Result<Option<Matter>>;

    async fn create_job(&self, job: Job) -> Result<()>;
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>>;
    async fn update_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<()>;
    async fn update_job_actuals(&self, id: Uuid, actual_bytes: i64, actual_items: i64) -> Result<()>;
    async fn set_job_manifest_hash(&self, id: Uuid, manifest_hash: String) -> Result<()>;

    /// Persists a freshly planned set of shards for a job in one
    /// transaction.
    async fn insert_shards(&self, shards: Vec<Shard>) -> Result<()>;
    async fn get_shard(&self, id: Uuid) -> Result<Option<Shard>>;
    async fn list_shards_for_job(&self, job_id: Uuid) -> Result<Vec<Shard>>;

    /// Claims the highest-priority `Pending` shard for `worker_id`, issuing
    /// a fresh lease token valid for `lease_duration`.
    /// Returns `None` when no shard is claimable.
    async fn claim_next_shard(
        &self,
        worker_id: &str,
        lease_duration: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Shard>>;

    async fn extend_lease(
        &self,
        shard_id: Uuid,
        lease_token: Uuid,
        lease_duration: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome>;

    async fn update_shard_progress(
        &self,
        shard_id: Uuid,
        lease_token: Uuid,
        processed_bytes: i64,
        processed_items: i64,
        progress_pct: i16,
    ) -> Result<LeaseOutcome>;

    async fn complete_shard(
        &self,
        shard_id: Uuid,
        lease_token: Uuid,
        actual_bytes: i64,
        actual_items: i64,
        manifest_hash: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome>;

    /// Marks a shard failed. If `retry_count < max_retries`, transitions to
    /// `Retrying` and clears the lease so it becomes claimable again;
    /// otherwise transitions to the terminal `Failed` status.
    async fn fail_shard(
        &self,
        shard_id: Uuid,
        lease_token: Uuid,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome>;

    /// Voluntarily returns a shard to `Pending`, clearing its lease
    ///. Returns `false` if `lease_token` is stale.
    async fn release_shard(&self, shard_id: Uuid, lease_token: Uuid) -> Result<LeaseOutcome>;

    /// Explicitly retries a terminally `Failed` shard,
    /// as distinct from the automatic retry-on-failure path of
    /// `fail_shard`/`reap_expired_leases`.
    async fn retry_shard(&self, shard_id: Uuid, reason: String) -> Result<RetryOutcome>;

    /// Reclaims every shard whose lease has expired, resetting it to
    /// `Pending` (or `Failed` if retries are exhausted) so it can be
    /// reclaimed or reported. Returns the shards that were reaped.
    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Shard>>;

    async fn create_checkpoint(&self, checkpoint: Checkpoint) -> Result<()>;

    /// Shallow-merges `payload` into the checkpoint's stored JSON payload
    ///. Disallowed once `is_completed`.
    async fn update_checkpoint_payload(
        &self,
        id: Uuid,
        payload: serde_json::Value,
    ) -> Result<()>;
    async fn update_checkpoint_progress(
        &self,
        id: Uuid,
        items_processed: i64,
        bytes_processed: i64,
    ) -> Result<()>;
    async fn complete_checkpoint(&self, id: Uuid, now: DateTime<Utc>) -> Result<()>;
    async fn get_checkpoint(
        &self,
        shard_id: Uuid,
        checkpoint_key: &str,
    ) -> Result<Option<Checkpoint>>;
    async fn get_checkpoint_by_id(&self, id: Uuid) -> Result<Option<Checkpoint>>;
    async fn list_checkpoints_for_shard(&self, shard_id: Uuid) -> Result<Vec<Checkpoint>>;

    /// The incomplete checkpoints a resumed shard should pick back up from
    ///, oldest first.
    async fn resume_set(&self, shard_id: Uuid) -> Result<Vec<Checkpoint>>;

    /// Inserts items, skipping any whose `(shard_id, source_item_id)` pair
    /// already exists. Returns the
    /// number of rows actually inserted.
    async fn insert_items(&self, items: Vec<CollectedItem>) -> Result<u64>;
    async fn list_items_for_shard(&self, shard_id: Uuid) -> Result<Vec<CollectedItem>>;
    async fn list_items_for_job(&self, job_id: Uuid) -> Result<Vec<CollectedItem>>;

    async fn append_log(&self, log: JobLog) -> Result<()>;
    async fn list_logs_for_job(&self, job_id: Uuid) -> Result<Vec<JobLog>>;

    async fn get_cursor(
        &self,
        scope_id: &str,
        delta_type: DeltaType,
    ) -> Result<Option<DeltaCursor>>;
    async fn upsert_cursor(&self, cursor: DeltaCursor) -> Result<()>;

    /// Records a manifest built by `hco-manifest`.
    async fn insert_manifest(&self, manifest: JobManifest) -> Result<()>;
    async fn get_manifest(&self, id: Uuid) -> Result<Option<JobManifest>>;
    async fn list_manifests_for_job(&self, job_id: Uuid) -> Result<Vec<JobManifest>>;
    /// Records that `id` has been sealed.
    async fn mark_manifest_sealed(
        &self,
        id: Uuid,
        sealed_path: String,
        sealed_at: DateTime<Utc>,
    ) -> Result<()>;
}
