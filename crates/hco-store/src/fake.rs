//! In-memory [`MetadataStore`] double, used by every other crate's test
//! suite instead of standing up Postgres (mirrors the workspace's
//! `testing`-feature fake stores elsewhere).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hco_models::entities::{
    Checkpoint, CollectedItem, DeltaCursor, DeltaType, Job, JobLog, JobManifest, JobStatus,
    Matter, Shard, ShardStatus,
};
use uuid::Uuid;

use crate::{Error, LeaseOutcome, MetadataStore, Result};

#[derive(Default)]
struct State {
    matters: HashMap<i64, Matter>,
    jobs: HashMap<Uuid, Job>,
    shards: HashMap<Uuid, Shard>,
    checkpoints: HashMap<Uuid, Checkpoint>,
    items: HashMap<Uuid, CollectedItem>,
    logs: Vec<JobLog>,
    cursors: HashMap<(String, DeltaType), DeltaCursor>,
    manifests: HashMap<Uuid, JobManifest>,
}

/// An in-memory `MetadataStore`. Every call locks the whole store, same as
/// the Postgres implementation serializes through row locks — not built
/// for throughput, built for deterministic single-process tests.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<State>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn delta_type_eq(a: DeltaType, b: DeltaType) -> bool {
    std::mem::discriminant(&a) == std::mem::discriminant(&b)
}

#[async_trait]
impl MetadataStore for FakeStore {
    async fn create_matter(&self, matter: Matter) -> Result<()> {
        self.state.lock().unwrap().matters.insert(matter.id, matter);
        Ok(())
    }

    async fn get_matter(&self, id: i64) -> Result<Option<Matter>> {
        Ok(self.state.lock().unwrap().matters.get(&id).cloned())
    }

    async fn create_job(&self, job: Job) -> Result<()> {
        self.state.lock().unwrap().jobs.insert(job.id, job);
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.state.lock().unwrap().jobs.get(&id).cloned())
    }

    async fn update_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("job {id}")))?;
        job.status = status;
        if error.is_some() {
            job.error = error;
        }
        Ok(())
    }

    async fn update_job_actuals(&self, id: Uuid, actual_bytes: i64, actual_items: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("job {id}")))?;
        job.actual_bytes = actual_bytes;
        job.actual_items = actual_items;
        Ok(())
    }

    async fn set_job_manifest_hash(&self, id: Uuid, manifest_hash: String) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("job {id}")))?;
        job.manifest_hash = Some(manifest_hash);
        Ok(())
    }

    async fn insert_shards(&self, shards: Vec<Shard>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for shard in shards {
            state.shards.insert(shard.id, shard);
        }
        Ok(())
    }

    async fn get_shard(&self, id: Uuid) -> Result<Option<Shard>> {
        Ok(self.state.lock().unwrap().shards.get(&id).cloned())
    }

    async fn list_shards_for_job(&self, job_id: Uuid) -> Result<Vec<Shard>> {
        let mut shards: Vec<Shard> = self
            .state
            .lock()
            .unwrap()
            .shards
            .values()
            .filter(|s| s.parent_job_id == job_id)
            .cloned()
            .collect();
        shards.sort_by_key(|s| s.shard_index);
        Ok(shards)
    }

    async fn claim_next_shard(
        &self,
        worker_id: &str,
        lease_duration: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Shard>> {
        let mut state = self.state.lock().unwrap();
        let priority_of = |job_id: Uuid, jobs: &HashMap<Uuid, Job>| {
            jobs.get(&job_id).map(|j| j.priority).unwrap_or(0)
        };
        let jobs = state.jobs.clone();
        let candidate_id = state
            .shards
            .values()
            .filter(|s| s.status == ShardStatus::Pending)
            .max_by(|a, b| {
                let pa = priority_of(a.parent_job_id, &jobs);
                let pb = priority_of(b.parent_job_id, &jobs);
                pb.cmp(&pa)
                    .then(b.start_date.cmp(&a.start_date))
                    .then(b.shard_index.cmp(&a.shard_index))
            })
            .map(|s| s.id);

        let Some(id) = candidate_id else {
            return Ok(None);
        };
        let shard = state.shards.get_mut(&id).expect("candidate_id came from shards");
        shard.status = ShardStatus::Assigned;
        shard.assigned_worker_id = Some(worker_id.to_string());
        shard.lease_token = Some(Uuid::new_v4());
        shard.lease_expires_at = Some(now + chrono::Duration::from_std(lease_duration).unwrap());
        if shard.started_at.is_none() {
            shard.started_at = Some(now);
        }
        shard.row_version += 1;
        Ok(Some(shard.clone()))
    }

    async fn extend_lease(
        &self,
        shard_id: Uuid,
        lease_token: Uuid,
        lease_duration: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome> {
        let mut state = self.state.lock().unwrap();
        let Some(shard) = state.shards.get_mut(&shard_id) else {
            return Ok(false);
        };
        if shard.lease_token != Some(lease_token) || !shard.status.holds_lease() {
            return Ok(false);
        }
        shard.lease_expires_at = Some(now + chrono::Duration::from_std(lease_duration).unwrap());
        shard.row_version += 1;
        Ok(true)
    }

    async fn update_shard_progress(
        &self,
        shard_id: Uuid,
        lease_token: Uuid,
        processed_bytes: i64,
        processed_items: i64,
        progress_pct: i16,
    ) -> Result<LeaseOutcome> {
        let mut state = self.state.lock().unwrap();
        let Some(shard) = state.shards.get_mut(&shard_id) else {
            return Ok(false);
        };
        if shard.lease_token != Some(lease_token) || !shard.status.holds_lease() {
            return Ok(false);
        }
        shard.status = ShardStatus::Running;
        shard.processed_bytes = processed_bytes;
        shard.processed_items = processed_items;
        shard.progress_pct = progress_pct;
        shard.row_version += 1;
        Ok(true)
    }

    async fn complete_shard(
        &self,
        shard_id: Uuid,
        lease_token: Uuid,
        actual_bytes: i64,
        actual_items: i64,
        manifest_hash: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome> {
        let mut state = self.state.lock().unwrap();
        let Some(shard) = state.shards.get_mut(&shard_id) else {
            return Ok(false);
        };
        if shard.lease_token != Some(lease_token) || !shard.status.holds_lease() {
            return Ok(false);
        }
        shard.status = ShardStatus::Completed;
        shard.actual_bytes = actual_bytes;
        shard.actual_items = actual_items;
        shard.manifest_hash = manifest_hash;
        shard.ended_at = Some(now);
        shard.progress_pct = 100;
        shard.lease_token = None;
        shard.lease_expires_at = None;
        shard.row_version += 1;
        Ok(true)
    }

    async fn fail_shard(
        &self,
        shard_id: Uuid,
        lease_token: Uuid,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome> {
        let mut state = self.state.lock().unwrap();
        let Some(shard) = state.shards.get_mut(&shard_id) else {
            return Ok(false);
        };
        if shard.lease_token != Some(lease_token) || !shard.status.holds_lease() {
            return Ok(false);
        }
        shard.retry_count += 1;
        shard.error = Some(error);
        shard.lease_token = None;
        shard.lease_expires_at = None;
        shard.assigned_worker_id = None;
        if shard.retry_count < shard.max_retries {
            shard.status = ShardStatus::Pending;
        } else {
            shard.status = ShardStatus::Failed;
            shard.ended_at = Some(now);
        }
        shard.row_version += 1;
        Ok(true)
    }

    async fn release_shard(&self, shard_id: Uuid, lease_token: Uuid) -> Result<LeaseOutcome> {
        let mut state = self.state.lock().unwrap();
        let Some(shard) = state.shards.get_mut(&shard_id) else {
            return Ok(false);
        };
        if shard.lease_token != Some(lease_token) || !shard.status.holds_lease() {
            return Ok(false);
        }
        shard.status = ShardStatus::Pending;
        shard.lease_token = None;
        shard.lease_expires_at = None;
        shard.assigned_worker_id = None;
        shard.row_version += 1;
        Ok(true)
    }

    async fn retry_shard(&self, shard_id: Uuid, reason: String) -> Result<crate::RetryOutcome> {
        let mut state = self.state.lock().unwrap();
        let Some(shard) = state.shards.get_mut(&shard_id) else {
            return Err(Error::NotFound(format!("shard {shard_id}")));
        };
        if shard.status != ShardStatus::Failed {
            return Ok(crate::RetryOutcome::NotFailed);
        }
        shard.retry_count += 1;
        shard.error = Some(reason);
        shard.row_version += 1;
        if shard.retry_count <= shard.max_retries {
            shard.status = ShardStatus::Pending;
            Ok(crate::RetryOutcome::Retried)
        } else {
            Ok(crate::RetryOutcome::Exhausted)
        }
    }

    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Shard>> {
        let mut state = self.state.lock().unwrap();
        let expired_ids: Vec<Uuid> = state
            .shards
            .values()
            .filter(|s| s.status.holds_lease() && s.lease_expires_at.map(|exp| exp <= now).unwrap_or(false))
            .map(|s| s.id)
            .collect();

        let mut reaped = Vec::with_capacity(expired_ids.len());
        for id in expired_ids {
            let shard = state.shards.get_mut(&id).expect("id came from shards");
            shard.retry_count += 1;
            shard.error = Some("lease expired".to_string());
            shard.lease_token = None;
            shard.lease_expires_at = None;
            shard.assigned_worker_id = None;
            if shard.retry_count < shard.max_retries {
                shard.status = ShardStatus::Pending;
            } else {
                shard.status = ShardStatus::Failed;
                shard.ended_at = Some(now);
            }
            shard.row_version += 1;
            reaped.push(shard.clone());
        }
        Ok(reaped)
    }

    async fn create_checkpoint(&self, checkpoint: Checkpoint) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .checkpoints
            .insert(checkpoint.id, checkpoint);
        Ok(())
    }

    async fn update_checkpoint_payload(&self, id: Uuid, payload: serde_json::Value) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let checkpoint = state
            .checkpoints
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("checkpoint {id}")))?;
        if checkpoint.is_completed {
            return Err(Error::Conflict(format!(
                "checkpoint {id} is already completed and may not be mutated"
            )));
        }
        if let (Some(existing), Some(incoming)) =
            (checkpoint.payload.as_object_mut(), payload.as_object())
        {
            for (k, v) in incoming {
                existing.insert(k.clone(), v.clone());
            }
        } else {
            checkpoint.payload = payload;
        }
        Ok(())
    }

    async fn update_checkpoint_progress(
        &self,
        id: Uuid,
        items_processed: i64,
        bytes_processed: i64,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let checkpoint = state
            .checkpoints
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("checkpoint {id}")))?;
        if checkpoint.is_completed {
            return Err(Error::Conflict(format!(
                "checkpoint {id} is already completed and may not be mutated"
            )));
        }
        checkpoint.items_processed = items_processed;
        checkpoint.bytes_processed = bytes_processed;
        Ok(())
    }

    async fn complete_checkpoint(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let checkpoint = state
            .checkpoints
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("checkpoint {id}")))?;
        checkpoint.is_completed = true;
        checkpoint.completed_at = Some(now);
        Ok(())
    }

    async fn get_checkpoint(
        &self,
        shard_id: Uuid,
        checkpoint_key: &str,
    ) -> Result<Option<Checkpoint>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .checkpoints
            .values()
            .find(|c| c.shard_id == shard_id && c.checkpoint_key == checkpoint_key)
            .cloned())
    }

    async fn get_checkpoint_by_id(&self, id: Uuid) -> Result<Option<Checkpoint>> {
        Ok(self.state.lock().unwrap().checkpoints.get(&id).cloned())
    }

    async fn list_checkpoints_for_shard(&self, shard_id: Uuid) -> Result<Vec<Checkpoint>> {
        let mut checkpoints: Vec<Checkpoint> = self
            .state
            .lock()
            .unwrap()
            .checkpoints
            .values()
            .filter(|c| c.shard_id == shard_id)
            .cloned()
            .collect();
        checkpoints.sort_by_key(|c| c.created_at);
        Ok(checkpoints)
    }

    async fn resume_set(&self, shard_id: Uuid) -> Result<Vec<Checkpoint>> {
        let mut checkpoints: Vec<Checkpoint> = self
            .state
            .lock()
            .unwrap()
            .checkpoints
            .values()
            .filter(|c| c.shard_id == shard_id && !c.is_completed)
            .cloned()
            .collect();
        checkpoints.sort_by_key(|c| c.created_at);
        Ok(checkpoints)
    }

    async fn insert_items(&self, items: Vec<CollectedItem>) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let mut inserted = 0u64;
        for item in items {
            let exists = state.items.values().any(|existing| {
                existing.shard_id == item.shard_id && existing.source_item_id == item.source_item_id
            });
            if !exists {
                state.items.insert(item.id, item);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn list_items_for_shard(&self, shard_id: Uuid) -> Result<Vec<CollectedItem>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .items
            .values()
            .filter(|i| i.shard_id == shard_id)
            .cloned()
            .collect())
    }

    async fn list_items_for_job(&self, job_id: Uuid) -> Result<Vec<CollectedItem>> {
        let state = self.state.lock().unwrap();
        let shard_ids: std::collections::HashSet<Uuid> = state
            .shards
            .values()
            .filter(|s| s.parent_job_id == job_id)
            .map(|s| s.id)
            .collect();
        let mut items: Vec<CollectedItem> = state
            .items
            .values()
            .filter(|i| shard_ids.contains(&i.shard_id))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.shard_id.cmp(&b.shard_id).then(a.source_item_id.cmp(&b.source_item_id)));
        Ok(items)
    }

    async fn append_log(&self, log: JobLog) -> Result<()> {
        self.state.lock().unwrap().logs.push(log);
        Ok(())
    }

    async fn list_logs_for_job(&self, job_id: Uuid) -> Result<Vec<JobLog>> {
        let mut logs: Vec<JobLog> = self
            .state
            .lock()
            .unwrap()
            .logs
            .iter()
            .filter(|l| l.job_id == job_id)
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.ts);
        Ok(logs)
    }

    async fn get_cursor(&self, scope_id: &str, delta_type: DeltaType) -> Result<Option<DeltaCursor>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .cursors
            .values()
            .find(|c| c.scope_id == scope_id && delta_type_eq(c.delta_type, delta_type))
            .cloned())
    }

    async fn upsert_cursor(&self, cursor: DeltaCursor) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .cursors
            .insert((cursor.scope_id.clone(), cursor.delta_type), cursor);
        Ok(())
    }

    async fn insert_manifest(&self, manifest: JobManifest) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .manifests
            .insert(manifest.id, manifest);
        Ok(())
    }

    async fn get_manifest(&self, id: Uuid) -> Result<Option<JobManifest>> {
        Ok(self.state.lock().unwrap().manifests.get(&id).cloned())
    }

    async fn list_manifests_for_job(&self, job_id: Uuid) -> Result<Vec<JobManifest>> {
        let mut manifests: Vec<JobManifest> = self
            .state
            .lock()
            .unwrap()
            .manifests
            .values()
            .filter(|m| m.job_id == job_id)
            .cloned()
            .collect();
        manifests.sort_by_key(|m| m.created_at);
        Ok(manifests)
    }

    async fn mark_manifest_sealed(
        &self,
        id: Uuid,
        sealed_path: String,
        sealed_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let manifest = state
            .manifests
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("manifest {id}")))?;
        manifest.sealed_path = Some(sealed_path);
        manifest.sealed_at = Some(sealed_at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hco_models::clock::{Clock, SystemClock};
    use hco_models::entities::{JobType, Route};

    fn sample_job(id: Uuid) -> Job {
        let now = SystemClock.now();
        Job {
            id,
            matter_id: 1,
            custodian_email: "a@x.com".to_string(),
            job_type: JobType::Email,
            status: JobStatus::Planning,
            route: Route::PerItemApi,
            priority: 0,
            created_at: now,
            started_at: None,
            ended_at: None,
            estimated_bytes: 0,
            estimated_items: 0,
            actual_bytes: 0,
            actual_items: 0,
            output_prefix: "jobs/1".to_string(),
            manifest_hash: None,
            error: None,
        }
    }

    fn sample_shard(job_id: Uuid, index: i32, max_retries: i32) -> Shard {
        let now = SystemClock.now();
        Shard {
            id: Uuid::new_v4(),
            parent_job_id: job_id,
            shard_index: index,
            total_shards: 1,
            shard_identifier: format!("a@x.com|20240101|20240107|Email#{index}"),
            custodian_email: "a@x.com".to_string(),
            start_date: now,
            end_date: now,
            job_type: JobType::Email,
            route: Route::PerItemApi,
            status: ShardStatus::Pending,
            assigned_worker_id: None,
            lease_token: None,
            lease_expires_at: None,
            started_at: None,
            ended_at: None,
            estimated_bytes: 0,
            estimated_items: 0,
            actual_bytes: 0,
            actual_items: 0,
            processed_bytes: 0,
            processed_items: 0,
            progress_pct: 0,
            retry_count: 0,
            max_retries,
            output_prefix: "jobs/1/shards/0".to_string(),
            manifest_hash: None,
            error: None,
            row_version: 0,
        }
    }

    #[tokio::test]
    async fn claim_then_complete_round_trip() {
        let store = FakeStore::new();
        let job_id = Uuid::new_v4();
        store.create_job(sample_job(job_id)).await.unwrap();
        let shard = sample_shard(job_id, 0, 3);
        let shard_id = shard.id;
        store.insert_shards(vec![shard]).await.unwrap();

        let now = SystemClock.now();
        let claimed = store
            .claim_next_shard("worker-1", std::time::Duration::from_secs(1800), now)
            .await
            .unwrap()
            .expect("a pending shard should be claimable");
        assert_eq!(claimed.status, ShardStatus::Assigned);
        let token = claimed.lease_token.unwrap();

        let ok = store
            .complete_shard(shard_id, token, 100, 10, Some("deadbeef".to_string()), now)
            .await
            .unwrap();
        assert!(ok);

        let stored = store.get_shard(shard_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ShardStatus::Completed);
        assert!(stored.lease_token.is_none());
    }

    #[tokio::test]
    async fn stale_lease_token_is_rejected() {
        let store = FakeStore::new();
        let job_id = Uuid::new_v4();
        store.create_job(sample_job(job_id)).await.unwrap();
        let shard = sample_shard(job_id, 0, 3);
        let shard_id = shard.id;
        store.insert_shards(vec![shard]).await.unwrap();

        let now = SystemClock.now();
        store
            .claim_next_shard("worker-1", std::time::Duration::from_secs(1800), now)
            .await
            .unwrap();

        let stale_token = Uuid::new_v4();
        let ok = store
            .complete_shard(shard_id, stale_token, 100, 10, None, now)
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn reap_expired_requeues_under_retry_budget() {
        let store = FakeStore::new();
        let job_id = Uuid::new_v4();
        store.create_job(sample_job(job_id)).await.unwrap();
        let shard = sample_shard(job_id, 0, 3);
        let shard_id = shard.id;
        store.insert_shards(vec![shard]).await.unwrap();

        let t0 = SystemClock.now();
        store
            .claim_next_shard("worker-1", std::time::Duration::from_secs(60), t0)
            .await
            .unwrap();

        let t1 = t0 + chrono::Duration::seconds(120);
        let reaped = store.reap_expired_leases(t1).await.unwrap();
        assert_eq!(reaped.len(), 1);
        let stored = store.get_shard(shard_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ShardStatus::Pending);
        assert_eq!(stored.retry_count, 1);
    }

    #[tokio::test]
    async fn completed_checkpoint_cannot_be_mutated() {
        let store = FakeStore::new();
        let shard_id = Uuid::new_v4();
        let now = SystemClock.now();
        let checkpoint = Checkpoint {
            id: Uuid::new_v4(),
            shard_id,
            checkpoint_type: hco_models::entities::CheckpointType::Batch,
            checkpoint_key: "batch-1".to_string(),
            payload: serde_json::json!({}),
            created_at: now,
            completed_at: None,
            is_completed: false,
            items_processed: 0,
            bytes_processed: 0,
            correlation_id: None,
        };
        let id = checkpoint.id;
        store.create_checkpoint(checkpoint).await.unwrap();
        store.complete_checkpoint(id, now).await.unwrap();

        let err = store.update_checkpoint_progress(id, 1, 1).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn insert_items_is_idempotent_on_source_item_id() {
        let store = FakeStore::new();
        let shard_id = Uuid::new_v4();
        let now = SystemClock.now();
        let item = CollectedItem {
            id: Uuid::new_v4(),
            shard_id,
            source_item_id: "msg-1".to_string(),
            item_type: "email".to_string(),
            subject: None,
            from: None,
            to: None,
            item_date: None,
            collected_at: now,
            size_bytes: 10,
            sha256: "abc".to_string(),
            artifact_path: None,
            is_successful: true,
            error: None,
        };
        let mut retried = item.clone();
        retried.id = Uuid::new_v4();

        let first = store.insert_items(vec![item]).await.unwrap();
        let second = store.insert_items(vec![retried]).await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn manifest_round_trips_and_tracks_sealing() {
        use hco_models::entities::JobManifest;

        let store = FakeStore::new();
        let job = sample_job(Uuid::new_v4());
        store.create_job(job.clone()).await.unwrap();

        let manifest = JobManifest {
            id: Uuid::new_v4(),
            job_id: job.id,
            manifest_hash: "a".repeat(64),
            json_path: "manifests/1.json".to_string(),
            csv_path: "manifests/1.csv".to_string(),
            sealed_path: None,
            created_at: SystemClock.now(),
            sealed_at: None,
        };
        store.insert_manifest(manifest.clone()).await.unwrap();

        let fetched = store.get_manifest(manifest.id).await.unwrap().unwrap();
        assert!(fetched.sealed_at.is_none());

        store
            .mark_manifest_sealed(manifest.id, "immutable/worm/x.json".to_string(), SystemClock.now())
            .await
            .unwrap();
        let sealed = store.get_manifest(manifest.id).await.unwrap().unwrap();
        assert!(sealed.sealed_at.is_some());

        let listed = store.list_manifests_for_job(job.id).await.unwrap();
        assert_eq!(listed.len(), 1);
    }
}
