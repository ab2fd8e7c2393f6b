//! C6: Shard Scheduler & Lease Manager — hands exactly one ready shard to
//! exactly one worker at a time, with automatic lease recovery.
//!
//! Lease-exclusivity and the row-level claim locking live in
//! [`hco_store::MetadataStore`] (claim/extend/release/complete/fail are all
//! single atomic statements there); this crate is the public surface named
//! here (`claimNext`, `extend`, `release`, `complete`, `retry`,
//! `reap_expired`) plus a worker-pool backpressure semaphore sized per
//! worker process.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hco_models::clock::Clock;
use hco_models::config::SchedulerConfig;
use hco_models::entities::Shard;
use hco_store::{MetadataStore, RetryOutcome};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] hco_store::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The terminal outcome a worker reports for a shard it held the lease on.
#[derive(Debug, Clone)]
pub struct ShardSummary {
    pub ok: bool,
    pub actual_bytes: i64,
    pub actual_items: i64,
    pub manifest_hash: Option<String>,
    pub error: Option<String>,
}

/// Drives [`MetadataStore`]'s lease-mutating operations against a shared
/// [`Clock`], with the fixed lease-discipline constants applied
/// consistently everywhere "now" and "lease_duration" are needed.
pub struct Scheduler<C: Clock> {
    store: Arc<dyn MetadataStore>,
    clock: Arc<C>,
    config: SchedulerConfig,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(store: Arc<dyn MetadataStore>, clock: Arc<C>, config: SchedulerConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// `claimNext(worker_id) -> Shard?`.
    #[tracing::instrument(skip(self), err)]
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<Shard>> {
        let shard = self
            .store
            .claim_next_shard(worker_id, self.config.lease_duration(), self.clock.now())
            .await?;
        if let Some(shard) = &shard {
            tracing::info!(shard_id = %shard.id, worker_id, "claimed shard");
        }
        Ok(shard)
    }

    /// `extend(shard_id, worker_id, extra_duration) -> ok|stale`.
    /// Heartbeats call this every `lease_duration / 3`.
    pub async fn extend(
        &self,
        shard_id: Uuid,
        lease_token: Uuid,
        extra_duration: Option<Duration>,
    ) -> Result<bool> {
        let duration = extra_duration.unwrap_or_else(|| self.config.lease_duration());
        Ok(self
            .store
            .extend_lease(shard_id, lease_token, duration, self.clock.now())
            .await?)
    }

    /// `release(shard_id, worker_id) -> ok`: voluntarily return a
    /// shard to `Pending` without counting it as a failure.
    pub async fn release(&self, shard_id: Uuid, lease_token: Uuid) -> Result<bool> {
        Ok(self.store.release_shard(shard_id, lease_token).await?)
    }

    /// `complete(shard_id, worker_id, summary) -> ok`. A
    /// `summary.ok == false` routes to the failure/retry path instead of the
    /// terminal-success path, since this module models both as the single
    /// "shard's collect call returned" event.
    pub async fn complete(
        &self,
        shard_id: Uuid,
        lease_token: Uuid,
        summary: ShardSummary,
    ) -> Result<bool> {
        let now = self.clock.now();
        if summary.ok {
            Ok(self
                .store
                .complete_shard(
                    shard_id,
                    lease_token,
                    summary.actual_bytes,
                    summary.actual_items,
                    summary.manifest_hash,
                    now,
                )
                .await?)
        } else {
            let error = summary.error.unwrap_or_else(|| "collection failed".to_string());
            Ok(self.store.fail_shard(shard_id, lease_token, error, now).await?)
        }
    }

    /// `retry(shard_id, reason) -> ok|exhausted`: manually retry a
    /// terminally `Failed` shard, as distinct from the automatic
    /// fail-then-retry path driven by `complete`/`reap_expired`.
    pub async fn retry(&self, shard_id: Uuid, reason: String) -> Result<RetryOutcome> {
        Ok(self.store.retry_shard(shard_id, reason).await?)
    }

    /// `reap_expired() -> count`: idempotent sweep, intended to
    /// run on `Scheduler.reap_interval_s`.
    #[tracing::instrument(skip(self), err)]
    pub async fn reap_expired(&self) -> Result<usize> {
        let reaped = self.store.reap_expired_leases(self.clock.now()).await?;
        if !reaped.is_empty() {
            tracing::info!(count = reaped.len(), "reaped expired leases");
        }
        Ok(reaped.len())
    }
}

/// Enforces backpressure so the scheduler never hands out a shard to a
/// worker whose current load already equals its `max_concurrent_shards`,
/// by gating claims behind a `tokio::sync::Semaphore`.
pub struct WorkerPool {
    semaphore: Arc<tokio::sync::Semaphore>,
}

impl WorkerPool {
    pub fn new(max_concurrent_shards: usize) -> Self {
        Self {
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent_shards)),
        }
    }

    /// Blocks until a slot is free, then holds it until the returned permit
    /// is dropped (i.e. until the shard's work finishes).
    pub async fn acquire(&self) -> tokio::sync::OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("WorkerPool semaphore is never closed")
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Runs `reap_expired` on `Scheduler.reap_interval_s` until `shutdown`
/// resolves: one task, one responsibility, started and stopped by the
/// job controller.
pub async fn run_reaper_loop<C: Clock>(
    scheduler: Arc<Scheduler<C>>,
    interval: Duration,
    shutdown: impl std::future::Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = scheduler.reap_expired().await {
                    tracing::error!(?err, "reap_expired failed (will retry next interval)");
                }
            }
            () = &mut shutdown => {
                tracing::info!("reaper loop signaled to stop");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hco_models::clock::fake::FakeClock;
    use hco_models::clock::SystemClock;
    use hco_models::entities::{Job, JobStatus, JobType, Route, ShardStatus};
    use hco_store::fake::FakeStore;

    fn sample_job(id: Uuid) -> Job {
        Job {
            id,
            matter_id: 1,
            custodian_email: "a@x.com".to_string(),
            job_type: JobType::Email,
            status: JobStatus::Running,
            route: Route::PerItemApi,
            priority: 1,
            created_at: SystemClock.now(),
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

    fn sample_shard(job_id: Uuid, now: chrono::DateTime<Utc>) -> Shard {
        Shard {
            id: Uuid::new_v4(),
            parent_job_id: job_id,
            shard_index: 0,
            total_shards: 1,
            shard_identifier: format!("a@x.com|20240101|20240107|Email#{job_id}"),
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
            max_retries: 3,
            output_prefix: "jobs/1/shards/0".to_string(),
            manifest_hash: None,
            error: None,
            row_version: 0,
        }
    }

    /// S4: a shard whose lease has expired is reaped back to `Pending` and a
    /// second worker can then claim and finish it.
    #[tokio::test]
    async fn s4_lease_expiry_recovery() {
        let store: Arc<dyn MetadataStore> = Arc::new(FakeStore::new());
        let clock = Arc::new(FakeClock::at(Utc::now()));
        let mut cfg = SchedulerConfig::default();
        cfg.lease_duration_s = 1;
        let scheduler = Scheduler::new(store.clone(), clock.clone(), cfg);

        let job_id = Uuid::new_v4();
        store.create_job(sample_job(job_id)).await.unwrap();
        let shard = sample_shard(job_id, clock.now());
        let shard_id = shard.id;
        store.insert_shards(vec![shard]).await.unwrap();

        let claimed = scheduler.claim_next("worker-1").await.unwrap().unwrap();
        assert_eq!(claimed.id, shard_id);

        clock.advance(chrono::Duration::seconds(5));
        let reaped = scheduler.reap_expired().await.unwrap();
        assert_eq!(reaped, 1);

        let reclaimed = scheduler.claim_next("worker-2").await.unwrap().unwrap();
        assert_eq!(reclaimed.id, shard_id);
        assert_eq!(reclaimed.assigned_worker_id.as_deref(), Some("worker-2"));

        let ok = scheduler
            .complete(
                shard_id,
                reclaimed.lease_token.unwrap(),
                ShardSummary {
                    ok: true,
                    actual_bytes: 10,
                    actual_items: 1,
                    manifest_hash: None,
                    error: None,
                },
            )
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn worker_with_stale_lease_cannot_complete() {
        let store: Arc<dyn MetadataStore> = Arc::new(FakeStore::new());
        let clock = Arc::new(FakeClock::at(Utc::now()));
        let scheduler = Scheduler::new(store.clone(), clock.clone(), SchedulerConfig::default());

        let job_id = Uuid::new_v4();
        store.create_job(sample_job(job_id)).await.unwrap();
        let shard = sample_shard(job_id, clock.now());
        let shard_id = shard.id;
        store.insert_shards(vec![shard]).await.unwrap();

        scheduler.claim_next("worker-1").await.unwrap();
        let stale_token = Uuid::new_v4();
        let ok = scheduler
            .complete(
                shard_id,
                stale_token,
                ShardSummary {
                    ok: true,
                    actual_bytes: 1,
                    actual_items: 1,
                    manifest_hash: None,
                    error: None,
                },
            )
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn worker_pool_blocks_past_capacity() {
        let pool = WorkerPool::new(1);
        let _permit = pool.acquire().await;
        assert_eq!(pool.available_permits(), 0);
    }
}
