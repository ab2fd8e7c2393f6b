//! C11: Job Controller — the glue that wires every other capability
//! together into a job's lifecycle. Nothing here talks HTTP;
//! [`crate::api`] is the thin translation layer on top.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hco_artifact_store::ArtifactStore;
use hco_checkpoints::CheckpointEngine;
use hco_manifest::{Manifest, ManifestGenerator, VerificationResult};
use hco_models::clock::Clock;
use hco_models::config::OrchestratorConfig;
use hco_models::entities::{
    Checkpoint, CheckpointType, CollectedItem, Job, JobLog, JobManifest, JobStatus, JobType,
    Matter, Shard, ShardStatus,
};
use hco_planner::{DefaultWindowEstimator, PlanRequest};
use hco_reconciler::{ReconcileOptions, ReconcileReport};
use hco_scheduler::{Scheduler, ShardSummary, WorkerPool};
use hco_store::{MetadataStore, RetryOutcome};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMatterRequest {
    pub name: String,
    pub case_number: String,
    pub created_by: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobRequest {
    pub matter_id: i64,
    /// At least one custodian. The first is recorded as `Job.custodian_email`
    /// for display/indexing; the Shard Planner fans out across all of them
    ///.
    pub custodians: Vec<String>,
    pub job_type: JobType,
    #[serde(default = "default_priority")]
    pub priority: i16,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub include_attachments: bool,
    /// Current quota consumption for the tenant/matter, supplied by the
    /// caller.
    #[serde(default)]
    pub quota: QuotaInput,
}

fn default_priority() -> i16 {
    5
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct QuotaInput {
    pub used_bytes: i64,
    pub limit_bytes: i64,
    pub used_items: i64,
    pub limit_items: i64,
}

impl Default for QuotaInput {
    fn default() -> Self {
        Self {
            used_bytes: 0,
            limit_bytes: i64::MAX,
            used_items: 0,
            limit_items: i64::MAX,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateJobResponse {
    pub job: Job,
    pub decision: hco_router::Decision,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompleteJobRequest {
    pub status: JobStatus,
    pub actual_bytes: i64,
    pub actual_items: i64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestItemRequest {
    pub shard_id: Uuid,
    pub source_item_id: String,
    pub item_type: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub item_date: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
    pub size_bytes: i64,
    pub sha256: String,
    #[serde(default)]
    pub artifact_path: Option<String>,
    pub is_successful: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileRequest {
    pub source_manifest_path: String,
    pub collected_manifest_path: String,
    #[serde(default)]
    pub custodian: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCheckpointRequest {
    pub shard_id: Uuid,
    pub checkpoint_type: CheckpointType,
    pub checkpoint_key: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShardProgressRequest {
    pub lease_token: Uuid,
    pub processed_bytes: i64,
    pub processed_items: i64,
    pub progress_pct: i16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShardCompleteRequest {
    pub lease_token: Uuid,
    pub ok: bool,
    #[serde(default)]
    pub actual_bytes: i64,
    #[serde(default)]
    pub actual_items: i64,
    #[serde(default)]
    pub manifest_hash: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Wires C3–C10 into the job lifecycle
pub struct JobController<C: Clock = hco_models::clock::SystemClock> {
    store: Arc<dyn MetadataStore>,
    artifacts: Arc<dyn ArtifactStore>,
    clock: Arc<C>,
    scheduler: Arc<Scheduler<C>>,
    checkpoints: Arc<CheckpointEngine>,
    manifests: Arc<ManifestGenerator>,
    worker_pool: Arc<WorkerPool>,
    config: OrchestratorConfig,
}

impl<C: Clock> JobController<C> {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        artifacts: Arc<dyn ArtifactStore>,
        clock: Arc<C>,
        signer: Arc<dyn hco_manifest::ManifestSigner>,
        config: OrchestratorConfig,
        max_concurrent_shards: usize,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            clock.clone(),
            config.scheduler,
        ));
        let checkpoints = Arc::new(CheckpointEngine::new(store.clone()));
        let manifests = Arc::new(ManifestGenerator::new(artifacts.clone(), signer));
        Self {
            store,
            artifacts,
            clock,
            scheduler,
            checkpoints,
            manifests,
            worker_pool: Arc::new(WorkerPool::new(max_concurrent_shards)),
            config,
        }
    }

    pub fn scheduler(&self) -> Arc<Scheduler<C>> {
        self.scheduler.clone()
    }

    pub fn worker_pool(&self) -> Arc<WorkerPool> {
        self.worker_pool.clone()
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }

    #[tracing::instrument(skip(self, request), err)]
    pub async fn create_matter(&self, request: CreateMatterRequest) -> ApiResult<Matter> {
        let now = self.clock.now();
        // `MetadataStore::create_matter` takes a fully-formed `Matter` rather
        // than handing back a store-generated id, so the id is minted here
        // from the creation timestamp rather than round-tripping through a
        // Postgres sequence.
        let matter = Matter {
            id: now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp()),
            name: request.name,
            case_number: request.case_number,
            created_at: now,
            created_by: request.created_by,
            is_active: true,
        };
        self.store.create_matter(matter.clone()).await?;
        Ok(matter)
    }

    /// Validates the matter exists, invokes C4, persists the job as
    /// `Pending`, and writes the routing `AutoRouter` log entry.
    #[tracing::instrument(skip(self, request), err)]
    pub async fn create_job(&self, request: CreateJobRequest) -> ApiResult<CreateJobResponse> {
        if request.custodians.is_empty() {
            return Err(ApiError::Validation(
                "custodians must contain at least one entry".to_string(),
            ));
        }
        if self.store.get_matter(request.matter_id).await?.is_none() {
            return Err(ApiError::NotFound(format!(
                "matter {} does not exist",
                request.matter_id
            )));
        }

        let router_request = hco_router::Request {
            custodian: request.custodians[0].clone(),
            job_type: request.job_type,
            range_start: request.range_start,
            range_end: request.range_end,
            keywords: request.keywords.clone(),
            include_attachments: request.include_attachments,
        };
        let quota = hco_router::Quota {
            used_bytes: request.quota.used_bytes,
            limit_bytes: request.quota.limit_bytes,
            used_items: request.quota.used_items,
            limit_items: request.quota.limit_items,
            last_updated: self.clock.now(),
        };
        let decision = hco_router::decide(
            &router_request,
            &quota,
            &self.config.auto_router,
            &hco_router::NoProfile,
        )?;

        let now = self.clock.now();
        let job_id = Uuid::new_v4();
        let output_prefix = format!("matter/{}/GDC/{}", request.matter_id, request.custodians[0]);
        let job = Job {
            id: job_id,
            matter_id: request.matter_id,
            custodian_email: request.custodians[0].clone(),
            job_type: request.job_type,
            status: JobStatus::Pending,
            route: decision.route.into(),
            priority: request.priority,
            created_at: now,
            started_at: None,
            ended_at: None,
            estimated_bytes: decision.estimated_bytes,
            estimated_items: decision.estimated_items,
            actual_bytes: 0,
            actual_items: 0,
            output_prefix,
            manifest_hash: None,
            error: None,
        };
        self.store.create_job(job.clone()).await?;
        self.store
            .append_log(JobLog {
                id: Uuid::new_v4(),
                job_id,
                ts: now,
                level: "INFO".to_string(),
                category: "AutoRouter".to_string(),
                message: decision.reason.clone(),
                details: Some(decision.metrics.clone()),
                correlation_id: None,
            })
            .await?;

        Ok(CreateJobResponse { job, decision })
    }

    /// Plans shards and transitions `Pending → Running`.
    ///
    /// `Job` does not persist the original collection date range once
    /// routed, so
    /// the caller threads it through again here rather than this crate
    /// guessing a new field onto the entity. In practice `start_job` is
    /// called immediately after `create_job` in the same request flow (see
    /// `api::start_job`), so the range is always at hand.
    #[tracing::instrument(skip(self, custodians), err)]
    pub async fn start_job(
        &self,
        job_id: Uuid,
        custodians: Vec<String>,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
    ) -> ApiResult<Vec<Shard>> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("job {job_id} not found")))?;
        if job.status != JobStatus::Pending {
            return Err(ApiError::Validation(format!(
                "job {job_id} is {:?}, not Pending",
                job.status
            )));
        }

        let custodians = if custodians.is_empty() {
            vec![job.custodian_email.clone()]
        } else {
            custodians
        };

        let plan_request = PlanRequest {
            parent_job_id: job_id,
            custodians,
            start: range_start,
            end: range_end,
            job_type: job.job_type,
            route: job.route,
            output_prefix_base: job.output_prefix.clone(),
        };

        let new_shards = hco_planner::plan(&plan_request, &self.config.shard, &DefaultWindowEstimator)?;

        let now = self.clock.now();
        let shards: Vec<Shard> = new_shards
            .into_iter()
            .map(|s| Shard {
                id: Uuid::new_v4(),
                parent_job_id: job_id,
                shard_index: s.shard_index,
                total_shards: s.total_shards,
                shard_identifier: s.shard_identifier,
                custodian_email: s.custodian_email,
                start_date: s.start_date,
                end_date: s.end_date,
                job_type: s.job_type,
                route: s.route,
                status: ShardStatus::Pending,
                assigned_worker_id: None,
                lease_token: None,
                lease_expires_at: None,
                started_at: None,
                ended_at: None,
                estimated_bytes: s.estimated_bytes,
                estimated_items: s.estimated_items,
                actual_bytes: 0,
                actual_items: 0,
                processed_bytes: 0,
                processed_items: 0,
                progress_pct: 0,
                retry_count: 0,
                max_retries: s.max_retries,
                output_prefix: s.output_prefix,
                manifest_hash: None,
                error: None,
                row_version: 0,
            })
            .collect();

        self.store.insert_shards(shards.clone()).await?;
        self.store
            .update_job_status(job_id, JobStatus::Running, None)
            .await?;
        self.store
            .append_log(JobLog {
                id: Uuid::new_v4(),
                job_id,
                ts: now,
                level: "INFO".to_string(),
                category: "ShardPlanner".to_string(),
                message: format!("planned {} shards", shards.len()),
                details: None,
                correlation_id: None,
            })
            .await?;

        Ok(shards)
    }

    pub async fn get_job(&self, job_id: Uuid) -> ApiResult<Job> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("job {job_id} not found")))
    }

    pub async fn list_shards_for_job(&self, job_id: Uuid) -> ApiResult<Vec<Shard>> {
        Ok(self.store.list_shards_for_job(job_id).await?)
    }

    pub async fn list_checkpoints_for_shard(&self, shard_id: Uuid) -> ApiResult<Vec<Checkpoint>> {
        Ok(self.store.list_checkpoints_for_shard(shard_id).await?)
    }

    pub async fn list_logs_for_job(&self, job_id: Uuid) -> ApiResult<Vec<JobLog>> {
        Ok(self.store.list_logs_for_job(job_id).await?)
    }

    pub async fn create_checkpoint(
        &self,
        request: CreateCheckpointRequest,
    ) -> ApiResult<Checkpoint> {
        Ok(self
            .checkpoints
            .create(
                request.shard_id,
                request.checkpoint_type,
                request.checkpoint_key,
                request.payload,
                request.correlation_id,
                self.clock.now(),
            )
            .await?)
    }

    /// `POST /jobs/{id}/items`: bulk-ingest collected items, then
    /// recompute the job's aggregate actuals.
    #[tracing::instrument(skip(self, items), fields(count = items.len()), err)]
    pub async fn ingest_items(&self, job_id: Uuid, items: Vec<IngestItemRequest>) -> ApiResult<u64> {
        if items.len() > 100 {
            return Err(ApiError::Validation(
                "batches of more than 100 items are rejected".to_string(),
            ));
        }
        let now = self.clock.now();
        let rows: Vec<CollectedItem> = items
            .into_iter()
            .map(|i| CollectedItem {
                id: Uuid::new_v4(),
                shard_id: i.shard_id,
                source_item_id: i.source_item_id,
                item_type: i.item_type,
                subject: i.subject,
                from: i.from,
                to: i.to,
                item_date: i.item_date,
                collected_at: i.collected_at,
                size_bytes: i.size_bytes,
                sha256: i.sha256,
                artifact_path: i.artifact_path,
                is_successful: i.is_successful,
                error: i.error,
            })
            .collect();
        let inserted = self.store.insert_items(rows).await?;

        let all_items = self.store.list_items_for_job(job_id).await?;
        let actual_bytes: i64 = all_items.iter().map(|i| i.size_bytes).sum();
        let actual_items = all_items.len() as i64;
        self.store
            .update_job_actuals(job_id, actual_bytes, actual_items)
            .await?;
        let _ = now;
        Ok(inserted)
    }

    pub async fn claim_next(&self, worker_id: &str) -> ApiResult<Option<Shard>> {
        let _permit = self.worker_pool.acquire().await;
        Ok(self.scheduler.claim_next(worker_id).await?)
    }

    pub async fn extend_lease(
        &self,
        shard_id: Uuid,
        lease_token: Uuid,
        extra: Option<std::time::Duration>,
    ) -> ApiResult<bool> {
        Ok(self.scheduler.extend(shard_id, lease_token, extra).await?)
    }

    pub async fn report_progress(
        &self,
        shard_id: Uuid,
        request: ShardProgressRequest,
    ) -> ApiResult<bool> {
        Ok(self
            .store
            .update_shard_progress(
                shard_id,
                request.lease_token,
                request.processed_bytes,
                request.processed_items,
                request.progress_pct,
            )
            .await?)
    }

    /// `PUT /sharded-jobs/shards/{id}/complete`: once this shard's
    /// completion makes every shard of its job terminal, build and persist
    /// the job manifest.
    #[tracing::instrument(skip(self), err)]
    pub async fn complete_shard(
        &self,
        shard_id: Uuid,
        request: ShardCompleteRequest,
    ) -> ApiResult<bool> {
        let shard = self
            .store
            .get_shard(shard_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("shard {shard_id} not found")))?;
        let summary = ShardSummary {
            ok: request.ok,
            actual_bytes: request.actual_bytes,
            actual_items: request.actual_items,
            manifest_hash: request.manifest_hash,
            error: request.error,
        };
        let outcome = self
            .scheduler
            .complete(shard_id, request.lease_token, summary)
            .await?;
        if outcome {
            self.finalize_job_if_complete(shard.parent_job_id).await?;
        }
        Ok(outcome)
    }

    pub async fn release_shard(&self, shard_id: Uuid, lease_token: Uuid) -> ApiResult<bool> {
        Ok(self.scheduler.release(shard_id, lease_token).await?)
    }

    pub async fn retry_shard(&self, shard_id: Uuid, reason: String) -> ApiResult<RetryOutcome> {
        Ok(self.scheduler.retry(shard_id, reason).await?)
    }

    pub async fn cleanup_locks(&self) -> ApiResult<usize> {
        Ok(self.scheduler.reap_expired().await?)
    }

    /// Once every shard of `job_id` is terminal,
    /// compute the job outcome, persist it, and build the chain-of-custody
    /// manifest. A no-op (returns `Ok(None)`) while any shard is still
    /// in-flight.
    #[tracing::instrument(skip(self), err)]
    pub async fn finalize_job_if_complete(&self, job_id: Uuid) -> ApiResult<Option<JobStatus>> {
        let shards = self.store.list_shards_for_job(job_id).await?;
        if shards.is_empty() || !shards.iter().all(|s| s.status.is_terminal()) {
            return Ok(None);
        }

        let completed = shards.iter().filter(|s| s.status == ShardStatus::Completed).count();
        let failed_or_cancelled = shards
            .iter()
            .filter(|s| matches!(s.status, ShardStatus::Failed | ShardStatus::Cancelled))
            .count();

        let outcome = if completed == shards.len() {
            JobStatus::Completed
        } else if completed > 0 && failed_or_cancelled > 0 {
            JobStatus::PartiallyCompleted
        } else {
            JobStatus::Failed
        };

        let now = self.clock.now();
        self.store.update_job_status(job_id, outcome, None).await?;

        let job = self.get_job(job_id).await?;
        let manifest_id = Uuid::new_v4();
        let manifest = self
            .manifests
            .build_for_job(self.store.as_ref(), manifest_id, &job, None, now)
            .await?;
        let (json_path, csv_path) = self.manifests.persist(&manifest).await?;
        self.store
            .set_job_manifest_hash(job_id, manifest.integrity.manifest_hash.clone())
            .await?;
        self.store
            .insert_manifest(JobManifest {
                id: manifest_id,
                job_id,
                manifest_hash: manifest.integrity.manifest_hash.clone(),
                json_path,
                csv_path,
                sealed_path: None,
                created_at: now,
                sealed_at: None,
            })
            .await?;
        self.store
            .append_log(JobLog {
                id: Uuid::new_v4(),
                job_id,
                ts: now,
                level: "INFO".to_string(),
                category: "JobController".to_string(),
                message: format!("job finalized as {outcome:?}, manifest {manifest_id} built"),
                details: None,
                correlation_id: None,
            })
            .await?;

        Ok(Some(outcome))
    }

    /// `POST /jobs/{id}/complete`: a manual terminal transition
    /// carrying caller-supplied actuals, for callers that drive shard
    /// completion outside the sharded-control API (e.g. a single-shard
    /// `PerItemApi` job that never goes through `/sharded-jobs`).
    #[tracing::instrument(skip(self), err)]
    pub async fn complete_job(&self, job_id: Uuid, request: CompleteJobRequest) -> ApiResult<Job> {
        let job = self.get_job(job_id).await?;
        if job.status.is_terminal() {
            return Err(ApiError::Validation(format!(
                "job {job_id} is already terminal ({:?})",
                job.status
            )));
        }
        self.store
            .update_job_actuals(job_id, request.actual_bytes, request.actual_items)
            .await?;
        self.store
            .update_job_status(job_id, request.status, request.error)
            .await?;

        let now = self.clock.now();
        let manifest_id = Uuid::new_v4();
        let manifest = self
            .manifests
            .build_for_job(self.store.as_ref(), manifest_id, &self.get_job(job_id).await?, None, now)
            .await?;
        let (json_path, csv_path) = self.manifests.persist(&manifest).await?;
        self.store
            .set_job_manifest_hash(job_id, manifest.integrity.manifest_hash.clone())
            .await?;
        self.store
            .insert_manifest(JobManifest {
                id: manifest_id,
                job_id,
                manifest_hash: manifest.integrity.manifest_hash.clone(),
                json_path,
                csv_path,
                sealed_path: None,
                created_at: now,
                sealed_at: None,
            })
            .await?;

        self.get_job(job_id).await
    }

    pub async fn generate_manifest(&self, job_id: Uuid) -> ApiResult<(Uuid, Manifest)> {
        let job = self.get_job(job_id).await?;
        let now = self.clock.now();
        let manifest_id = Uuid::new_v4();
        let manifest = self
            .manifests
            .build_for_job(self.store.as_ref(), manifest_id, &job, None, now)
            .await?;
        let (json_path, csv_path) = self.manifests.persist(&manifest).await?;
        self.store
            .insert_manifest(JobManifest {
                id: manifest_id,
                job_id,
                manifest_hash: manifest.integrity.manifest_hash.clone(),
                json_path,
                csv_path,
                sealed_path: None,
                created_at: now,
                sealed_at: None,
            })
            .await?;
        Ok((manifest_id, manifest))
    }

    pub async fn list_manifests_for_job(&self, job_id: Uuid) -> ApiResult<Vec<JobManifest>> {
        Ok(self.store.list_manifests_for_job(job_id).await?)
    }

    pub async fn get_manifest_record(&self, manifest_id: Uuid) -> ApiResult<JobManifest> {
        self.store
            .get_manifest(manifest_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("manifest {manifest_id} not found")))
    }

    pub async fn read_manifest(&self, manifest_id: Uuid) -> ApiResult<Manifest> {
        let record = self.get_manifest_record(manifest_id).await?;
        let bytes = self.artifacts.get(&record.json_path).await?;
        Ok(serde_json::from_slice(&bytes).map_err(anyhow::Error::from)?)
    }

    pub async fn read_manifest_csv(&self, manifest_id: Uuid) -> ApiResult<Vec<u8>> {
        let record = self.get_manifest_record(manifest_id).await?;
        Ok(self.artifacts.get(&record.csv_path).await?)
    }

    pub async fn seal_manifest(&self, manifest_id: Uuid) -> ApiResult<String> {
        let record = self.get_manifest_record(manifest_id).await?;
        if record.sealed_path.is_some() {
            return Err(ApiError::Manifest(hco_manifest::Error::AlreadySealed(
                manifest_id,
            )));
        }
        let mut manifest = self.read_manifest(manifest_id).await?;
        let now = self.clock.now();
        let sealed_path = self.manifests.seal(&mut manifest, now).await?;
        self.store
            .mark_manifest_sealed(manifest_id, sealed_path.clone(), now)
            .await?;
        Ok(sealed_path)
    }

    pub async fn verify_manifest(&self, manifest_id: Uuid) -> ApiResult<VerificationResult> {
        let manifest = self.read_manifest(manifest_id).await?;
        Ok(self.manifests.verify(&manifest).await?)
    }

    /// `POST /jobs/{id}/reconcile` and the CLI `--reconcile` mode:
    /// both manifest paths are read directly off disk (the source manifest
    /// comes from outside this system entirely, and the collected manifest
    /// is whatever path the caller names, not necessarily one this service
    /// wrote), consistent with treating C10 as a pure comparison over two
    /// already-loaded byte streams.
    #[tracing::instrument(skip(self), err)]
    pub async fn reconcile_job(
        &self,
        job_id: Uuid,
        request: ReconcileRequest,
    ) -> ApiResult<ReconcileReport> {
        let source_bytes = tokio::fs::read(&request.source_manifest_path)
            .await
            .map_err(|e| anyhow::anyhow!("reading source manifest: {e}"))?;
        let collected_bytes = tokio::fs::read(&request.collected_manifest_path)
            .await
            .map_err(|e| anyhow::anyhow!("reading collected manifest: {e}"))?;

        let options = ReconcileOptions {
            job_id: job_id.to_string(),
            custodian: request.custodian.clone(),
            reports_dir: Some(format!("./var/hco/logs/reconcile/{job_id}")),
            dry_run: request.dry_run,
        };
        let report =
            hco_reconciler::reconcile(&source_bytes, &collected_bytes, &self.config.reconcile, &options)?;

        self.store
            .append_log(JobLog {
                id: Uuid::new_v4(),
                job_id,
                ts: self.clock.now(),
                level: if report.overall_passed { "INFO" } else { "WARN" }.to_string(),
                category: "Reconciler".to_string(),
                message: format!(
                    "reconciliation {} (missed={}, extras={}, hash_mismatches={})",
                    if report.overall_passed { "passed" } else { "failed" },
                    report.missed.len(),
                    report.extras.len(),
                    report.hash_mismatches.len()
                ),
                details: serde_json::to_value(&report).ok(),
                correlation_id: None,
            })
            .await?;

        Ok(report)
    }
}
