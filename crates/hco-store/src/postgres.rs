//! The production `MetadataStore`: Postgres via `sqlx` — a thin `PgPool`
//! wrapper, `FromRow` structs decoded straight off `SELECT *`, and
//! `FOR UPDATE SKIP LOCKED` for the one query that must serialize
//! concurrent claimants.
//!
//! These queries are written with the runtime `sqlx::query`/`query_as` API
//! rather than the `query!`/`query_as!` compile-time macros: the macros
//! require a live database (or a checked-in `.sqlx` cache) to verify
//! against at build time, neither of which this workspace can assume. See
//! `DESIGN.md` for the tradeoff.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hco_models::entities::{
    Checkpoint, CollectedItem, DeltaCursor, DeltaType, Job, JobLog, JobManifest, JobStatus,
    Matter, Shard, ShardStatus,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{Error, LeaseOutcome, MetadataStore, Result, RetryOutcome};

/// A `MetadataStore` backed by Postgres.
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    #[tracing::instrument(skip(self, matter), err)]
    async fn create_matter(&self, matter: Matter) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO matters (id, name, case_number, created_at, created_by, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(matter.id)
        .bind(&matter.name)
        .bind(&matter.case_number)
        .bind(matter.created_at)
        .bind(&matter.created_by)
        .bind(matter.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_matter(&self, id: i64) -> Result<Option<Matter>> {
        let matter = sqlx::query_as::<_, Matter>("SELECT * FROM matters WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(matter)
    }

    #[tracing::instrument(skip(self, job), err)]
    async fn create_job(&self, job: Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, matter_id, custodian_email, job_type, status, route, priority,
                created_at, started_at, ended_at, estimated_bytes, estimated_items,
                actual_bytes, actual_items, output_prefix, manifest_hash, error
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)
            "#,
        )
        .bind(job.id)
        .bind(job.matter_id)
        .bind(&job.custodian_email)
        .bind(job.job_type)
        .bind(job.status)
        .bind(job.route)
        .bind(job.priority)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.ended_at)
        .bind(job.estimated_bytes)
        .bind(job.estimated_items)
        .bind(job.actual_bytes)
        .bind(job.actual_items)
        .bind(&job.output_prefix)
        .bind(&job.manifest_hash)
        .bind(&job.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn update_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE jobs SET status = $1, error = COALESCE($2, error) WHERE id = $3",
        )
        .bind(status)
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if rows.rows_affected() == 0 {
            return Err(Error::NotFound(format!("job {id}")));
        }
        Ok(())
    }

    async fn update_job_actuals(&self, id: Uuid, actual_bytes: i64, actual_items: i64) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE jobs SET actual_bytes = $1, actual_items = $2 WHERE id = $3",
        )
        .bind(actual_bytes)
        .bind(actual_items)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if rows.rows_affected() == 0 {
            return Err(Error::NotFound(format!("job {id}")));
        }
        Ok(())
    }

    async fn set_job_manifest_hash(&self, id: Uuid, manifest_hash: String) -> Result<()> {
        let rows = sqlx::query("UPDATE jobs SET manifest_hash = $1 WHERE id = $2")
            .bind(manifest_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if rows.rows_affected() == 0 {
            return Err(Error::NotFound(format!("job {id}")));
        }
        Ok(())
    }

    /// Inserts the planner's shards for a job in a single transaction
    ///.
    #[tracing::instrument(skip(self, shards), err)]
    async fn insert_shards(&self, shards: Vec<Shard>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for shard in &shards {
            sqlx::query(
                r#"
                INSERT INTO shards (
                    id, parent_job_id, shard_index, total_shards, shard_identifier,
                    custodian_email, start_date, end_date, job_type, route, status,
                    assigned_worker_id, lease_token, lease_expires_at, started_at, ended_at,
                    estimated_bytes, estimated_items, actual_bytes, actual_items,
                    processed_bytes, processed_items, progress_pct, retry_count, max_retries,
                    output_prefix, manifest_hash, error, row_version
                ) VALUES (
                    $1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,
                    $17,$18,$19,$20,$21,$22,$23,$24,$25,$26,$27,$28,$29
                )
                "#,
            )
            .bind(shard.id)
            .bind(shard.parent_job_id)
            .bind(shard.shard_index)
            .bind(shard.total_shards)
            .bind(&shard.shard_identifier)
            .bind(&shard.custodian_email)
            .bind(shard.start_date)
            .bind(shard.end_date)
            .bind(shard.job_type)
            .bind(shard.route)
            .bind(shard.status)
            .bind(&shard.assigned_worker_id)
            .bind(shard.lease_token)
            .bind(shard.lease_expires_at)
            .bind(shard.started_at)
            .bind(shard.ended_at)
            .bind(shard.estimated_bytes)
            .bind(shard.estimated_items)
            .bind(shard.actual_bytes)
            .bind(shard.actual_items)
            .bind(shard.processed_bytes)
            .bind(shard.processed_items)
            .bind(shard.progress_pct)
            .bind(shard.retry_count)
            .bind(shard.max_retries)
            .bind(&shard.output_prefix)
            .bind(&shard.manifest_hash)
            .bind(&shard.error)
            .bind(shard.row_version)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_shard(&self, id: Uuid) -> Result<Option<Shard>> {
        let shard = sqlx::query_as::<_, Shard>("SELECT * FROM shards WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(shard)
    }

    async fn list_shards_for_job(&self, job_id: Uuid) -> Result<Vec<Shard>> {
        let shards = sqlx::query_as::<_, Shard>(
            "SELECT * FROM shards WHERE parent_job_id = $1 ORDER BY shard_index ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(shards)
    }

    /// Claims the highest-priority pending shard under row-level locking
    ///.
    #[tracing::instrument(skip(self), err)]
    async fn claim_next_shard(
        &self,
        worker_id: &str,
        lease_duration: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Shard>> {
        let mut tx = self.pool.begin().await?;

        let candidate = sqlx::query_as::<_, Shard>(
            r#"
            SELECT s.* FROM shards s
            JOIN jobs j ON j.id = s.parent_job_id
            WHERE s.status = 'Pending'
            ORDER BY j.priority ASC, s.start_date ASC, s.shard_index ASC
            LIMIT 1
            FOR UPDATE OF s SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut shard) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let token = Uuid::new_v4();
        let expires_at = now + chrono::Duration::from_std(lease_duration).unwrap();

        sqlx::query(
            r#"
            UPDATE shards SET
                status = 'Assigned',
                assigned_worker_id = $1,
                lease_token = $2,
                lease_expires_at = $3,
                started_at = COALESCE(started_at, $4),
                row_version = row_version + 1
            WHERE id = $5
            "#,
        )
        .bind(worker_id)
        .bind(token)
        .bind(expires_at)
        .bind(now)
        .bind(shard.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        shard.status = ShardStatus::Assigned;
        shard.assigned_worker_id = Some(worker_id.to_string());
        shard.lease_token = Some(token);
        shard.lease_expires_at = Some(expires_at);
        shard.started_at.get_or_insert(now);
        shard.row_version += 1;
        Ok(Some(shard))
    }

    async fn extend_lease(
        &self,
        shard_id: Uuid,
        lease_token: Uuid,
        lease_duration: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome> {
        let expires_at = now + chrono::Duration::from_std(lease_duration).unwrap();
        let rows = sqlx::query(
            r#"
            UPDATE shards SET lease_expires_at = $1, row_version = row_version + 1
            WHERE id = $2 AND lease_token = $3
                AND status IN ('Assigned', 'Running', 'Retrying')
            "#,
        )
        .bind(expires_at)
        .bind(shard_id)
        .bind(lease_token)
        .execute(&self.pool)
        .await?;
        Ok(rows.rows_affected() == 1)
    }

    async fn update_shard_progress(
        &self,
        shard_id: Uuid,
        lease_token: Uuid,
        processed_bytes: i64,
        processed_items: i64,
        progress_pct: i16,
    ) -> Result<LeaseOutcome> {
        let rows = sqlx::query(
            r#"
            UPDATE shards SET
                status = 'Running',
                processed_bytes = $1,
                processed_items = $2,
                progress_pct = $3,
                row_version = row_version + 1
            WHERE id = $4 AND lease_token = $5
                AND status IN ('Assigned', 'Running', 'Retrying')
            "#,
        )
        .bind(processed_bytes)
        .bind(processed_items)
        .bind(progress_pct)
        .bind(shard_id)
        .bind(lease_token)
        .execute(&self.pool)
        .await?;
        Ok(rows.rows_affected() == 1)
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
        let rows = sqlx::query(
            r#"
            UPDATE shards SET
                status = 'Completed',
                actual_bytes = $1,
                actual_items = $2,
                manifest_hash = $3,
                ended_at = $4,
                progress_pct = 100,
                lease_token = NULL,
                lease_expires_at = NULL,
                row_version = row_version + 1
            WHERE id = $5 AND lease_token = $6
                AND status IN ('Assigned', 'Running', 'Retrying')
            "#,
        )
        .bind(actual_bytes)
        .bind(actual_items)
        .bind(manifest_hash)
        .bind(now)
        .bind(shard_id)
        .bind(lease_token)
        .execute(&self.pool)
        .await?;
        Ok(rows.rows_affected() == 1)
    }

    /// Marks a shard failed, advancing `retry_count` and choosing `Pending`
    /// vs. terminal `Failed`. The increment-and-branch is
    /// a single statement so two racing reapers can't both see a
    /// pre-increment `retry_count`.
    async fn fail_shard(
        &self,
        shard_id: Uuid,
        lease_token: Uuid,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome> {
        let rows = sqlx::query(
            r#"
            UPDATE shards SET
                retry_count = retry_count + 1,
                error = $1,
                lease_token = NULL,
                lease_expires_at = NULL,
                assigned_worker_id = NULL,
                status = CASE WHEN retry_count + 1 < max_retries THEN 'Pending' ELSE 'Failed' END,
                ended_at = CASE WHEN retry_count + 1 < max_retries THEN ended_at ELSE $2 END,
                row_version = row_version + 1
            WHERE id = $3 AND lease_token = $4
                AND status IN ('Assigned', 'Running', 'Retrying')
            "#,
        )
        .bind(error)
        .bind(now)
        .bind(shard_id)
        .bind(lease_token)
        .execute(&self.pool)
        .await?;
        Ok(rows.rows_affected() == 1)
    }

    async fn release_shard(&self, shard_id: Uuid, lease_token: Uuid) -> Result<LeaseOutcome> {
        let rows = sqlx::query(
            r#"
            UPDATE shards SET
                status = 'Pending',
                lease_token = NULL,
                lease_expires_at = NULL,
                assigned_worker_id = NULL,
                row_version = row_version + 1
            WHERE id = $1 AND lease_token = $2
                AND status IN ('Assigned', 'Running', 'Retrying')
            "#,
        )
        .bind(shard_id)
        .bind(lease_token)
        .execute(&self.pool)
        .await?;
        Ok(rows.rows_affected() == 1)
    }

    async fn retry_shard(&self, shard_id: Uuid, reason: String) -> Result<RetryOutcome> {
        let shard = self
            .get_shard(shard_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("shard {shard_id}")))?;
        if shard.status != ShardStatus::Failed {
            return Ok(RetryOutcome::NotFailed);
        }

        let retried = shard.retry_count + 1 <= shard.max_retries;
        let new_status = if retried { "Pending" } else { "Failed" };
        sqlx::query(
            "UPDATE shards SET retry_count = retry_count + 1, error = $1, status = $2, row_version = row_version + 1 WHERE id = $3",
        )
        .bind(reason)
        .bind(new_status)
        .bind(shard_id)
        .execute(&self.pool)
        .await?;

        Ok(if retried {
            RetryOutcome::Retried
        } else {
            RetryOutcome::Exhausted
        })
    }

    /// Sweeps every lease-holding shard whose lease has expired
    ///. Idempotent: a shard already reaped by a
    /// concurrent sweep no longer matches `lease_expires_at < now`.
    #[tracing::instrument(skip(self), err)]
    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Shard>> {
        let reaped = sqlx::query_as::<_, Shard>(
            r#"
            UPDATE shards SET
                retry_count = retry_count + 1,
                error = 'lease expired',
                lease_token = NULL,
                lease_expires_at = NULL,
                assigned_worker_id = NULL,
                status = CASE WHEN retry_count + 1 < max_retries THEN 'Pending' ELSE 'Failed' END,
                ended_at = CASE WHEN retry_count + 1 < max_retries THEN ended_at ELSE $1 END,
                row_version = row_version + 1
            WHERE status IN ('Assigned', 'Running', 'Retrying')
                AND lease_expires_at < $1
            RETURNING *
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(reaped)
    }

    async fn create_checkpoint(&self, checkpoint: Checkpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (
                id, shard_id, checkpoint_type, checkpoint_key, payload, created_at,
                completed_at, is_completed, items_processed, bytes_processed, correlation_id
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
            "#,
        )
        .bind(checkpoint.id)
        .bind(checkpoint.shard_id)
        .bind(checkpoint.checkpoint_type)
        .bind(&checkpoint.checkpoint_key)
        .bind(&checkpoint.payload)
        .bind(checkpoint.created_at)
        .bind(checkpoint.completed_at)
        .bind(checkpoint.is_completed)
        .bind(checkpoint.items_processed)
        .bind(checkpoint.bytes_processed)
        .bind(checkpoint.correlation_id)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict(format!("checkpoint {} already exists for shard", checkpoint.checkpoint_key))
            }
            _ => Error::Sqlx(e),
        })?;
        Ok(())
    }

    async fn update_checkpoint_payload(&self, id: Uuid, payload: serde_json::Value) -> Result<()> {
        let rows = sqlx::query(
            r#"
            UPDATE checkpoints SET payload = payload || $1
            WHERE id = $2 AND is_completed = FALSE
            "#,
        )
        .bind(&payload)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if rows.rows_affected() == 0 {
            return Err(Error::Conflict(format!(
                "checkpoint {id} is completed or missing and may not be mutated"
            )));
        }
        Ok(())
    }

    async fn update_checkpoint_progress(
        &self,
        id: Uuid,
        items_processed: i64,
        bytes_processed: i64,
    ) -> Result<()> {
        let rows = sqlx::query(
            r#"
            UPDATE checkpoints SET items_processed = $1, bytes_processed = $2
            WHERE id = $3 AND is_completed = FALSE
            "#,
        )
        .bind(items_processed)
        .bind(bytes_processed)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if rows.rows_affected() == 0 {
            return Err(Error::Conflict(format!(
                "checkpoint {id} is completed or missing and may not be mutated"
            )));
        }
        Ok(())
    }

    async fn complete_checkpoint(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE checkpoints SET is_completed = TRUE, completed_at = COALESCE(completed_at, $1) WHERE id = $2",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if rows.rows_affected() == 0 {
            return Err(Error::NotFound(format!("checkpoint {id}")));
        }
        Ok(())
    }

    async fn get_checkpoint(
        &self,
        shard_id: Uuid,
        checkpoint_key: &str,
    ) -> Result<Option<Checkpoint>> {
        let checkpoint = sqlx::query_as::<_, Checkpoint>(
            "SELECT * FROM checkpoints WHERE shard_id = $1 AND checkpoint_key = $2",
        )
        .bind(shard_id)
        .bind(checkpoint_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(checkpoint)
    }

    async fn get_checkpoint_by_id(&self, id: Uuid) -> Result<Option<Checkpoint>> {
        let checkpoint = sqlx::query_as::<_, Checkpoint>("SELECT * FROM checkpoints WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(checkpoint)
    }

    async fn list_checkpoints_for_shard(&self, shard_id: Uuid) -> Result<Vec<Checkpoint>> {
        let checkpoints = sqlx::query_as::<_, Checkpoint>(
            "SELECT * FROM checkpoints WHERE shard_id = $1 ORDER BY created_at ASC",
        )
        .bind(shard_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(checkpoints)
    }

    async fn resume_set(&self, shard_id: Uuid) -> Result<Vec<Checkpoint>> {
        let checkpoints = sqlx::query_as::<_, Checkpoint>(
            "SELECT * FROM checkpoints WHERE shard_id = $1 AND is_completed = FALSE ORDER BY created_at ASC",
        )
        .bind(shard_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(checkpoints)
    }

    /// Inserts items, skipping any `(shard_id, source_item_id)` pair already
    /// present, via `ON CONFLICT DO
    /// NOTHING` against the uniqueness index.
    #[tracing::instrument(skip(self, items), err)]
    async fn insert_items(&self, items: Vec<CollectedItem>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for item in &items {
            let rows = sqlx::query(
                r#"
                INSERT INTO collected_items (
                    id, shard_id, source_item_id, item_type, subject, "from", "to", item_date,
                    collected_at, size_bytes, sha256, artifact_path, is_successful, error
                ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
                ON CONFLICT (shard_id, source_item_id) DO NOTHING
                "#,
            )
            .bind(item.id)
            .bind(item.shard_id)
            .bind(&item.source_item_id)
            .bind(&item.item_type)
            .bind(&item.subject)
            .bind(&item.from)
            .bind(&item.to)
            .bind(item.item_date)
            .bind(item.collected_at)
            .bind(item.size_bytes)
            .bind(&item.sha256)
            .bind(&item.artifact_path)
            .bind(item.is_successful)
            .bind(&item.error)
            .execute(&mut *tx)
            .await?;
            inserted += rows.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn list_items_for_shard(&self, shard_id: Uuid) -> Result<Vec<CollectedItem>> {
        let items = sqlx::query_as::<_, CollectedItem>(
            "SELECT * FROM collected_items WHERE shard_id = $1",
        )
        .bind(shard_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Ordered `(shard_index, id)` step 1, for deterministic
    /// manifest sequencing.
    async fn list_items_for_job(&self, job_id: Uuid) -> Result<Vec<CollectedItem>> {
        let items = sqlx::query_as::<_, CollectedItem>(
            r#"
            SELECT ci.* FROM collected_items ci
            JOIN shards s ON s.id = ci.shard_id
            WHERE s.parent_job_id = $1
            ORDER BY s.shard_index ASC, ci.id ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn append_log(&self, log: JobLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_logs (id, job_id, ts, level, category, message, details, correlation_id)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            "#,
        )
        .bind(log.id)
        .bind(log.job_id)
        .bind(log.ts)
        .bind(&log.level)
        .bind(&log.category)
        .bind(&log.message)
        .bind(&log.details)
        .bind(log.correlation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_logs_for_job(&self, job_id: Uuid) -> Result<Vec<JobLog>> {
        let logs = sqlx::query_as::<_, JobLog>(
            "SELECT * FROM job_logs WHERE job_id = $1 ORDER BY ts ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    async fn get_cursor(&self, scope_id: &str, delta_type: DeltaType) -> Result<Option<DeltaCursor>> {
        let cursor = sqlx::query_as::<_, DeltaCursor>(
            "SELECT * FROM delta_cursors WHERE scope_id = $1 AND delta_type = $2",
        )
        .bind(scope_id)
        .bind(delta_type)
        .fetch_optional(&self.pool)
        .await?;
        Ok(cursor)
    }

    async fn upsert_cursor(&self, cursor: DeltaCursor) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delta_cursors (
                id, scope_id, delta_type, custodian_email, delta_token, last_delta_at,
                baseline_completed_at, last_delta_items, last_delta_bytes, delta_query_count,
                is_active, error
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            ON CONFLICT (scope_id) DO UPDATE SET
                delta_token = EXCLUDED.delta_token,
                last_delta_at = EXCLUDED.last_delta_at,
                baseline_completed_at = EXCLUDED.baseline_completed_at,
                last_delta_items = EXCLUDED.last_delta_items,
                last_delta_bytes = EXCLUDED.last_delta_bytes,
                delta_query_count = EXCLUDED.delta_query_count,
                is_active = EXCLUDED.is_active,
                error = EXCLUDED.error
            "#,
        )
        .bind(cursor.id)
        .bind(&cursor.scope_id)
        .bind(cursor.delta_type)
        .bind(&cursor.custodian_email)
        .bind(&cursor.delta_token)
        .bind(cursor.last_delta_at)
        .bind(cursor.baseline_completed_at)
        .bind(cursor.last_delta_items)
        .bind(cursor.last_delta_bytes)
        .bind(cursor.delta_query_count)
        .bind(cursor.is_active)
        .bind(&cursor.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_manifest(&self, manifest: JobManifest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_manifests (
                id, job_id, manifest_hash, json_path, csv_path, sealed_path, created_at, sealed_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            "#,
        )
        .bind(manifest.id)
        .bind(manifest.job_id)
        .bind(&manifest.manifest_hash)
        .bind(&manifest.json_path)
        .bind(&manifest.csv_path)
        .bind(&manifest.sealed_path)
        .bind(manifest.created_at)
        .bind(manifest.sealed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_manifest(&self, id: Uuid) -> Result<Option<JobManifest>> {
        let manifest =
            sqlx::query_as::<_, JobManifest>("SELECT * FROM job_manifests WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(manifest)
    }

    async fn list_manifests_for_job(&self, job_id: Uuid) -> Result<Vec<JobManifest>> {
        let manifests = sqlx::query_as::<_, JobManifest>(
            "SELECT * FROM job_manifests WHERE job_id = $1 ORDER BY created_at ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(manifests)
    }

    async fn mark_manifest_sealed(
        &self,
        id: Uuid,
        sealed_path: String,
        sealed_at: DateTime<Utc>,
    ) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE job_manifests SET sealed_path = $1, sealed_at = $2 WHERE id = $3",
        )
        .bind(sealed_path)
        .bind(sealed_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if rows.rows_affected() == 0 {
            return Err(Error::NotFound(format!("manifest {id}")));
        }
        Ok(())
    }
}
