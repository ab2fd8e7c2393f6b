//! Entities persisted by the MetadataStore.
//!
//! All times are UTC. Every row type here is a plain data struct; behavior
//! (status machines, invariants) lives in the component that owns the
//! transition, not on these structs — an explicit `MetadataStore`
//! capability with no ambient state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "job_type", rename_all = "PascalCase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum JobType {
    Email,
    OneDrive,
    SharePoint,
    Teams,
    Mixed,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobType::Email => "Email",
            JobType::OneDrive => "OneDrive",
            JobType::SharePoint => "SharePoint",
            JobType::Teams => "Teams",
            JobType::Mixed => "Mixed",
        };
        f.write_str(s)
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "route", rename_all = "PascalCase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Route {
    PerItemApi,
    BulkPipeline,
    Hybrid,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "job_status", rename_all = "PascalCase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum JobStatus {
    Pending,
    Planning,
    Running,
    Completed,
    Failed,
    PartiallyCompleted,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses never transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Failed
                | JobStatus::PartiallyCompleted
                | JobStatus::Cancelled
        )
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "shard_status", rename_all = "PascalCase")
)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ShardStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    PartiallyCompleted,
    Cancelled,
    Retrying,
}

impl ShardStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ShardStatus::Completed
                | ShardStatus::Failed
                | ShardStatus::PartiallyCompleted
                | ShardStatus::Cancelled
        )
    }

    /// A shard holding a lease is in exactly one of these statuses.
    pub fn holds_lease(&self) -> bool {
        matches!(
            self,
            ShardStatus::Assigned | ShardStatus::Running | ShardStatus::Retrying
        )
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "checkpoint_type", rename_all = "PascalCase")
)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CheckpointType {
    MailFolder,
    OneDrive,
    SharePoint,
    Teams,
    Batch,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "delta_type", rename_all = "PascalCase")
)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DeltaType {
    Mail,
    OneDrive,
    SharePoint,
    Teams,
    Calendar,
}

/// An investigation container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Matter {
    pub id: i64,
    pub name: String,
    pub case_number: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub is_active: bool,
}

/// One collection request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Job {
    pub id: Uuid,
    pub matter_id: i64,
    pub custodian_email: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub route: Route,
    pub priority: i16,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub estimated_bytes: i64,
    pub estimated_items: i64,
    pub actual_bytes: i64,
    pub actual_items: i64,
    pub output_prefix: String,
    pub manifest_hash: Option<String>,
    pub error: Option<String>,
}

/// An independently executable slice of a Job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Shard {
    pub id: Uuid,
    pub parent_job_id: Uuid,
    pub shard_index: i32,
    pub total_shards: i32,
    pub shard_identifier: String,
    pub custodian_email: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub job_type: JobType,
    pub route: Route,
    pub status: ShardStatus,
    pub assigned_worker_id: Option<String>,
    pub lease_token: Option<Uuid>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub estimated_bytes: i64,
    pub estimated_items: i64,
    pub actual_bytes: i64,
    pub actual_items: i64,
    pub processed_bytes: i64,
    pub processed_items: i64,
    pub progress_pct: i16,
    pub retry_count: i32,
    pub max_retries: i32,
    pub output_prefix: String,
    pub manifest_hash: Option<String>,
    pub error: Option<String>,
    /// Optimistic concurrency column used to break reap-expiry races.
    pub row_version: i64,
}

impl Shard {
    /// `shard_identifier` format: `custodian|YYYYMMDD|YYYYMMDD|jobtype`.
    pub fn make_identifier(
        custodian_email: &str,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        job_type: JobType,
    ) -> String {
        format!(
            "{}|{}|{}|{}",
            custodian_email,
            start_date.format("%Y%m%d"),
            end_date.format("%Y%m%d"),
            job_type
        )
    }
}

/// A progress marker inside a Shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Checkpoint {
    pub id: Uuid,
    pub shard_id: Uuid,
    pub checkpoint_type: CheckpointType,
    pub checkpoint_key: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_completed: bool,
    pub items_processed: i64,
    pub bytes_processed: i64,
    pub correlation_id: Option<Uuid>,
}

/// A single collected artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CollectedItem {
    pub id: Uuid,
    pub shard_id: Uuid,
    pub source_item_id: String,
    pub item_type: String,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub item_date: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
    pub size_bytes: i64,
    pub sha256: String,
    pub artifact_path: Option<String>,
    pub is_successful: bool,
    pub error: Option<String>,
}

/// An append-only audit entry keyed by job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct JobLog {
    pub id: Uuid,
    pub job_id: Uuid,
    pub ts: DateTime<Utc>,
    pub level: String,
    pub category: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub correlation_id: Option<Uuid>,
}

/// A sealed per-job chain-of-custody record. The manifest's own content
/// (items, hashes, signature) is owned by `hco-manifest`; this row is the
/// `MetadataStore` index over it so `GET /custody/job/{job_id}/manifests`
/// doesn't need to list blob storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct JobManifest {
    pub id: Uuid,
    pub job_id: Uuid,
    pub manifest_hash: String,
    pub json_path: String,
    pub csv_path: String,
    pub sealed_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sealed_at: Option<DateTime<Utc>>,
}

/// An incremental-collection bookmark.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct DeltaCursor {
    pub id: Uuid,
    pub scope_id: String,
    pub delta_type: DeltaType,
    pub custodian_email: String,
    pub delta_token: String,
    pub last_delta_at: DateTime<Utc>,
    pub baseline_completed_at: Option<DateTime<Utc>>,
    pub last_delta_items: i64,
    pub last_delta_bytes: i64,
    pub delta_query_count: i64,
    pub is_active: bool,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_identifier_matches_expected_format() {
        let start = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let end = DateTime::parse_from_rfc3339("2024-01-31T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let id = Shard::make_identifier("a@x.com", start, end, JobType::Email);
        assert_eq!(id, "a@x.com|20240101|20240131|Email");
    }

    #[test]
    fn job_status_terminal_set() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::PartiallyCompleted.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }

    #[test]
    fn shard_status_lease_holding_set() {
        for s in [ShardStatus::Assigned, ShardStatus::Running, ShardStatus::Retrying] {
            assert!(s.holds_lease());
        }
        for s in [ShardStatus::Pending, ShardStatus::Completed, ShardStatus::Failed] {
            assert!(!s.holds_lease());
        }
    }
}
