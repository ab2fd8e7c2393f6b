//! C7: Checkpoint & Resume Engine — fine-grained per-shard progress so
//! interrupted work resumes without recollecting items.
//!
//! `checkpoint_type` is a tagged sum, not a class hierarchy: [`CheckpointPayload`] is the
//! Rust enum, and [`parse_payload`]/[`validate_payload_for_type`] are the
//! only places that know how to interpret the opaque JSON column per tag.

use chrono::{DateTime, Utc};
use hco_models::entities::{Checkpoint, CheckpointType};
use hco_store::MetadataStore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("checkpoint {shard_id}/{checkpoint_key} already exists")]
    AlreadyExists { shard_id: Uuid, checkpoint_key: String },
    #[error("payload does not match checkpoint_type {checkpoint_type:?}: {source}")]
    BadPayload {
        checkpoint_type: CheckpointType,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Store(#[from] hco_store::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The typed shape of each `checkpoint_type`'s payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CheckpointPayload {
    MailFolder {
        folder_id: String,
        folder_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        delta_token: Option<String>,
        items_in_folder: i64,
    },
    OneDrive {
        drive_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        delta_token: Option<String>,
        items_in_drive: i64,
    },
    SharePoint {
        site_id: String,
        list_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        delta_token: Option<String>,
        items_in_list: i64,
    },
    Teams {
        team_id: String,
        channel_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_message_id: Option<String>,
        items_in_channel: i64,
    },
    Batch {
        batch_index: i64,
        context_opaque_blob: serde_json::Value,
    },
}

/// Parses `payload` according to `checkpoint_type`, failing if the shape
/// doesn't match the tag's required fields.
pub fn parse_payload(
    checkpoint_type: CheckpointType,
    payload: &serde_json::Value,
) -> Result<CheckpointPayload> {
    // `CheckpointPayload` is `#[serde(untagged)]`, so match the tag
    // ourselves instead of letting serde try every variant in order (a
    // `Batch` payload could otherwise misparse as some other shape).
    let typed = match checkpoint_type {
        CheckpointType::MailFolder => {
            #[derive(Deserialize)]
            struct Shape {
                folder_id: String,
                folder_name: String,
                delta_token: Option<String>,
                items_in_folder: i64,
            }
            let s: Shape = serde_json::from_value(payload.clone())
                .map_err(|source| Error::BadPayload { checkpoint_type, source })?;
            CheckpointPayload::MailFolder {
                folder_id: s.folder_id,
                folder_name: s.folder_name,
                delta_token: s.delta_token,
                items_in_folder: s.items_in_folder,
            }
        }
        CheckpointType::OneDrive => {
            #[derive(Deserialize)]
            struct Shape {
                drive_id: String,
                delta_token: Option<String>,
                items_in_drive: i64,
            }
            let s: Shape = serde_json::from_value(payload.clone())
                .map_err(|source| Error::BadPayload { checkpoint_type, source })?;
            CheckpointPayload::OneDrive {
                drive_id: s.drive_id,
                delta_token: s.delta_token,
                items_in_drive: s.items_in_drive,
            }
        }
        CheckpointType::SharePoint => {
            #[derive(Deserialize)]
            struct Shape {
                site_id: String,
                list_id: String,
                delta_token: Option<String>,
                items_in_list: i64,
            }
            let s: Shape = serde_json::from_value(payload.clone())
                .map_err(|source| Error::BadPayload { checkpoint_type, source })?;
            CheckpointPayload::SharePoint {
                site_id: s.site_id,
                list_id: s.list_id,
                delta_token: s.delta_token,
                items_in_list: s.items_in_list,
            }
        }
        CheckpointType::Teams => {
            #[derive(Deserialize)]
            struct Shape {
                team_id: String,
                channel_id: String,
                last_message_id: Option<String>,
                items_in_channel: i64,
            }
            let s: Shape = serde_json::from_value(payload.clone())
                .map_err(|source| Error::BadPayload { checkpoint_type, source })?;
            CheckpointPayload::Teams {
                team_id: s.team_id,
                channel_id: s.channel_id,
                last_message_id: s.last_message_id,
                items_in_channel: s.items_in_channel,
            }
        }
        CheckpointType::Batch => {
            #[derive(Deserialize)]
            struct Shape {
                batch_index: i64,
                context_opaque_blob: serde_json::Value,
            }
            let s: Shape = serde_json::from_value(payload.clone())
                .map_err(|source| Error::BadPayload { checkpoint_type, source })?;
            CheckpointPayload::Batch {
                batch_index: s.batch_index,
                context_opaque_blob: s.context_opaque_blob,
            }
        }
    };
    Ok(typed)
}

/// The result of `validate(shard_id)`.
#[derive(Debug, Clone, Serialize)]
pub struct Validation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Drives checkpoint lifecycle operations against a [`MetadataStore`].
pub struct CheckpointEngine {
    store: std::sync::Arc<dyn MetadataStore>,
}

impl CheckpointEngine {
    pub fn new(store: std::sync::Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// `create(shard_id, type, key, payload, correlation_id) -> Checkpoint`
    ///: `(shard_id, checkpoint_key)` must be unique.
    #[tracing::instrument(skip(self, payload), err)]
    pub async fn create(
        &self,
        shard_id: Uuid,
        checkpoint_type: CheckpointType,
        checkpoint_key: String,
        payload: serde_json::Value,
        correlation_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Checkpoint> {
        if self
            .store
            .get_checkpoint(shard_id, &checkpoint_key)
            .await?
            .is_some()
        {
            return Err(Error::AlreadyExists {
                shard_id,
                checkpoint_key,
            });
        }
        // Fail fast on a malformed payload rather than persisting garbage
        // that `validate` would only catch later.
        parse_payload(checkpoint_type, &payload)?;

        let checkpoint = Checkpoint {
            id: Uuid::new_v4(),
            shard_id,
            checkpoint_type,
            checkpoint_key,
            payload,
            created_at: now,
            completed_at: None,
            is_completed: false,
            items_processed: 0,
            bytes_processed: 0,
            correlation_id,
        };
        self.store.create_checkpoint(checkpoint.clone()).await?;
        Ok(checkpoint)
    }

    /// `update(checkpoint_id, delta_payload) -> Checkpoint`:
    /// shallow-merge, disallowed once `is_completed`.
    pub async fn update(
        &self,
        checkpoint_id: Uuid,
        delta_payload: serde_json::Value,
    ) -> Result<Checkpoint> {
        self.store
            .update_checkpoint_payload(checkpoint_id, delta_payload)
            .await?;
        self.store
            .get_checkpoint_by_id(checkpoint_id)
            .await?
            .ok_or_else(|| Error::Store(hco_store::Error::NotFound(checkpoint_id.to_string())))
    }

    /// `complete(checkpoint_id, items_processed, bytes_processed)`: idempotent.
    pub async fn complete(
        &self,
        checkpoint_id: Uuid,
        items_processed: i64,
        bytes_processed: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        // Record the final counts even on an already-completed row isn't
        // permitted by the store (append-only invariant); re-completing an
        // already-completed checkpoint with the same counts is a no-op.
        if let Some(existing) = self.store.get_checkpoint_by_id(checkpoint_id).await? {
            if existing.is_completed {
                return Ok(());
            }
        }
        self.store
            .update_checkpoint_progress(checkpoint_id, items_processed, bytes_processed)
            .await?;
        self.store.complete_checkpoint(checkpoint_id, now).await?;
        Ok(())
    }

    /// `resumeSet(shard_id) -> [Checkpoint]`: all non-completed
    /// checkpoints, oldest first. A collector driver MUST treat each
    /// payload as the authoritative starting position.
    pub async fn resume_set(&self, shard_id: Uuid) -> Result<Vec<Checkpoint>> {
        Ok(self.store.resume_set(shard_id).await?)
    }

    /// `validate(shard_id) -> {valid, errors[]}`: every
    /// checkpoint's payload must parse for its tag, and `items_processed`
    /// must be monotonically non-decreasing in creation order.
    pub async fn validate(&self, shard_id: Uuid) -> Result<Validation> {
        let checkpoints = self.store.list_checkpoints_for_shard(shard_id).await?;
        let mut errors = Vec::new();
        let mut last_items: i64 = 0;

        for checkpoint in &checkpoints {
            if let Err(err) = parse_payload(checkpoint.checkpoint_type, &checkpoint.payload) {
                errors.push(format!(
                    "checkpoint {} ({}): {}",
                    checkpoint.checkpoint_key, checkpoint.id, err
                ));
            }
            if checkpoint.items_processed < last_items {
                errors.push(format!(
                    "checkpoint {} ({}): items_processed {} is less than the prior checkpoint's {}",
                    checkpoint.checkpoint_key, checkpoint.id, checkpoint.items_processed, last_items
                ));
            }
            last_items = checkpoint.items_processed;
        }

        Ok(Validation {
            valid: errors.is_empty(),
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hco_store::fake::FakeStore;
    use std::sync::Arc;

    fn engine() -> CheckpointEngine {
        CheckpointEngine::new(Arc::new(FakeStore::new()))
    }

    #[tokio::test]
    async fn create_then_duplicate_key_is_rejected() {
        let engine = engine();
        let shard_id = Uuid::new_v4();
        let now = Utc::now();
        engine
            .create(
                shard_id,
                CheckpointType::Batch,
                "batch-0".to_string(),
                serde_json::json!({"batch_index": 0, "context_opaque_blob": {}}),
                None,
                now,
            )
            .await
            .unwrap();

        let err = engine
            .create(
                shard_id,
                CheckpointType::Batch,
                "batch-0".to_string(),
                serde_json::json!({"batch_index": 0, "context_opaque_blob": {}}),
                None,
                now,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn malformed_payload_for_tag_is_rejected() {
        let engine = engine();
        let err = engine
            .create(
                Uuid::new_v4(),
                CheckpointType::MailFolder,
                "folder-1".to_string(),
                serde_json::json!({"not_a_folder_field": true}),
                None,
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadPayload { .. }));
    }

    /// Checkpoint append-only property: no update
    /// against a completed checkpoint ever succeeds.
    #[tokio::test]
    async fn completed_checkpoint_rejects_payload_update() {
        let engine = engine();
        let shard_id = Uuid::new_v4();
        let now = Utc::now();
        let checkpoint = engine
            .create(
                shard_id,
                CheckpointType::Batch,
                "batch-0".to_string(),
                serde_json::json!({"batch_index": 0, "context_opaque_blob": {}}),
                None,
                now,
            )
            .await
            .unwrap();

        engine.complete(checkpoint.id, 10, 100, now).await.unwrap();
        let err = engine
            .update(checkpoint.id, serde_json::json!({"batch_index": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(hco_store::Error::Conflict(_))));
    }

    #[tokio::test]
    async fn resume_set_excludes_completed_oldest_first() {
        let engine = engine();
        let shard_id = Uuid::new_v4();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);

        let first = engine
            .create(
                shard_id,
                CheckpointType::Batch,
                "a".to_string(),
                serde_json::json!({"batch_index": 0, "context_opaque_blob": {}}),
                None,
                t0,
            )
            .await
            .unwrap();
        engine
            .create(
                shard_id,
                CheckpointType::Batch,
                "b".to_string(),
                serde_json::json!({"batch_index": 1, "context_opaque_blob": {}}),
                None,
                t1,
            )
            .await
            .unwrap();
        engine.complete(first.id, 5, 50, t1).await.unwrap();

        let resume = engine.resume_set(shard_id).await.unwrap();
        assert_eq!(resume.len(), 1);
        assert_eq!(resume[0].checkpoint_key, "b");
    }

    #[tokio::test]
    async fn validate_flags_non_monotonic_item_counts() {
        let engine = engine();
        let shard_id = Uuid::new_v4();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);

        let first = engine
            .create(
                shard_id,
                CheckpointType::Batch,
                "a".to_string(),
                serde_json::json!({"batch_index": 0, "context_opaque_blob": {}}),
                None,
                t0,
            )
            .await
            .unwrap();
        engine.complete(first.id, 100, 1000, t0).await.unwrap();

        let second = engine
            .create(
                shard_id,
                CheckpointType::Batch,
                "b".to_string(),
                serde_json::json!({"batch_index": 1, "context_opaque_blob": {}}),
                None,
                t1,
            )
            .await
            .unwrap();
        engine.complete(second.id, 10, 50, t1).await.unwrap();

        let result = engine.validate(shard_id).await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
    }
}
