//! C8: Collector Drivers — interface only.
//!
//! `Collector` is a capability trait, not a concrete network client: the
//! actual Graph-API-shaped outbound calls live behind [`GraphTransport`],
//! which this crate deliberately leaves unimplemented.
//! What this crate DOES own is the dispatch/bookkeeping every back-end
//! shares: progress cadence, idempotency keying via C2, cancellation
//! checks at call boundaries, and throttling backoff via an
//! `ExponentialBackoff`-with-jitter wrapper around the
//! `exponential_backoff` crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hco_artifact_store::ArtifactStore;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("collect cancelled")]
    Cancelled,
    #[error(transparent)]
    ArtifactStore(#[from] hco_artifact_store::Error),
    #[error("upstream exhausted retry budget after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Progress reported at least once per 60s or per 100 items, whichever
/// comes first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressDelta {
    pub items_delta: i64,
    pub bytes_delta: i64,
    /// Checkpoint JSON patches the caller should persist alongside this
    /// progress tick, keyed by `checkpoint_key`.
    pub checkpoint_updates: Vec<(String, serde_json::Value)>,
}

/// Where a [`Collector`] reports incremental progress, 
/// "`progress_sink.report(items_delta, bytes_delta, checkpoint_updates)`".
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, delta: ProgressDelta) -> Result<()>;
}

/// A [`ProgressSink`] that records every report in memory, for tests.
#[derive(Default)]
pub struct RecordingProgressSink {
    reports: std::sync::Mutex<Vec<ProgressDelta>>,
}

impl RecordingProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ProgressDelta> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressSink for RecordingProgressSink {
    async fn report(&self, delta: ProgressDelta) -> Result<()> {
        self.reports.lock().unwrap().push(delta);
        Ok(())
    }
}

/// `CollectionResult = { ok, items_count, bytes, manifest_digest, error? }`.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionResult {
    pub ok: bool,
    pub items_count: i64,
    pub bytes: i64,
    pub manifest_digest: Option<String>,
    pub error: Option<String>,
}

/// A single unit of resumable work handed to a [`Collector`]: the shard
/// plus whatever checkpoints already exist for it.
#[derive(Debug, Clone)]
pub struct CollectRequest {
    pub shard_id: Uuid,
    pub custodian: String,
    pub job_type: hco_models::entities::JobType,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub resume_set: Vec<hco_models::entities::Checkpoint>,
}

/// The C8 capability contract: `estimate` for AutoRouter/Shard
/// Planner sizing, `collect` to actually execute a shard.
#[async_trait]
pub trait Collector: Send + Sync {
    /// `estimate(request) → (bytes, items, confidence)`.
    async fn estimate(&self, request: &CollectRequest) -> Result<(i64, i64, f64)>;

    /// `collect(shard, checkpoint_resume_set, progress_sink, cancel) →
    /// CollectionResult`. MUST check `cancel` at every external-call
    /// boundary and be idempotent per `(shard_id, source_item_id)`.
    async fn collect(
        &self,
        request: &CollectRequest,
        progress_sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<CollectionResult>;
}

/// A test/null double that reports no items and succeeds instantly.
pub struct NullCollector;

#[async_trait]
impl Collector for NullCollector {
    async fn estimate(&self, _request: &CollectRequest) -> Result<(i64, i64, f64)> {
        Ok((0, 0, 1.0))
    }

    async fn collect(
        &self,
        _request: &CollectRequest,
        _progress_sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<CollectionResult> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(CollectionResult {
            ok: true,
            items_count: 0,
            bytes: 0,
            manifest_digest: None,
            error: None,
        })
    }
}

/// A single item as surfaced by [`GraphTransport::list_items`], prior to
/// being written to the artifact store.
#[derive(Debug, Clone)]
pub struct UpstreamItem {
    pub source_item_id: String,
    pub size_bytes: i64,
    pub bytes: Vec<u8>,
}

/// The network boundary every back-end calls through. No concrete
/// implementation ships here; production deployments provide a
/// Graph-API-shaped adapter.
#[async_trait]
pub trait GraphTransport: Send + Sync {
    /// Lists the next page of items for a shard's window, honoring
    /// `delta_token` for incremental resumption. Returns the items plus the
    /// token to resume from on the following call, or `None` once
    /// exhausted.
    async fn list_items(
        &self,
        request: &CollectRequest,
        delta_token: Option<&str>,
    ) -> std::result::Result<(Vec<UpstreamItem>, Option<String>), TransportError>;
}

/// A transport-layer failure, distinguishing throttling (retryable with
/// backoff) from everything else.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("throttled by upstream, retry after {retry_after:?}")]
    Throttled { retry_after: Option<Duration> },
    #[error("transport error: {0}")]
    Other(String),
}

/// Wraps `exponential_backoff::Backoff` with jitter: an attempt counter
/// plus a `next()` that yields `None` once the retry budget is exhausted.
pub struct Throttle {
    attempt: u32,
    backoff: exponential_backoff::Backoff,
}

impl Throttle {
    pub fn new(max_retries: u32, min: Duration, max: Duration) -> Self {
        let mut backoff = exponential_backoff::Backoff::new(max_retries, min, Some(max));
        backoff.set_jitter(0.3);
        Self { attempt: 0, backoff }
    }

    /// Returns the next backoff duration to sleep, or `None` if the retry
    /// budget is exhausted.
    pub fn next_delay(&mut self, server_retry_after: Option<Duration>) -> Option<Duration> {
        self.attempt += 1;
        let computed = self.backoff.next(self.attempt)?;
        // A server-provided retry-after hint always wins over our own
        // schedule.
        Some(server_retry_after.unwrap_or(computed))
    }
}

/// Progress reporting cadence: "once per 60s or per 100
/// items, whichever comes first".
pub struct ProgressCadence {
    last_report: std::sync::Mutex<std::time::Instant>,
    items_since_report: AtomicI64,
    interval: Duration,
    item_threshold: i64,
}

impl ProgressCadence {
    pub fn new(interval: Duration, item_threshold: i64) -> Self {
        Self {
            last_report: std::sync::Mutex::new(std::time::Instant::now()),
            items_since_report: AtomicI64::new(0),
            interval,
            item_threshold,
        }
    }

    pub fn default_policy() -> Self {
        Self::new(Duration::from_secs(60), 100)
    }

    /// Records `items` newly processed and returns whether a report is due.
    pub fn tick(&self, items: i64) -> bool {
        let since = self.items_since_report.fetch_add(items, Ordering::SeqCst) + items;
        if since >= self.item_threshold {
            self.items_since_report.store(0, Ordering::SeqCst);
            *self.last_report.lock().unwrap() = std::time::Instant::now();
            return true;
        }
        let mut last = self.last_report.lock().unwrap();
        if last.elapsed() >= self.interval {
            self.items_since_report.store(0, Ordering::SeqCst);
            *last = std::time::Instant::now();
            return true;
        }
        false
    }
}

/// The PerItem back-end: streams items, writing each artifact
/// via [`ArtifactStore`] and computing its SHA-256 in the same pass.
pub struct PerItemCollector<T: GraphTransport> {
    transport: T,
    artifacts: Arc<dyn ArtifactStore>,
}

impl<T: GraphTransport> PerItemCollector<T> {
    pub fn new(transport: T, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { transport, artifacts }
    }

    fn artifact_path(request: &CollectRequest, source_item_id: &str) -> String {
        format!(
            "items/{}/{}/{}",
            request.custodian, request.shard_id, source_item_id
        )
    }
}

#[async_trait]
impl<T: GraphTransport + Send + Sync> Collector for PerItemCollector<T> {
    async fn estimate(&self, request: &CollectRequest) -> Result<(i64, i64, f64)> {
        let (items, _) = self
            .transport
            .list_items(request, None)
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("{e}")))?;
        let bytes: i64 = items.iter().map(|i| i.size_bytes).sum();
        Ok((bytes, items.len() as i64, 0.5))
    }

    #[tracing::instrument(skip_all, fields(shard_id = %request.shard_id), err)]
    async fn collect(
        &self,
        request: &CollectRequest,
        progress_sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<CollectionResult> {
        let cadence = ProgressCadence::default_policy();
        let mut throttle = Throttle::new(8, Duration::from_millis(500), Duration::from_secs(60));
        let mut delta_token = request
            .resume_set
            .first()
            .and_then(|c| c.payload.get("delta_token"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let mut total_items = 0i64;
        let mut total_bytes = 0i64;
        let mut pending_items = 0i64;
        let mut pending_bytes = 0i64;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let page = loop {
                match self.transport.list_items(request, delta_token.as_deref()).await {
                    Ok(page) => break page,
                    Err(TransportError::Throttled { retry_after }) => {
                        tracing::warn!(shard_id = %request.shard_id, "BackoffTriggered");
                        match throttle.next_delay(retry_after) {
                            Some(delay) => tokio::time::sleep(delay).await,
                            None => {
                                return Err(Error::RetriesExhausted {
                                    attempts: 8,
                                    message: "throttled upstream".to_string(),
                                })
                            }
                        }
                    }
                    Err(TransportError::Other(message)) => {
                        return Ok(CollectionResult {
                            ok: false,
                            items_count: total_items,
                            bytes: total_bytes,
                            manifest_digest: None,
                            error: Some(message),
                        })
                    }
                }
            };
            let (items, next_token) = page;

            for item in &items {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let path = Self::artifact_path(request, &item.source_item_id);
                self.artifacts.put(&path, &item.bytes).await?;
                total_items += 1;
                total_bytes += item.size_bytes;
                pending_items += 1;
                pending_bytes += item.size_bytes;

                if cadence.tick(1) {
                    progress_sink
                        .report(ProgressDelta {
                            items_delta: pending_items,
                            bytes_delta: pending_bytes,
                            checkpoint_updates: vec![],
                        })
                        .await?;
                    pending_items = 0;
                    pending_bytes = 0;
                }
            }

            delta_token = next_token;
            if delta_token.is_none() {
                break;
            }
        }

        if pending_items > 0 || pending_bytes > 0 {
            progress_sink
                .report(ProgressDelta {
                    items_delta: pending_items,
                    bytes_delta: pending_bytes,
                    checkpoint_updates: vec![],
                })
                .await?;
        }

        Ok(CollectionResult {
            ok: true,
            items_count: total_items,
            bytes: total_bytes,
            manifest_digest: None,
            error: None,
        })
    }
}

/// An outbound queue message the Bulk driver enqueues to kick off an
/// external pipeline run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TriggerMessage {
    pub shard_id: Uuid,
    pub custodian: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// An inbound status update about a running bulk pipeline.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct StatusMessage {
    pub shard_id: Uuid,
    pub is_complete: bool,
    pub items_so_far: i64,
    pub bytes_so_far: i64,
    pub dataset_uri: Option<String>,
    pub error: Option<String>,
}

/// A referenced binary surfaced by the bulk pipeline's dataset, walked by
/// the Binary Fetcher sub-stage.
#[derive(Debug, Clone)]
pub struct DatasetBinaryRef {
    pub source_item_id: String,
    pub download_uri: String,
}

/// The queue/poll boundary the Bulk driver calls through: enqueue a
/// trigger, then observe status/dataset updates. No concrete message-bus
/// implementation ships here, mirroring [`GraphTransport`].
#[async_trait]
pub trait BulkPipelineTransport: Send + Sync {
    async fn enqueue_trigger(&self, message: TriggerMessage) -> std::result::Result<(), TransportError>;
    async fn poll_status(&self, shard_id: Uuid) -> std::result::Result<Option<StatusMessage>, TransportError>;
    async fn list_dataset_binaries(
        &self,
        dataset_uri: &str,
    ) -> std::result::Result<Vec<DatasetBinaryRef>, TransportError>;
    async fn download_binary(&self, download_uri: &str) -> std::result::Result<Vec<u8>, TransportError>;
}

/// The Bulk back-end: triggers an external pipeline, polls for
/// completion, then walks the resulting dataset with the Binary Fetcher.
/// The orchestrator treats the whole flow as one `collect` call.
pub struct BulkCollector<T: BulkPipelineTransport> {
    transport: T,
    artifacts: Arc<dyn ArtifactStore>,
    poll_interval: Duration,
}

impl<T: BulkPipelineTransport> BulkCollector<T> {
    pub fn new(transport: T, artifacts: Arc<dyn ArtifactStore>, poll_interval: Duration) -> Self {
        Self {
            transport,
            artifacts,
            poll_interval,
        }
    }
}

#[async_trait]
impl<T: BulkPipelineTransport + Send + Sync> Collector for BulkCollector<T> {
    async fn estimate(&self, _request: &CollectRequest) -> Result<(i64, i64, f64)> {
        // A bulk pipeline's true size is unknown until the run completes;
        // AutoRouter/Planner already size bulk jobs from the request's own
        // declared item/byte counts, not from this estimate.
        Ok((0, 0, 0.1))
    }

    #[tracing::instrument(skip_all, fields(shard_id = %request.shard_id), err)]
    async fn collect(
        &self,
        request: &CollectRequest,
        progress_sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<CollectionResult> {
        self.transport
            .enqueue_trigger(TriggerMessage {
                shard_id: request.shard_id,
                custodian: request.custodian.clone(),
                start_date: request.start_date,
                end_date: request.end_date,
            })
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("{e}")))?;

        let cadence = ProgressCadence::default_policy();
        let mut last_items = 0i64;
        let mut last_bytes = 0i64;

        let status = loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match self.transport.poll_status(request.shard_id).await {
                Ok(Some(status)) => {
                    let items_delta = status.items_so_far - last_items;
                    let bytes_delta = status.bytes_so_far - last_bytes;
                    if (items_delta > 0 || bytes_delta > 0) && cadence.tick(items_delta.max(1)) {
                        progress_sink
                            .report(ProgressDelta {
                                items_delta,
                                bytes_delta,
                                checkpoint_updates: vec![],
                            })
                            .await?;
                        last_items = status.items_so_far;
                        last_bytes = status.bytes_so_far;
                    }
                    if status.is_complete {
                        break status;
                    }
                }
                Ok(None) => {}
                Err(TransportError::Throttled { retry_after }) => {
                    tokio::time::sleep(retry_after.unwrap_or(self.poll_interval)).await;
                    continue;
                }
                Err(TransportError::Other(message)) => {
                    return Ok(CollectionResult {
                        ok: false,
                        items_count: last_items,
                        bytes: last_bytes,
                        manifest_digest: None,
                        error: Some(message),
                    })
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        };

        if let Some(error) = status.error {
            return Ok(CollectionResult {
                ok: false,
                items_count: last_items,
                bytes: last_bytes,
                manifest_digest: None,
                error: Some(error),
            });
        }

        let Some(dataset_uri) = status.dataset_uri else {
            return Ok(CollectionResult {
                ok: true,
                items_count: last_items,
                bytes: last_bytes,
                manifest_digest: None,
                error: None,
            });
        };

        // Binary Fetcher sub-stage: walk the dataset, download and write
        // each referenced binary, computing its hash on write via C2.
        let refs = self
            .transport
            .list_dataset_binaries(&dataset_uri)
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("{e}")))?;

        let fetched = AtomicU64::new(0);
        for binary_ref in &refs {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let bytes = self
                .transport
                .download_binary(&binary_ref.download_uri)
                .await
                .map_err(|e| Error::Other(anyhow::anyhow!("{e}")))?;
            let path = format!(
                "items/{}/{}/{}",
                request.custodian, request.shard_id, binary_ref.source_item_id
            );
            let put = self.artifacts.put(&path, &bytes).await?;
            last_bytes += put.size_bytes as i64;
            let count = fetched.fetch_add(1, Ordering::SeqCst) + 1;
            if cadence.tick(1) {
                progress_sink
                    .report(ProgressDelta {
                        items_delta: 1,
                        bytes_delta: put.size_bytes as i64,
                        checkpoint_updates: vec![],
                    })
                    .await?;
            }
            let _ = count;
        }

        Ok(CollectionResult {
            ok: true,
            items_count: last_items.max(refs.len() as i64),
            bytes: last_bytes,
            manifest_digest: None,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hco_artifact_store::memory::InMemoryArtifactStore;
    use std::sync::Mutex as StdMutex;

    fn request() -> CollectRequest {
        CollectRequest {
            shard_id: Uuid::new_v4(),
            custodian: "jdoe".to_string(),
            job_type: hco_models::entities::JobType::Email,
            start_date: Utc::now(),
            end_date: Utc::now(),
            resume_set: vec![],
        }
    }

    #[tokio::test]
    async fn null_collector_succeeds_with_no_items() {
        let result = NullCollector
            .collect(&request(), &RecordingProgressSink::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.items_count, 0);
    }

    #[tokio::test]
    async fn null_collector_respects_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = NullCollector
            .collect(&request(), &RecordingProgressSink::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    struct SinglePageTransport {
        items: Vec<UpstreamItem>,
    }

    #[async_trait]
    impl GraphTransport for SinglePageTransport {
        async fn list_items(
            &self,
            _request: &CollectRequest,
            delta_token: Option<&str>,
        ) -> std::result::Result<(Vec<UpstreamItem>, Option<String>), TransportError> {
            if delta_token.is_some() {
                return Ok((vec![], None));
            }
            Ok((self.items.clone(), None))
        }
    }

    #[tokio::test]
    async fn per_item_collector_writes_every_item_and_reports_progress() {
        let transport = SinglePageTransport {
            items: vec![
                UpstreamItem {
                    source_item_id: "msg-1".to_string(),
                    size_bytes: 10,
                    bytes: b"hello".to_vec(),
                },
                UpstreamItem {
                    source_item_id: "msg-2".to_string(),
                    size_bytes: 20,
                    bytes: b"world".to_vec(),
                },
            ],
        };
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let collector = PerItemCollector::new(transport, artifacts.clone());
        let sink = RecordingProgressSink::new();

        let result = collector
            .collect(&request(), &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.ok);
        assert_eq!(result.items_count, 2);
        assert!(!sink.reports().is_empty());
    }

    struct ThrottleThenSucceedTransport {
        attempts: StdMutex<u32>,
    }

    #[async_trait]
    impl GraphTransport for ThrottleThenSucceedTransport {
        async fn list_items(
            &self,
            _request: &CollectRequest,
            _delta_token: Option<&str>,
        ) -> std::result::Result<(Vec<UpstreamItem>, Option<String>), TransportError> {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            if *attempts < 3 {
                return Err(TransportError::Throttled {
                    retry_after: Some(Duration::from_millis(1)),
                });
            }
            Ok((vec![], None))
        }
    }

    #[tokio::test]
    async fn per_item_collector_absorbs_throttling_and_recovers() {
        let transport = ThrottleThenSucceedTransport {
            attempts: StdMutex::new(0),
        };
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let collector = PerItemCollector::new(transport, artifacts);
        let result = collector
            .collect(&request(), &RecordingProgressSink::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.ok);
        assert_eq!(*collector.transport.attempts.lock().unwrap(), 3);
    }

    #[test]
    fn throttle_honors_server_retry_after_over_own_schedule() {
        let mut throttle = Throttle::new(5, Duration::from_secs(1), Duration::from_secs(10));
        let delay = throttle.next_delay(Some(Duration::from_millis(7))).unwrap();
        assert_eq!(delay, Duration::from_millis(7));
    }

    #[test]
    fn throttle_exhausts_after_max_retries() {
        let mut throttle = Throttle::new(2, Duration::from_millis(1), Duration::from_millis(10));
        assert!(throttle.next_delay(None).is_some());
        assert!(throttle.next_delay(None).is_some());
        assert!(throttle.next_delay(None).is_none());
    }

    #[test]
    fn progress_cadence_fires_at_item_threshold() {
        let cadence = ProgressCadence::new(Duration::from_secs(600), 10);
        for _ in 0..9 {
            assert!(!cadence.tick(1));
        }
        assert!(cadence.tick(1));
    }
}
