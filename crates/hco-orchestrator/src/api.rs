//! The HTTP surface: a single shared `App` wrapping the controller behind
//! an `Arc`, a CORS layer, and one handler per listed endpoint.
//! Auth/authorization middleware is out of scope, so there's no
//! `authorize` layer here.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use hco_models::clock::Clock;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::controller::{
    CompleteJobRequest, CreateCheckpointRequest, CreateJobRequest, CreateJobResponse,
    CreateMatterRequest, IngestItemRequest, JobController, ReconcileRequest,
    ShardCompleteRequest, ShardProgressRequest,
};
use crate::error::ApiResult;

/// Shared application state. Cloned per request (cheap: every field is an
/// `Arc`).
#[derive(Clone)]
pub struct App<C: Clock> {
    controller: Arc<JobController<C>>,
}

impl<C: Clock> App<C> {
    pub fn new(controller: Arc<JobController<C>>) -> Self {
        Self { controller }
    }
}

pub fn build_router<C: Clock + 'static>(app: App<C>) -> Router<()> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/matters", post(create_matter))
        .route("/jobs", post(create_job))
        .route("/jobs/:id/start", post(start_job))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/items", post(ingest_items))
        .route("/jobs/:id/complete", post(complete_job))
        .route("/jobs/:id/reconcile", post(reconcile_job))
        .route("/jobs/:id/shards", get(list_shards))
        .route("/jobs/:id/logs", get(list_logs))
        .route("/jobs/:id/manifests", get(list_manifests).post(generate_manifest))
        .route("/manifests/:manifest_id", get(read_manifest))
        .route("/manifests/:manifest_id/csv", get(read_manifest_csv))
        .route("/manifests/:manifest_id/seal", post(seal_manifest))
        .route("/manifests/:manifest_id/verify", post(verify_manifest))
        .route("/shards/:id/checkpoints", get(list_checkpoints).post(create_checkpoint))
        .route("/sharded-jobs", post(create_sharded_job))
        .route("/sharded-jobs/shards/next", post(claim_next_shard))
        .route(
            "/sharded-jobs/shards/:id/progress",
            put(report_shard_progress),
        )
        .route(
            "/sharded-jobs/shards/:id/complete",
            put(complete_shard_handler),
        )
        .route("/sharded-jobs/shards/:id/extend", post(extend_lease))
        .route("/sharded-jobs/shards/:id/release", post(release_shard))
        .route("/sharded-jobs/shards/:id/retry", post(retry_shard))
        .route(
            "/sharded-jobs/maintenance/cleanup-locks",
            post(cleanup_locks),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

async fn create_matter<C: Clock>(
    State(app): State<App<C>>,
    Json(request): Json<CreateMatterRequest>,
) -> ApiResult<Response> {
    let matter = app.controller.create_matter(request).await?;
    Ok((StatusCode::CREATED, Json(matter)).into_response())
}

async fn create_job<C: Clock>(
    State(app): State<App<C>>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<Response> {
    let result: CreateJobResponse = app.controller.create_job(request).await?;
    Ok((StatusCode::CREATED, Json(result)).into_response())
}

#[derive(Debug, Deserialize)]
struct StartJobRequest {
    #[serde(default)]
    custodians: Vec<String>,
    range_start: chrono::DateTime<chrono::Utc>,
    range_end: chrono::DateTime<chrono::Utc>,
}

async fn start_job<C: Clock>(
    State(app): State<App<C>>,
    Path(id): Path<Uuid>,
    Json(request): Json<StartJobRequest>,
) -> ApiResult<Response> {
    let shards = app
        .controller
        .start_job(id, request.custodians, request.range_start, request.range_end)
        .await?;
    Ok((StatusCode::OK, Json(shards)).into_response())
}

/// `POST /sharded-jobs`: create-then-start in one call, for callers that
/// don't need to inspect the `Pending` job in between.
async fn create_sharded_job<C: Clock>(
    State(app): State<App<C>>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<Response> {
    let range_start = request.range_start;
    let range_end = request.range_end;
    let custodians = request.custodians.clone();
    let created = app.controller.create_job(request).await?;
    let shards = app
        .controller
        .start_job(created.job.id, custodians, range_start, range_end)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "job": created.job, "decision": created.decision, "shards": shards })),
    )
        .into_response())
}

async fn get_job<C: Clock>(
    State(app): State<App<C>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<hco_models::entities::Job>> {
    Ok(Json(app.controller.get_job(id).await?))
}

async fn ingest_items<C: Clock>(
    State(app): State<App<C>>,
    Path(id): Path<Uuid>,
    Json(items): Json<Vec<IngestItemRequest>>,
) -> ApiResult<Json<serde_json::Value>> {
    let inserted = app.controller.ingest_items(id, items).await?;
    Ok(Json(serde_json::json!({ "inserted": inserted })))
}

async fn complete_job<C: Clock>(
    State(app): State<App<C>>,
    Path(id): Path<Uuid>,
    Json(request): Json<CompleteJobRequest>,
) -> ApiResult<Json<hco_models::entities::Job>> {
    Ok(Json(app.controller.complete_job(id, request).await?))
}

async fn reconcile_job<C: Clock>(
    State(app): State<App<C>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ReconcileRequest>,
) -> ApiResult<Json<hco_reconciler::ReconcileReport>> {
    Ok(Json(app.controller.reconcile_job(id, request).await?))
}

async fn list_shards<C: Clock>(
    State(app): State<App<C>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<hco_models::entities::Shard>>> {
    Ok(Json(app.controller.list_shards_for_job(id).await?))
}

async fn list_logs<C: Clock>(
    State(app): State<App<C>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<hco_models::entities::JobLog>>> {
    Ok(Json(app.controller.list_logs_for_job(id).await?))
}

async fn list_checkpoints<C: Clock>(
    State(app): State<App<C>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<hco_models::entities::Checkpoint>>> {
    Ok(Json(app.controller.list_checkpoints_for_shard(id).await?))
}

async fn create_checkpoint<C: Clock>(
    State(app): State<App<C>>,
    Path(shard_id): Path<Uuid>,
    Json(mut request): Json<CreateCheckpointRequest>,
) -> ApiResult<Response> {
    request.shard_id = shard_id;
    let checkpoint = app.controller.create_checkpoint(request).await?;
    Ok((StatusCode::CREATED, Json(checkpoint)).into_response())
}

async fn list_manifests<C: Clock>(
    State(app): State<App<C>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<hco_models::entities::JobManifest>>> {
    Ok(Json(app.controller.list_manifests_for_job(id).await?))
}

async fn generate_manifest<C: Clock>(
    State(app): State<App<C>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let (manifest_id, manifest) = app.controller.generate_manifest(id).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "manifest_id": manifest_id, "manifest": manifest })),
    )
        .into_response())
}

async fn read_manifest<C: Clock>(
    State(app): State<App<C>>,
    Path(manifest_id): Path<Uuid>,
) -> ApiResult<Json<hco_manifest::Manifest>> {
    Ok(Json(app.controller.read_manifest(manifest_id).await?))
}

async fn read_manifest_csv<C: Clock>(
    State(app): State<App<C>>,
    Path(manifest_id): Path<Uuid>,
) -> ApiResult<Response> {
    let bytes = app.controller.read_manifest_csv(manifest_id).await?;
    Ok(([("content-type", "text/csv")], bytes).into_response())
}

async fn seal_manifest<C: Clock>(
    State(app): State<App<C>>,
    Path(manifest_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let sealed_path = app.controller.seal_manifest(manifest_id).await?;
    Ok(Json(serde_json::json!({ "sealed_path": sealed_path })))
}

async fn verify_manifest<C: Clock>(
    State(app): State<App<C>>,
    Path(manifest_id): Path<Uuid>,
) -> ApiResult<Json<hco_manifest::VerificationResult>> {
    Ok(Json(app.controller.verify_manifest(manifest_id).await?))
}

async fn claim_next_shard<C: Clock>(
    State(app): State<App<C>>,
    Json(request): Json<ClaimRequest>,
) -> ApiResult<Json<Option<hco_models::entities::Shard>>> {
    Ok(Json(app.controller.claim_next(&request.worker_id).await?))
}

#[derive(Debug, Deserialize)]
struct ClaimRequest {
    worker_id: String,
}

#[derive(Debug, Deserialize)]
struct LeaseTokenOnly {
    lease_token: Uuid,
    #[serde(default)]
    extra_duration_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
struct BoolResult {
    ok: bool,
}

async fn report_shard_progress<C: Clock>(
    State(app): State<App<C>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ShardProgressRequest>,
) -> ApiResult<Json<BoolResult>> {
    let ok = app.controller.report_progress(id, request).await?;
    Ok(Json(BoolResult { ok }))
}

async fn complete_shard_handler<C: Clock>(
    State(app): State<App<C>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ShardCompleteRequest>,
) -> ApiResult<Json<BoolResult>> {
    let ok = app.controller.complete_shard(id, request).await?;
    Ok(Json(BoolResult { ok }))
}

async fn extend_lease<C: Clock>(
    State(app): State<App<C>>,
    Path(id): Path<Uuid>,
    Json(request): Json<LeaseTokenOnly>,
) -> ApiResult<Json<BoolResult>> {
    let extra = request
        .extra_duration_secs
        .map(std::time::Duration::from_secs);
    let ok = app.controller.extend_lease(id, request.lease_token, extra).await?;
    Ok(Json(BoolResult { ok }))
}

async fn release_shard<C: Clock>(
    State(app): State<App<C>>,
    Path(id): Path<Uuid>,
    Json(request): Json<LeaseTokenOnly>,
) -> ApiResult<Json<BoolResult>> {
    let ok = app
        .controller
        .release_shard(id, request.lease_token)
        .await?;
    Ok(Json(BoolResult { ok }))
}

#[derive(Debug, Deserialize)]
struct RetryRequest {
    reason: String,
}

async fn retry_shard<C: Clock>(
    State(app): State<App<C>>,
    Path(id): Path<Uuid>,
    Json(request): Json<RetryRequest>,
) -> ApiResult<Json<hco_store::RetryOutcome>> {
    Ok(Json(app.controller.retry_shard(id, request.reason).await?))
}

async fn cleanup_locks<C: Clock>(State(app): State<App<C>>) -> ApiResult<Json<serde_json::Value>> {
    let reaped = app.controller.cleanup_locks().await?;
    Ok(Json(serde_json::json!({ "reaped": reaped })))
}
