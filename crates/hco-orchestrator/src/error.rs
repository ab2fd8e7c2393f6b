//! The HTTP-boundary error type: every component error is classified into
//! an `hco_models::error::Kind`, mapped to a status code, and surfaced as a
//! stable `error_code` string alongside a correlation id so operators can
//! grep the access log for the matching `JobLog` entry.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hco_models::error::Kind;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] hco_store::Error),
    #[error(transparent)]
    Router(#[from] hco_router::Error),
    #[error(transparent)]
    Planner(#[from] hco_planner::Error),
    #[error(transparent)]
    Scheduler(#[from] hco_scheduler::Error),
    #[error(transparent)]
    Checkpoints(#[from] hco_checkpoints::Error),
    #[error(transparent)]
    Manifest(#[from] hco_manifest::Error),
    #[error(transparent)]
    Reconciler(#[from] hco_reconciler::Error),
    #[error(transparent)]
    ArtifactStore(#[from] hco_artifact_store::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    fn kind(&self) -> Kind {
        match self {
            ApiError::NotFound(_) => Kind::ValidationError,
            ApiError::Validation(_) => Kind::ValidationError,
            ApiError::Store(hco_store::Error::NotFound(_)) => Kind::ValidationError,
            ApiError::Store(hco_store::Error::Conflict(_)) => Kind::LeaseStale,
            ApiError::Store(_) => Kind::Fatal,
            ApiError::Router(_) => Kind::ValidationError,
            ApiError::Planner(_) => Kind::ValidationError,
            ApiError::Scheduler(_) => Kind::LeaseStale,
            ApiError::Checkpoints(hco_checkpoints::Error::AlreadyExists { .. }) => {
                Kind::ValidationError
            }
            ApiError::Checkpoints(hco_checkpoints::Error::BadPayload { .. }) => {
                Kind::ValidationError
            }
            ApiError::Checkpoints(hco_checkpoints::Error::Store(_)) => Kind::Fatal,
            ApiError::Manifest(hco_manifest::Error::AlreadySealed(_)) => Kind::IntegrityError,
            ApiError::Manifest(_) => Kind::Fatal,
            ApiError::Reconciler(_) => Kind::ValidationError,
            ApiError::ArtifactStore(hco_artifact_store::Error::AlreadySealed(_)) => {
                Kind::IntegrityError
            }
            ApiError::ArtifactStore(hco_artifact_store::Error::NotFound(_)) => {
                Kind::ValidationError
            }
            ApiError::ArtifactStore(_) => Kind::Fatal,
            ApiError::Other(_) => Kind::Fatal,
        }
    }

    fn status(&self) -> StatusCode {
        match self.kind() {
            Kind::ValidationError => StatusCode::BAD_REQUEST,
            Kind::LeaseStale => StatusCode::CONFLICT,
            Kind::IntegrityError => StatusCode::CONFLICT,
            Kind::ReconcileGateFail => StatusCode::OK,
            Kind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            Kind::ShardFailure | Kind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error_code: &'static str,
    message: String,
    correlation_id: Uuid,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let correlation_id = Uuid::new_v4();

        if status.is_server_error() {
            tracing::error!(%correlation_id, ?kind, error = %self, "request failed");
        } else {
            tracing::warn!(%correlation_id, ?kind, error = %self, "request rejected");
        }

        let body = Json(ErrorBody {
            error_code: kind.error_code(),
            message: self.to_string(),
            correlation_id,
        });

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
