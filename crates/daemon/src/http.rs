use std::sync::Arc;

use audit_core::api::{
    ErrorResponse, ProveRequest, ProveResponse, StatusResponse, SubmitRequest, SubmitResponse,
};
use audit_core::{JobId, JobStatus};
use audit_pipeline::{job_status, ProofError, StatusError, SubmitError};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::Services;

#[derive(Clone)]
pub struct AppState {
    svc: Arc<Services>,
}

pub fn router(svc: Arc<Services>) -> Router {
    let state = AppState { svc };
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/audits", post(submit_audit))
        .route("/v1/audits/{id}", get(audit_status))
        .route("/v1/proofs", post(prove))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn submit_audit(
    State(st): State<AppState>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, AppError> {
    let Json(req) = body?;
    let job_id = st.svc.gateway.submit(req).await?;
    Ok(Json(SubmitResponse {
        job_id,
        status: JobStatus::Pending,
    }))
}

async fn audit_status(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let id = JobId::from_str(id);
    let status = job_status(st.svc.jobs.as_ref(), st.svc.results.as_ref(), &id).await?;
    Ok(Json(status))
}

async fn prove(
    State(st): State<AppState>,
    body: Result<Json<ProveRequest>, JsonRejection>,
) -> Result<Json<ProveResponse>, AppError> {
    let Json(req) = body?;
    let proof = st
        .svc
        .compliance
        .generate_proof(&req.job_id, req.threshold)
        .await?;
    Ok(Json(ProveResponse { proof }))
}

/// Error mapped to a status code and a `{"error": ...}` body.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Unprocessable(String),
    Internal(anyhow::Error),
}

impl From<JsonRejection> for AppError {
    fn from(value: JsonRejection) -> Self {
        AppError::BadRequest(value.body_text())
    }
}

impl From<SubmitError> for AppError {
    fn from(value: SubmitError) -> Self {
        match value {
            SubmitError::UnsupportedSource(_) => AppError::Unprocessable(value.to_string()),
            SubmitError::Store(e) => AppError::Internal(e.into()),
            _ => AppError::BadRequest(value.to_string()),
        }
    }
}

impl From<StatusError> for AppError {
    fn from(value: StatusError) -> Self {
        match value {
            StatusError::NotFound(_) => AppError::NotFound(value.to_string()),
            other => AppError::Internal(other.into()),
        }
    }
}

impl From<ProofError> for AppError {
    fn from(value: ProofError) -> Self {
        match value {
            ProofError::InvalidThreshold => AppError::BadRequest(value.to_string()),
            ProofError::NoResult(_) => AppError::NotFound(value.to_string()),
            ProofError::Store(e) => AppError::Internal(e.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}
