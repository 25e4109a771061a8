//! REST routes over the job registry.

use std::str::FromStr;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};

use crate::error::JobError;
use crate::jobs::{JobId, JobKind, JobRegistry, JobResult, JobSpec, ResultData, WorkDescriptor};
use crate::schedule::CronSpec;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: JobRegistry,
}

/// Build the Axum router for the job API.
pub fn job_routes(registry: JobRegistry) -> Router {
    let state = AppState { registry };

    Router::new()
        .route("/health", get(health))
        .route("/api/jobs", get(list_jobs).post(create_job).delete(purge_finished))
        .route("/api/jobs/stats", get(stats))
        .route("/api/jobs/{id}", get(get_job).delete(purge_job))
        .route("/api/jobs/{id}/result", get(get_result))
        .route("/api/jobs/{id}/cancel", post(cancel_job))
        .route("/api/jobs/{id}/messages", post(post_message))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

// ── Errors ──────────────────────────────────────────────────────────────

/// A [`JobError`] rendered as `{status, kind, message}` with a matching
/// status code.
pub struct ApiError(JobError);

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_code(self.0.status());
        (
            status,
            Json(json!({
                "status": self.0.status(),
                "kind": self.0.kind().to_string(),
                "message": self.0.message(),
            })),
        )
            .into_response()
    }
}

fn status_code(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn parse_id(raw: &str) -> Result<JobId, Response> {
    JobId::from_str(raw).map_err(|_| ApiError(JobError::invalid_job_id(raw)).into_response())
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "job-orchestrator"
    }))
}

// ── Jobs ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateJobRequest {
    #[serde(rename = "type")]
    kind: Option<String>,
    module: Option<String>,
    function: Option<String>,
    #[serde(default)]
    payload: Value,
    title: Option<String>,
    description: Option<String>,
    parent_id: Option<String>,
    cron: Option<String>,
}

impl CreateJobRequest {
    fn into_spec(self) -> Result<JobSpec, JobError> {
        let kind = JobKind::from_str(self.kind.as_deref().unwrap_or_default())?;
        let module = self.module.ok_or_else(|| JobError::missing_field("module"))?;
        let function = self
            .function
            .ok_or_else(|| JobError::missing_field("function"))?;
        let title = self.title.ok_or_else(|| JobError::missing_field("title"))?;

        let work = WorkDescriptor::new(module, function).with_payload(self.payload);
        let mut spec = JobSpec::new(kind, title, work);
        spec.description = self.description;

        if let Some(raw) = self.parent_id {
            // An id that cannot parse can never name an existing parent.
            let parent_id =
                JobId::from_str(&raw).map_err(|_| JobError::parent_not_found(&raw))?;
            spec = spec.with_parent(parent_id);
        }

        match (kind, self.cron) {
            (JobKind::Scheduler, Some(raw)) => spec = spec.with_cron(CronSpec::from_str(&raw)?),
            (JobKind::Scheduler, None) => return Err(JobError::missing_field("cron")),
            (JobKind::Thread, Some(_)) => debug!("Ignoring cron on a thread job request"),
            (JobKind::Thread, None) => {}
        }

        Ok(spec)
    }
}

async fn create_job(
    State(state): State<AppState>,
    Json(body): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = body.into_spec()?;
    let id = state.registry.create_job(spec).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"status": 202, "message": "Job created", "id": id})),
    ))
}

async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.list_jobs().await)
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.stats().await)
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let job_id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.registry.get_job_detail(job_id).await {
        Ok(detail) => Json(detail).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn get_result(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let job_id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.registry.get_job_result(job_id).await {
        Ok(result) => result_response(result),
        Err(e) => ApiError(e).into_response(),
    }
}

/// Binary results are served raw with their headers; everything else as a
/// `{status, message, data}` document.
fn result_response(result: JobResult) -> Response {
    let status = status_code(result.status);
    match result.data {
        Some(ResultData::Binary(bytes)) => {
            let mut response = Response::new(Body::from(bytes));
            *response.status_mut() = status;
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            for (name, value) in result.headers.unwrap_or_default() {
                match (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(&value),
                ) {
                    (Ok(name), Ok(value)) => {
                        headers.insert(name, value);
                    }
                    _ => warn!(header = %name, "Skipping invalid result header"),
                }
            }
            response
        }
        data => {
            let data = match data {
                Some(ResultData::Json(value)) => value,
                _ => Value::Null,
            };
            (
                status,
                Json(json!({
                    "status": result.status,
                    "message": result.message,
                    "data": data,
                })),
            )
                .into_response()
        }
    }
}

async fn cancel_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let job_id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.registry.cancel_job(job_id).await {
        Ok(confirmation) => Json(confirmation).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn purge_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let job_id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.registry.purge_job(job_id).await {
        Ok(confirmation) => Json(confirmation).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn purge_finished(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.purge_finished().await)
}

async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let job_id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.registry.post_message(job_id, body).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({"status": 202, "message": "Message delivered"})),
        )
            .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}
