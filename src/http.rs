//! HTTP surface over the [`Orchestrator`].
//!
//! | Route | Success | Errors |
//! |-------|---------|--------|
//! | `POST /convert` | task JSON | 400 `{"detail"}` |
//! | `GET /status/{task_id}` | task JSON | 404 `{"detail": "Task not found"}` |
//! | `GET /download/{file_name}` | `application/gzip` stream | 404 `{"detail": "File not found"}` |
//! | `GET /health` | `{"status": "ok"}` | |

use crate::error::Doc2MdError;
use crate::orchestrator::Orchestrator;
use crate::request::parse_request;
use crate::task::{ConversionTask, TaskId};
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Build the service router.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/convert", post(convert))
        .route("/status/{task_id}", get(status))
        .route("/download/{file_name}", get(download))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

/// Error body in the `{"detail": "..."}` shape clients expect.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<Doc2MdError> for ApiError {
    fn from(e: Doc2MdError) -> Self {
        let (status, detail) = match e {
            Doc2MdError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Doc2MdError::TaskNotFound { .. } => (StatusCode::NOT_FOUND, "Task not found".to_string()),
            Doc2MdError::ArtifactNotFound { .. } => (StatusCode::NOT_FOUND, "File not found".to_string()),
            other => {
                warn!("Request failed: {}", other);
                (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        };
        Self { status, detail }
    }
}

async fn convert(State(orch): State<Arc<Orchestrator>>, body: Bytes) -> Result<Json<ConversionTask>, ApiError> {
    let request = parse_request(&body)?;
    Ok(Json(orch.submit(request)))
}

async fn status(
    State(orch): State<Arc<Orchestrator>>,
    Path(task_id): Path<String>,
) -> Result<Json<ConversionTask>, ApiError> {
    Ok(Json(orch.poll_status(&TaskId::from(task_id.as_str()))?))
}

async fn download(
    State(orch): State<Arc<Orchestrator>>,
    Path(file_name): Path<String>,
) -> Result<Response, ApiError> {
    let file = orch.open_artifact(&file_name).await?;
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        body,
    )
        .into_response())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
