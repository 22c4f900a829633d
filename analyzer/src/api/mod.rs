//! HTTP routes.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use shared_types::{AnalyzeRequest, CatalogUpdate, CompletedRecord, FetchRecordsResponse};

use crate::error::AppError;
use crate::invoker::{INVOCATION_TYPE_EVENT, INVOCATION_TYPE_HEADER};
use crate::worker::Worker;
use crate::AppState;

pub mod websocket;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/analyze", post(analyze))
        .route("/fetchRecords", get(fetch_records))
        .route("/tasks/{task_id}", get(get_task))
        .route("/internal/worker", post(trigger_worker))
        .route(
            "/admin/analysis",
            put(put_analysis).delete(delete_analysis),
        )
        .route("/ws", get(websocket::ws_handler))
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "analyzer",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /analyze
///
/// The body is read leniently: anything that is not `{url: "..."}` is
/// reported as a missing URL.
async fn analyze(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, AppError> {
    let request: AnalyzeRequest = serde_json::from_slice(&body).unwrap_or_default();
    let response = state.initiator.initiate(request.url.as_deref()).await?;
    Ok(Json(response).into_response())
}

/// GET /fetchRecords - completed analyses, newest first
async fn fetch_records(State(state): State<Arc<AppState>>) -> Response {
    match state.tasks.list_completed().await {
        Ok(records) => Json(FetchRecordsResponse {
            success: true,
            data: records.into_iter().map(CompletedRecord::from).collect(),
        })
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Error fetching records");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "message": "Internal server error",
                    "error": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

/// GET /tasks/{task_id} - polling fallback for clients that missed pushes
async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Response, AppError> {
    match state.tasks.get(&task_id).await? {
        Some(record) => Ok(Json(record).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "Task not found", "taskId": task_id })),
        )
            .into_response()),
    }
}

/// POST /internal/worker
///
/// With `x-invocation-type: Event` the run is started in the background and
/// 202 is returned once the payload parses. Otherwise the run is awaited and
/// its report returned.
async fn trigger_worker(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let fire_and_forget = headers
        .get(INVOCATION_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case(INVOCATION_TYPE_EVENT));

    if !fire_and_forget {
        let report = state.worker.handle_raw(&body).await;
        let status =
            StatusCode::from_u16(report.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, Json(report)).into_response();
    }

    let payload = match Worker::parse_payload(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(error = %e, "Rejected worker trigger");
            return e.into_response();
        }
    };
    let task_id = payload.task_id.clone();
    let worker = state.worker.clone();
    tokio::spawn(async move {
        worker.run(payload).await;
    });
    (
        StatusCode::ACCEPTED,
        Json(json!({ "taskId": task_id, "status": "accepted" })),
    )
        .into_response()
}

/// PUT /admin/analysis - store findings for a site
async fn put_analysis(
    State(state): State<Arc<AppState>>,
    Json(update): Json<CatalogUpdate>,
) -> Result<Response, AppError> {
    let url = required_url(update.url.as_deref())?;
    let domain = state.catalog.put(url, &update.problems).await?;
    Ok(Json(json!({
        "message": "Analysis stored",
        "url": domain,
        "count": update.problems.len(),
    }))
    .into_response())
}

/// DELETE /admin/analysis - forget a site
async fn delete_analysis(
    State(state): State<Arc<AppState>>,
    Json(update): Json<CatalogUpdate>,
) -> Result<Response, AppError> {
    let url = required_url(update.url.as_deref())?;
    if state.catalog.remove(url).await? {
        Ok(Json(json!({ "message": "Analysis removed", "url": url })).into_response())
    } else {
        Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "No analysis stored for this URL", "url": url })),
        )
            .into_response())
    }
}

fn required_url(url: Option<&str>) -> Result<&str, AppError> {
    url.map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| AppError::InvalidInput(shared_types::URL_REQUIRED_MESSAGE.to_string()))
}
