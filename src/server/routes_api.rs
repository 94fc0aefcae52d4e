use crate::catalog::scan_artifacts;
use crate::clips::{ClipJob, ClipStatus};
use crate::server::AppContext;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

pub fn api_routes() -> Router<AppContext> {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/clips", get(list_clips))
        .route("/api/jobs", get(list_jobs))
}

async fn health(State(ctx): State<AppContext>) -> impl IntoResponse {
    let status = ctx.status.snapshot();
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "event_code": status.event_code,
        "stream_connected": status.stream_connected,
        "controller_connected": status.controller_connected,
    }))
}

async fn status(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(ctx.status.snapshot())
}

async fn list_clips(State(ctx): State<AppContext>) -> Result<impl IntoResponse, StatusCode> {
    let artifacts = scan_artifacts(&ctx.clips_dir).await.map_err(|e| {
        tracing::error!("Failed to list {:?}: {}", ctx.clips_dir, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(artifacts))
}

#[derive(Deserialize)]
struct ListJobsQuery {
    status: Option<ClipStatus>,
    limit: Option<usize>,
}

async fn list_jobs(
    State(ctx): State<AppContext>,
    Query(params): Query<ListJobsQuery>,
) -> impl IntoResponse {
    let jobs: Vec<ClipJob> = ctx
        .scheduler
        .as_ref()
        .map(|scheduler| scheduler.jobs())
        .unwrap_or_default()
        .into_iter()
        .filter(|job| params.status.map_or(true, |s| job.status == s))
        .take(params.limit.unwrap_or(usize::MAX))
        .collect();
    Json(jobs)
}
