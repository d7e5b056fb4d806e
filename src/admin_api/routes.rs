use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::detection::engine::DetectionEngine;
use crate::detection::ip_index::IpRangeIndex;
use crate::detection::patterns::CATALOG_VERSION;
use crate::scheduler::{JobKind, JobOutcome, Scheduler, SchedulerStatus};
use crate::sync::synchronizer::Synchronizer;
use crate::sync::{BatchReport, SyncError, SyncReport};

/// Shared application state passed to every Axum handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DetectionEngine>,
    pub index: Arc<IpRangeIndex>,
    pub sync: Arc<Synchronizer>,
    pub scheduler: Arc<Scheduler>,
    pub start_time: Instant,
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub ip_address: String,
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub bot: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogParams {
    pub limit: Option<usize>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.index.current();
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "catalog_version": CATALOG_VERSION,
        "categories": state.engine.catalog().categories(),
        "indexed_addresses": snapshot.len(),
        "index_built_at": snapshot.built_at(),
        "scheduler_running": state.scheduler.is_running(),
    }))
}

/// POST /api/v1/detect
pub async fn detect(State(state): State<AppState>, Json(body): Json<DetectRequest>) -> Json<Value> {
    let result = state.engine.detect(&body.user_agent, &body.ip_address);
    Json(json!({
        "is_bot": result.is_bot(),
        "bot_category": result.bot_category,
        "bot_name": result.bot_name,
        "detection_method": result.detection_method,
        "ip_source_type": result.ip_source_type,
    }))
}

// ---------------------------------------------------------------------------
// IP ranges
// ---------------------------------------------------------------------------

/// GET /api/v1/ip-ranges/stats?bot=
pub async fn get_range_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Response {
    match state.sync.stats(params.bot.as_deref()) {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Failed to load statistics: {}", e),
        ),
    }
}

/// GET /api/v1/ip-ranges/logs?limit=
pub async fn get_update_logs(
    State(state): State<AppState>,
    Query(params): Query<LogParams>,
) -> Response {
    let limit = params.limit.unwrap_or(50).min(500);
    match state.sync.recent_logs(limit) {
        Ok(logs) => Json(json!({ "logs": logs })).into_response(),
        Err(e) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Failed to load update log: {}", e),
        ),
    }
}

/// GET /api/v1/ip-ranges/sources
pub async fn list_sources(State(state): State<AppState>) -> Json<Value> {
    let sources: Vec<Value> = state
        .sync
        .sources()
        .iter()
        .map(|s| {
            json!({
                "name": s.name,
                "url": s.url,
                "bot_name": s.effective_bot_name(),
                "kind": "address_list",
            })
        })
        .collect();
    let scrape = state.sync.scrape_config();

    Json(json!({
        "sources": sources,
        "scrape": {
            "url": scrape.url,
            "bot_name": scrape.bot_name,
            "kind": "page_scrape",
        },
    }))
}

/// POST /api/v1/ip-ranges/update-all
pub async fn update_all(State(state): State<AppState>) -> Json<BatchReport> {
    Json(state.sync.update_all().await)
}

/// POST /api/v1/ip-ranges/update/{source}
pub async fn update_source(State(state): State<AppState>, Path(source): Path<String>) -> Response {
    match state.sync.update_source(&source).await {
        Ok(report) => Json(report).into_response(),
        Err(e @ SyncError::UnknownSource { .. }) => error_response(StatusCode::NOT_FOUND, e.to_string()),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// POST /api/v1/ip-ranges/update-chatgpt
pub async fn update_chatgpt(State(state): State<AppState>) -> Json<SyncReport> {
    Json(state.sync.refresh_chatgpt().await)
}

/// GET /api/v1/ip-ranges/test/{ip}
pub async fn test_ip(State(state): State<AppState>, Path(ip): Path<String>) -> Json<Value> {
    let hit = state.index.query(&ip);
    Json(json!({
        "ip": ip,
        "valid_ip": ip.parse::<IpAddr>().is_ok(),
        "is_match": hit.is_match,
        "bot_name": hit.bot_name,
        "source_type": hit.source_type,
    }))
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// GET /api/v1/scheduler/status
pub async fn scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}

/// POST /api/v1/scheduler/start
pub async fn scheduler_start(State(state): State<AppState>) -> Json<Value> {
    let changed = state.scheduler.start();
    Json(json!({
        "changed": changed,
        "message": if changed { "Scheduler started" } else { "Scheduler already running" },
        "status": state.scheduler.status(),
    }))
}

/// POST /api/v1/scheduler/stop
pub async fn scheduler_stop(State(state): State<AppState>) -> Json<Value> {
    let changed = state.scheduler.stop();
    Json(json!({
        "changed": changed,
        "message": if changed { "Scheduler stopped" } else { "Scheduler is not running" },
        "status": state.scheduler.status(),
    }))
}

fn job_response(kind: JobKind, outcome: JobOutcome) -> Json<Value> {
    Json(json!({
        "job": kind,
        "success": outcome.is_success(),
        "outcome": outcome,
    }))
}

/// POST /api/v1/scheduler/update-ip-now
pub async fn run_ip_update_now(State(state): State<AppState>) -> Json<Value> {
    job_response(JobKind::IpUpdate, state.scheduler.trigger_update_all_now().await)
}

/// POST /api/v1/scheduler/update-chatgpt-now
pub async fn run_chatgpt_refresh_now(State(state): State<AppState>) -> Json<Value> {
    job_response(
        JobKind::ChatgptRefresh,
        state.scheduler.trigger_chatgpt_refresh_now().await,
    )
}

/// POST /api/v1/scheduler/cleanup-now
pub async fn run_cleanup_now(State(state): State<AppState>) -> Json<Value> {
    job_response(JobKind::Cleanup, state.scheduler.trigger_cleanup_now().await)
}
