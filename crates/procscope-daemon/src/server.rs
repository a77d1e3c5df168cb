//! HTTP surface: health, read API, and the kill endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{info, warn};

use procscope_core::host::HostFacts;

use crate::store::ScanStats;
use crate::ws;
use crate::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .route("/api/processes", get(list_processes))
        .route("/api/processes/{pid}", get(get_process))
        .route("/api/processes/{pid}/kill", post(kill_process))
        .route("/api/stats", get(stats))
        .with_state(AppState { engine })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

async fn list_processes(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.engine.store().snapshot();
    Json((*snapshot).clone())
}

async fn get_process(State(state): State<AppState>, Path(pid): Path<i32>) -> impl IntoResponse {
    match state.engine.store().get(pid) {
        Some(record) => Json(record).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no such process" })),
        )
            .into_response(),
    }
}

/// Aggregate stats plus host facts, flattened into one object.
#[derive(Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    scan: ScanStats,
    #[serde(flatten)]
    host: HostFacts,
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatsResponse {
        scan: state.engine.store().stats(),
        host: HostFacts::collect(),
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

async fn kill_process(
    State(state): State<AppState>,
    Path(pid): Path<i32>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let expected = &state.engine.config().server.kill_token;
    if expected.is_empty() {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": "kill endpoint disabled" })),
        )
            .into_response();
    }
    if bearer_token(&headers) != Some(expected.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "invalid token" })),
        )
            .into_response();
    }
    if state.engine.store().get(pid).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no such process" })),
        )
            .into_response();
    }

    info!(pid, "kill requested");
    let result = tokio::time::timeout(
        Duration::from_secs(3),
        tokio::process::Command::new("kill").arg(pid.to_string()).status(),
    )
    .await;

    match result {
        Ok(Ok(status)) if status.success() => {
            Json(serde_json::json!({ "status": "signaled", "pid": pid })).into_response()
        }
        other => {
            warn!(pid, ?other, "kill failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "failed to signal process" })),
            )
                .into_response()
        }
    }
}
