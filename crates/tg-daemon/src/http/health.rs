//! Liveness and coordination endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

use crate::app::AppState;

/// GET /health — unauthenticated liveness probe. `startedAt` feeds the
/// wrapper's stale-code check.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "pid": state.pid,
        "startedAt": state.started_at,
    }))
}

/// GET /status — session summaries for `tg peek --all` and `tg doctor`.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let sessions = state.sessions.list();
    let channels: Vec<Value> = state
        .channels
        .iter()
        .map(|c| json!({ "name": c.name(), "type": c.channel_type() }))
        .collect();
    Json(json!({
        "ok": true,
        "pid": state.pid,
        "startedAt": state.started_at,
        "sessions": sessions,
        "channels": channels,
    }))
}

/// POST /shutdown — stop accepting connections, then quiesce.
pub async fn shutdown(State(state): State<Arc<AppState>>) -> Json<Value> {
    info!("shutdown requested over control socket");
    state.shutdown.cancel();
    Json(json!({ "ok": true }))
}

/// POST /generate-code — ephemeral pairing code, 10-minute TTL.
pub async fn generate_code(State(state): State<Arc<AppState>>) -> Json<Value> {
    let code = state.pairing.generate();
    Json(json!({ "ok": true, "code": code, "ttlMinutes": 10 }))
}
