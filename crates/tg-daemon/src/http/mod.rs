//! Control-server route assembly.
//!
//! Flat, versionless endpoint surface consumed by the CLI subcommands and
//! the wrapper. Every route except `/health` requires the shared secret in
//! `X-Touchgrass-Auth`; bodies are JSON capped at 1 MiB.

pub mod channels;
pub mod health;
pub mod remote;
pub mod session;

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::app::AppState;
use crate::auth::check_auth;

/// Request bodies larger than this are rejected with 413.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/status", get(health::status))
        .route("/shutdown", post(health::shutdown))
        .route("/generate-code", post(health::generate_code))
        // Channel discovery & config.
        .route("/channels", get(channels::list_channels))
        .route(
            "/config/channels",
            get(channels::get_config_channels).post(channels::put_config_channel),
        )
        .route("/config/channels/{name}", delete(channels::delete_config_channel))
        .route("/config/paired-users", post(channels::add_paired_user))
        .route("/config/paired-users/{user_id}", delete(channels::remove_paired_user))
        .route("/config/linked-groups", post(channels::add_linked_group))
        .route("/config/linked-groups/{chat_id}", delete(channels::remove_linked_group))
        // Wrapper ↔ daemon session registration.
        .route("/remote/register", post(remote::register))
        .route("/remote/bind-chat", post(remote::bind_chat))
        .route("/remote/{id}/exit", post(remote::exit))
        .route("/remote/{id}/input", get(remote::input))
        // Event ingestion.
        .route("/remote/{id}/assistant", post(remote::assistant))
        .route("/remote/{id}/thinking", post(remote::thinking))
        .route("/remote/{id}/tool-call", post(remote::tool_call))
        .route("/remote/{id}/tool-result", post(remote::tool_result))
        .route("/remote/{id}/question", post(remote::question))
        .route("/remote/{id}/approval-needed", post(remote::approval_needed))
        .route("/remote/{id}/background-job", post(remote::background_job))
        .route("/remote/{id}/typing", post(remote::typing))
        // User-driven actions.
        .route("/session/{id}/stop", post(session::stop))
        .route("/session/{id}/kill", post(session::kill))
        .route("/session/{id}/restart", post(session::restart))
        .route("/remote/{id}/send-input", post(session::send_input))
        .route("/remote/{id}/send-message", post(session::send_message))
        .route("/remote/{id}/send-file", post(session::send_file))
        .route("/sessions/recent", get(session::recent_sessions))
        .route("/background-jobs", get(session::background_jobs))
        .route("/skills", get(session::skills))
        .route(
            "/agent-soul",
            get(session::get_agent_soul).post(session::put_agent_soul),
        )
        .route("/hook/{id}", post(session::hook))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn require_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }
    if !check_auth(&state.secret, request.headers()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "ok": false, "error": "unauthorized" })),
        )
            .into_response();
    }
    next.run(request).await
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "ok": false, "error": "unknown route" })),
    )
        .into_response()
}
