//! Wrapper ↔ daemon endpoints: registration, the input long-poll, and
//! event ingestion.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use tg_core::address::{ChatId, UserId};
use tg_transcript::{BackgroundJobEvent, Question, ToolCall, ToolResult};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::pipeline::{self, IngestEvent};

/// How long `/remote/{id}/input` blocks waiting for work before returning
/// empty. The wrapper re-polls immediately, so this is the idle cadence.
const INPUT_LONG_POLL: Duration = Duration::from_secs(25);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub command: Vec<String>,
    pub chat_id: ChatId,
    pub owner_user_id: UserId,
    pub cwd: String,
    #[serde(default)]
    pub existing_id: Option<String>,
}

/// POST /remote/register — create (or re-adopt) a session record.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Json<Value>> {
    if req.command.is_empty() {
        return Err(ApiError::bad_request("command must not be empty"));
    }
    if req.cwd.is_empty() {
        return Err(ApiError::bad_request("cwd must not be empty"));
    }
    let session = state
        .sessions
        .register_remote(
            req.command,
            req.chat_id,
            req.owner_user_id,
            req.cwd,
            req.existing_id.as_deref(),
        )
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(json!({ "ok": true, "session": session })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindChatRequest {
    pub session_id: String,
    pub chat_id: ChatId,
    /// Extra group/topic chats re-subscribed during crash recovery.
    #[serde(default)]
    pub subscribe_groups: Vec<ChatId>,
}

/// POST /remote/bind-chat — attach the wrapper's chosen chat.
pub async fn bind_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BindChatRequest>,
) -> ApiResult<Json<Value>> {
    if !state.sessions.attach(&req.chat_id, &req.session_id) {
        return Err(ApiError::not_found(format!(
            "unknown session {}",
            req.session_id
        )));
    }
    for group in &req.subscribe_groups {
        state.sessions.subscribe_group(&req.session_id, group);
    }
    info!(session = %req.session_id, chat = %req.chat_id, "chat bound");
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitRequest {
    #[serde(default)]
    pub exit_code: i32,
}

/// POST /remote/{id}/exit — the wrapper's tool exited.
pub async fn exit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ExitRequest>,
) -> ApiResult<Json<Value>> {
    let Some(ended) = state.sessions.end_remote(&id) else {
        return Err(ApiError::not_found(format!("unknown session {id}")));
    };
    for chat in &ended.attached_chats {
        crate::router::reply(
            &state,
            chat,
            &format!("Session `{id}` ended (exit code {}).", req.exit_code),
        )
        .await;
    }
    Ok(Json(json!({ "ok": true })))
}

/// GET /remote/{id}/input — long-poll drain of queued input plus the
/// control action. `{unknown:true}` tells the wrapper to re-register.
pub async fn input(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Json<Value> {
    if !state.sessions.exists(&id) {
        return Json(json!({ "unknown": true }));
    }

    // Block until work arrives or the idle window elapses. The notify is
    // grabbed before the pending check so a queue between check and wait
    // cannot be missed.
    if !state.sessions.has_pending_work(&id) {
        if let Some(notify) = state.sessions.input_notify(&id) {
            let notified = notify.notified();
            if !state.sessions.has_pending_work(&id) {
                let _ = tokio::time::timeout(INPUT_LONG_POLL, notified).await;
            }
        }
    }

    let Some(input) = state.sessions.drain_remote_input(&id) else {
        return Json(json!({ "unknown": true }));
    };
    let control = state.sessions.drain_remote_control(&id).flatten();
    // The wrapper caches the group set so recovery can re-subscribe after
    // a daemon restart.
    let groups = state.sessions.subscribed_groups(&id);
    debug!(session = %id, lines = input.len(), control = ?control, "input drained");
    Json(json!({
        "unknown": false,
        "input": input,
        "controlAction": control,
        "groups": groups,
    }))
}

fn require_session(state: &Arc<AppState>, id: &str) -> ApiResult<()> {
    if state.sessions.exists(id) {
        Ok(())
    } else {
        Err(ApiError::not_found(format!("unknown session {id}")))
    }
}

#[derive(Deserialize)]
pub struct TextBody {
    pub text: String,
}

/// POST /remote/{id}/assistant
pub async fn assistant(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<TextBody>,
) -> ApiResult<Json<Value>> {
    require_session(&state, &id)?;
    if body.text.trim().is_empty() {
        return Err(ApiError::bad_request("text must not be empty"));
    }
    pipeline::dispatch(&state, &id, IngestEvent::Assistant { text: body.text }).await;
    Ok(Json(json!({ "ok": true })))
}

/// POST /remote/{id}/thinking
pub async fn thinking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<TextBody>,
) -> ApiResult<Json<Value>> {
    require_session(&state, &id)?;
    pipeline::dispatch(&state, &id, IngestEvent::Thinking { text: body.text }).await;
    Ok(Json(json!({ "ok": true })))
}

/// POST /remote/{id}/tool-call
pub async fn tool_call(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(call): Json<ToolCall>,
) -> ApiResult<Json<Value>> {
    require_session(&state, &id)?;
    if call.name.is_empty() {
        return Err(ApiError::bad_request("tool name must not be empty"));
    }
    pipeline::dispatch(&state, &id, IngestEvent::ToolCall(call)).await;
    Ok(Json(json!({ "ok": true })))
}

/// POST /remote/{id}/tool-result
pub async fn tool_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(result): Json<ToolResult>,
) -> ApiResult<Json<Value>> {
    require_session(&state, &id)?;
    pipeline::dispatch(&state, &id, IngestEvent::ToolResult(result)).await;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct QuestionBody {
    pub questions: Vec<Question>,
}

/// POST /remote/{id}/question
pub async fn question(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<QuestionBody>,
) -> ApiResult<Json<Value>> {
    require_session(&state, &id)?;
    if body.questions.is_empty() {
        return Err(ApiError::bad_request("questions must not be empty"));
    }
    pipeline::dispatch(&state, &id, IngestEvent::Question(body.questions)).await;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalBody {
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub multi: bool,
}

/// POST /remote/{id}/approval-needed
pub async fn approval_needed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ApprovalBody>,
) -> ApiResult<Json<Value>> {
    require_session(&state, &id)?;
    if body.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt must not be empty"));
    }
    pipeline::dispatch(
        &state,
        &id,
        IngestEvent::ApprovalNeeded {
            prompt: body.prompt,
            options: body.options,
            multi: body.multi,
        },
    )
    .await;
    Ok(Json(json!({ "ok": true })))
}

/// POST /remote/{id}/background-job
pub async fn background_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(event): Json<BackgroundJobEvent>,
) -> ApiResult<Json<Value>> {
    require_session(&state, &id)?;
    if event.task_id.is_empty() {
        return Err(ApiError::bad_request("taskId must not be empty"));
    }
    pipeline::dispatch(&state, &id, IngestEvent::BackgroundJob(event)).await;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct TypingBody {
    pub active: bool,
}

/// POST /remote/{id}/typing
pub async fn typing(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<TypingBody>,
) -> ApiResult<Json<Value>> {
    require_session(&state, &id)?;
    pipeline::dispatch(&state, &id, IngestEvent::Typing { active: body.active }).await;
    Ok(Json(json!({ "ok": true })))
}
