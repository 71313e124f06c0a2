//! User-driven session actions, resume discovery, and Claude hook ingestion.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use tg_transcript::discover::Discovery;
use tg_transcript::resume::{extract_resume_ref, is_safe_session_ref};
use tg_transcript::tool::Tool;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::pipeline::{self, IngestEvent};

fn require_session(state: &Arc<AppState>, id: &str) -> ApiResult<()> {
    if state.sessions.exists(id) {
        Ok(())
    } else {
        Err(ApiError::not_found(format!("unknown session {id}")))
    }
}

/// POST /session/{id}/stop
pub async fn stop(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_session(&state, &id)?;
    state.sessions.request_remote_stop(&id);
    Ok(Json(json!({ "ok": true })))
}

/// POST /session/{id}/kill
pub async fn kill(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_session(&state, &id)?;
    state.sessions.request_remote_kill(&id);
    Ok(Json(json!({ "ok": true })))
}

/// POST /session/{id}/restart — infer a resume ref from the session's own
/// command line and merge a resume action.
pub async fn restart(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let session = state
        .sessions
        .get(&id)
        .ok_or_else(|| ApiError::not_found(format!("unknown session {id}")))?;
    let tool = session
        .command
        .first()
        .and_then(|c| Tool::from_argv0(c))
        .ok_or_else(|| ApiError::bad_request("unknown tool for session"))?;

    let args: Vec<String> = session.command.iter().skip(1).cloned().collect();
    let session_ref = extract_resume_ref(tool, &args)
        .ok_or_else(|| ApiError::bad_request("no resume reference on command line"))?;
    if !is_safe_session_ref(&session_ref) {
        return Err(ApiError::bad_request("invalid session reference"));
    }

    state.sessions.request_remote_resume(&id, session_ref);
    info!(session = %id, "restart requested");
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct SendInputRequest {
    pub text: String,
}

/// POST /remote/{id}/send-input — queue stdin from `tg write`.
pub async fn send_input(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SendInputRequest>,
) -> ApiResult<Json<Value>> {
    require_session(&state, &id)?;
    if req.text.is_empty() {
        return Err(ApiError::bad_request("text must not be empty"));
    }
    state.sessions.queue_input(&id, req.text);
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

/// POST /remote/{id}/send-message — straight to the bound chat, bypassing
/// the PTY (used by `tg send`).
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Json<Value>> {
    require_session(&state, &id)?;
    let Some(chat) = state.sessions.get_bound_chat(&id) else {
        return Err(ApiError::bad_request("session has no bound chat"));
    };
    crate::router::reply(&state, &chat, &req.text).await;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendFileRequest {
    pub path: String,
    #[serde(default)]
    pub caption: Option<String>,
}

/// POST /remote/{id}/send-file
pub async fn send_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SendFileRequest>,
) -> ApiResult<Json<Value>> {
    require_session(&state, &id)?;
    let Some(chat) = state.sessions.get_bound_chat(&id) else {
        return Err(ApiError::bad_request("session has no bound chat"));
    };
    let path = PathBuf::from(&req.path);
    if !path.is_file() {
        return Err(ApiError::bad_request(format!("no such file: {}", req.path)));
    }
    let channel = state
        .channel_for_chat(&chat)
        .ok_or_else(|| ApiError::internal("no channel for bound chat"))?;
    channel
        .send_document(&chat, &path, req.caption.as_deref())
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct RecentQuery {
    pub tool: String,
    pub cwd: String,
}

/// GET /sessions/recent?tool=&cwd= — resumable transcripts, newest first.
/// Mtime order only; ties keep walk order.
pub async fn recent_sessions(
    State(_state): State<Arc<AppState>>,
    Query(query): Query<RecentQuery>,
) -> ApiResult<Json<Value>> {
    let tool = Tool::from_argv0(&query.tool)
        .ok_or_else(|| ApiError::bad_request(format!("unknown tool {}", query.tool)))?;
    let discovery =
        Discovery::new().ok_or_else(|| ApiError::internal("cannot resolve home directory"))?;

    let transcripts: Vec<Value> = discovery
        .list_transcripts(tool, &query.cwd)
        .into_iter()
        .map(|path| {
            let modified = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| {
                    t.duration_since(std::time::UNIX_EPOCH)
                        .ok()
                        .map(|d| d.as_secs())
                });
            json!({
                "path": path.to_string_lossy(),
                "resumeRef": crate::pickers::resume_ref_for(tool, &path),
                "modifiedAt": modified,
            })
        })
        .collect();
    Ok(Json(json!({ "ok": true, "transcripts": transcripts })))
}

#[derive(Deserialize)]
pub struct JobsQuery {
    #[serde(default)]
    pub cwd: Option<String>,
}

/// GET /background-jobs[?cwd=]
pub async fn background_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JobsQuery>,
) -> Json<Value> {
    let jobs: Vec<Value> = state
        .sessions
        .all_background_jobs(query.cwd.as_deref())
        .into_iter()
        .map(|(session_id, job)| json!({ "sessionId": session_id, "job": job }))
        .collect();
    Json(json!({ "ok": true, "jobs": jobs }))
}

#[derive(Deserialize)]
pub struct CwdQuery {
    pub cwd: String,
}

/// GET /skills?cwd= — names of repo-local skills under `.claude/skills/`.
pub async fn skills(Query(query): Query<CwdQuery>) -> Json<Value> {
    let dir = PathBuf::from(&query.cwd).join(".claude").join("skills");
    let mut names = Vec::new();
    if let Ok(entries) = std::fs::read_dir(&dir) {
        for entry in entries.flatten() {
            if entry.path().join("SKILL.md").is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
    }
    names.sort();
    Json(json!({ "ok": true, "skills": names }))
}

/// GET /agent-soul?cwd= — the repo's agent persona file, if present.
pub async fn get_agent_soul(Query(query): Query<CwdQuery>) -> Json<Value> {
    let path = PathBuf::from(&query.cwd).join("SOUL.md");
    let content = std::fs::read_to_string(&path).ok();
    Json(json!({ "ok": true, "content": content }))
}

#[derive(Deserialize)]
pub struct SoulBody {
    pub cwd: String,
    pub content: String,
}

/// POST /agent-soul
pub async fn put_agent_soul(Json(body): Json<SoulBody>) -> ApiResult<Json<Value>> {
    let path = PathBuf::from(&body.cwd).join("SOUL.md");
    std::fs::write(&path, body.content.as_bytes())
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct HookBody {
    pub hook_event_name: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<Value>,
    #[serde(default)]
    pub permission_suggestions: Vec<String>,
}

/// POST /hook/{id} — Claude Code hook ingestion. Claude reports approvals
/// through hooks instead of PTY prompt scanning.
pub async fn hook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<HookBody>,
) -> ApiResult<Json<Value>> {
    require_session(&state, &id)?;
    match body.hook_event_name.as_str() {
        "PermissionRequest" => {
            let tool = body.tool_name.as_deref().unwrap_or("a tool");
            let detail = body
                .tool_input
                .as_ref()
                .and_then(|v| v.get("command"))
                .and_then(Value::as_str)
                .map(|c| format!(": {c}"))
                .unwrap_or_default();
            pipeline::dispatch(
                &state,
                &id,
                IngestEvent::ApprovalNeeded {
                    prompt: format!("{tool} wants to run{detail}"),
                    options: body.permission_suggestions,
                    multi: false,
                },
            )
            .await;
        }
        "UserPromptSubmit" => {
            // The developer is typing locally; the tool is about to work.
            pipeline::dispatch(&state, &id, IngestEvent::Typing { active: true }).await;
        }
        "Stop" => {
            pipeline::dispatch(&state, &id, IngestEvent::Typing { active: false }).await;
        }
        other => {
            warn!(event = other, "unknown hook event");
            return Err(ApiError::bad_request(format!("unknown hook event {other}")));
        }
    }
    Ok(Json(json!({ "ok": true })))
}
