//! Channel discovery and config CRUD.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use tg_core::address::{ChatId, UserId};
use tg_core::config::{ChannelEntry, ChannelType, Credentials};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};

/// GET /channels — visible DMs, groups, and topics with busy flags.
pub async fn list_channels(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut chats = Vec::new();

    // Paired users' DMs are always addressable, seen or not.
    let paired: Vec<(UserId, Option<String>)> = state.with_config(|c| {
        c.channels
            .values()
            .flat_map(|e| {
                e.paired_users
                    .iter()
                    .map(|p| (p.user_id.clone(), p.username.clone()))
            })
            .collect()
    });
    for (user_id, username) in paired {
        let chat_id = ChatId::new(user_id.as_str());
        chats.push(json!({
            "chatId": chat_id,
            "title": username.unwrap_or_else(|| "DM".into()),
            "kind": "dm",
            "busy": state.sessions.session_for_chat(&chat_id).is_some(),
        }));
    }

    for channel in &state.channels {
        if let Ok(seen) = channel.list_chats().await {
            for info in seen {
                if chats
                    .iter()
                    .any(|c| c["chatId"].as_str() == Some(info.chat_id.as_str()))
                {
                    continue;
                }
                chats.push(json!({
                    "chatId": info.chat_id,
                    "title": info.title,
                    "kind": info.kind,
                    "busy": state.sessions.session_for_chat(&info.chat_id).is_some(),
                }));
            }
        }
    }

    Json(json!({ "ok": true, "chats": chats }))
}

/// GET /config/channels — configured entries with tokens redacted.
pub async fn get_config_channels(State(state): State<Arc<AppState>>) -> Json<Value> {
    let channels = state.with_config(|c| {
        c.channels
            .iter()
            .map(|(name, entry)| {
                json!({
                    "name": name,
                    "type": entry.channel_type,
                    "botToken": entry.credentials.bot_token.as_deref().map(redact_token),
                    "botUsername": entry.credentials.bot_username,
                    "pairedUsers": entry.paired_users,
                    "linkedGroups": entry.linked_groups,
                })
            })
            .collect::<Vec<_>>()
    });
    Json(json!({ "ok": true, "channels": channels }))
}

fn redact_token(token: &str) -> String {
    if token.len() <= 8 {
        "…".into()
    } else {
        format!("{}…{}", &token[..4], &token[token.len() - 4..])
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutChannelRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default)]
    pub credentials: Credentials,
}

/// POST /config/channels — create or replace a named channel entry.
/// Takes effect for new connections after a daemon restart.
pub async fn put_config_channel(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PutChannelRequest>,
) -> ApiResult<Json<Value>> {
    if req.name.is_empty() {
        return Err(ApiError::bad_request("channel name must not be empty"));
    }
    state.update_config(|c| {
        let entry = c.channels.entry(req.name.clone()).or_insert(ChannelEntry {
            channel_type: req.channel_type,
            credentials: Credentials::default(),
            paired_users: Vec::new(),
            linked_groups: Vec::new(),
        });
        entry.channel_type = req.channel_type;
        entry.credentials = req.credentials;
    })?;
    Ok(Json(json!({ "ok": true })))
}

/// DELETE /config/channels/{name}
pub async fn delete_config_channel(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let removed = state.update_config(|c| c.channels.remove(&name).is_some())?;
    if !removed {
        return Err(ApiError::not_found(format!("no channel named {name}")));
    }
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairedUserRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub username: Option<String>,
}

/// POST /config/paired-users
pub async fn add_paired_user(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PairedUserRequest>,
) -> ApiResult<Json<Value>> {
    state
        .update_config(|c| c.add_paired_user(req.user_id.clone(), req.username.clone()))?
        .map_err(ApiError::from)?;
    Ok(Json(json!({ "ok": true })))
}

/// DELETE /config/paired-users/{user_id}
pub async fn remove_paired_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let removed = state.update_config(|c| {
        let mut removed = false;
        for entry in c.channels.values_mut() {
            let before = entry.paired_users.len();
            entry.paired_users.retain(|p| p.user_id.as_str() != user_id);
            removed |= entry.paired_users.len() != before;
        }
        removed
    })?;
    if !removed {
        return Err(ApiError::not_found(format!("no paired user {user_id}")));
    }
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedGroupRequest {
    pub chat_id: ChatId,
    #[serde(default)]
    pub title: Option<String>,
}

/// POST /config/linked-groups
pub async fn add_linked_group(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LinkedGroupRequest>,
) -> ApiResult<Json<Value>> {
    state
        .update_config(|c| c.link_group(req.chat_id.clone(), req.title.clone()))?
        .map_err(ApiError::from)?;
    Ok(Json(json!({ "ok": true })))
}

/// DELETE /config/linked-groups/{chat_id}
pub async fn remove_linked_group(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let chat = ChatId::new(chat_id.clone());
    let removed = state.update_config(|c| c.unlink_group(&chat))?;
    if !removed {
        return Err(ApiError::not_found(format!("no linked group {chat_id}")));
    }
    state.sessions.detach(&chat);
    Ok(Json(json!({ "ok": true })))
}
