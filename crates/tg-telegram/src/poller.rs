//! The hand-driven getUpdates loop.
//!
//! Owns the offset, classifies failures (fatal 409 conflict vs transient),
//! normalizes messages/callbacks/poll answers into [`ChannelEvent`]s, and
//! downloads inbound attachments into the uploads directory.

use std::sync::Arc;
use std::time::Duration;

use teloxide::net::Download;
use teloxide::payloads::GetUpdatesSetters;
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, MessageKind, UpdateKind, Voter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tg_channels::dead::is_poller_conflict;
use tg_channels::types::{ChannelEvent, ChatInfo, ChatKind, InboundMessage, PollAnswer};
use tg_core::address::UserId;

use crate::adapter::Inner;
use crate::polls::parse_callback_data;

/// Long-poll block duration passed to getUpdates.
const POLL_TIMEOUT_SECS: u32 = 25;
/// Transient-failure backoff ceiling.
const BACKOFF_MAX_SECS: u64 = 30;

pub(crate) async fn run(
    inner: Arc<Inner>,
    tx: mpsc::Sender<ChannelEvent>,
    cancel: CancellationToken,
) {
    let mut offset: i32 = 0;
    let mut backoff_secs: u64 = 1;

    loop {
        let request = inner
            .bot
            .get_updates()
            .offset(offset)
            .timeout(POLL_TIMEOUT_SECS)
            .allowed_updates(vec![
                AllowedUpdate::Message,
                AllowedUpdate::CallbackQuery,
                AllowedUpdate::PollAnswer,
            ]);

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            res = request => res,
        };

        match result {
            Ok(updates) => {
                backoff_secs = 1;
                for update in updates {
                    offset = offset.max(update.id.0 as i32 + 1);
                    handle_update(&inner, &tx, update).await;
                }
            }
            Err(e) => {
                let text = e.to_string();
                if is_poller_conflict(&text) {
                    warn!(channel = %inner.name, error = %text,
                        "getUpdates conflict, stopping poller");
                    let _ = tx
                        .send(ChannelEvent::PollerStopped { reason: text })
                        .await;
                    break;
                }
                debug!(channel = %inner.name, error = %text, "getUpdates failed, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                }
                backoff_secs = (backoff_secs * 2).min(BACKOFF_MAX_SECS);
            }
        }
    }
}

async fn handle_update(inner: &Arc<Inner>, tx: &mpsc::Sender<ChannelEvent>, update: Update) {
    match update.kind {
        UpdateKind::Message(msg) => {
            if let Some(event) = normalize_message(inner, msg).await {
                let _ = tx.send(ChannelEvent::Message(event)).await;
            }
        }
        UpdateKind::CallbackQuery(query) => {
            let Some((poll_id, option_id)) =
                query.data.as_deref().and_then(parse_callback_data)
            else {
                return;
            };
            let chat_id = query
                .message
                .as_ref()
                .map(|m| inner.address_for(m.chat().id.0, None));
            let _ = inner.bot.answer_callback_query(query.id.clone()).await;
            let _ = tx
                .send(ChannelEvent::PollAnswer(PollAnswer {
                    poll_id,
                    chat_id,
                    user_id: inner.user_address_for(query.from.id.0),
                    option_ids: vec![option_id],
                }))
                .await;
        }
        UpdateKind::PollAnswer(answer) => {
            let Voter::User(user) = answer.voter else { return };
            let _ = tx
                .send(ChannelEvent::PollAnswer(PollAnswer {
                    poll_id: answer.poll_id.to_string(),
                    chat_id: None,
                    user_id: inner.user_address_for(user.id.0),
                    option_ids: answer.option_ids.iter().map(|&i| i as usize).collect(),
                }))
                .await;
        }
        _ => {}
    }
}

async fn normalize_message(inner: &Arc<Inner>, msg: Message) -> Option<InboundMessage> {
    // Forum-topic service messages only feed the topic-title cache.
    if let MessageKind::ForumTopicCreated(ref created) = msg.kind {
        if let Some(thread) = msg.thread_id {
            inner.topic_titles.insert(
                topic_key(msg.chat.id.0, thread.0 .0),
                created.forum_topic_created.name.clone(),
            );
        }
        return None;
    }
    if let MessageKind::ForumTopicEdited(ref edited) = msg.kind {
        if let (Some(thread), Some(name)) =
            (msg.thread_id, edited.forum_topic_edited.name.clone())
        {
            inner
                .topic_titles
                .insert(topic_key(msg.chat.id.0, thread.0 .0), name);
        }
        return None;
    }

    let from = msg.from.as_ref()?;
    if from.is_bot {
        return None;
    }

    let thread = msg.thread_id.map(|t| t.0 .0);
    let chat_id = inner.address_for(msg.chat.id.0, thread);
    let is_group = !msg.chat.is_private();

    // Strip the bot mention from the visible text.
    let mut text = msg
        .text()
        .or(msg.caption())
        .unwrap_or_default()
        .to_string();
    if let Some(ref username) = inner.bot_username {
        text = text.replace(&format!("@{username}"), "");
        text = text.trim().to_string();
    }

    // Attachments on this message are appended; attachments on the
    // replied-to message are prefixed as a quote block.
    let mut file_paths = Vec::new();
    for path in download_attachments(inner, &msg).await {
        text.push_str(&format!("\n{path}"));
        file_paths.push(path);
    }
    if let Some(replied) = msg.reply_to_message() {
        for path in download_attachments(inner, replied).await {
            text = format!("> file: {path}\n{text}");
            file_paths.push(path);
        }
    }

    if text.is_empty() {
        return None;
    }

    let topic_title = thread
        .and_then(|t| inner.topic_titles.get(&topic_key(msg.chat.id.0, t)))
        .map(|entry| entry.value().clone());

    // Remember this chat for discovery.
    let kind = if !is_group {
        ChatKind::Dm
    } else if thread.is_some() {
        ChatKind::Topic
    } else {
        ChatKind::Group
    };
    inner.seen_chats.insert(
        chat_id.as_str().to_string(),
        ChatInfo {
            chat_id: chat_id.clone(),
            title: msg
                .chat
                .title()
                .map(str::to_string)
                .or_else(|| topic_title.clone()),
            kind,
            busy: false,
        },
    );

    Some(InboundMessage {
        user_id: inner.user_address_for(from.id.0),
        chat_id,
        username: from.username.clone(),
        text,
        file_paths,
        is_group,
        chat_title: msg.chat.title().map(str::to_string),
        topic_title,
        reply_to_ref: msg.reply_to_message().map(|r| r.id.0.to_string()),
    })
}

/// Download document/photo attachments to the uploads directory, returning
/// local paths. Files are chmod 0600; a sweeper deletes them after 24 h.
async fn download_attachments(inner: &Arc<Inner>, msg: &Message) -> Vec<String> {
    let mut file_ids: Vec<(String, String)> = Vec::new();

    if let Some(doc) = msg.document() {
        let name = doc
            .file_name
            .clone()
            .unwrap_or_else(|| "document".to_string());
        file_ids.push((doc.file.id.to_string(), name));
    }
    if let Some(photos) = msg.photo() {
        if let Some(largest) = photos.last() {
            file_ids.push((largest.file.id.to_string(), "photo.jpg".to_string()));
        }
    }

    let mut out = Vec::new();
    for (file_id, name) in file_ids {
        match fetch_file(inner, &file_id, &name).await {
            Ok(path) => out.push(path),
            Err(e) => warn!(error = %e, "attachment download failed"),
        }
    }
    out
}

async fn fetch_file(
    inner: &Arc<Inner>,
    file_id: &str,
    name: &str,
) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let file = inner.bot.get_file(file_id.to_string()).await?;
    let dir = inner.paths.uploads_dir();
    tokio::fs::create_dir_all(&dir).await?;

    let short = &uuid::Uuid::new_v4().simple().to_string()[..8];
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    let path = dir.join(format!("{short}-{sanitized}"));

    let mut dst = tokio::fs::File::create(&path).await?;
    inner.bot.download_file(&file.path, &mut dst).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(path.to_string_lossy().into_owned())
}

fn topic_key(chat_id: i64, thread_id: i32) -> String {
    format!("{chat_id}:{thread_id}")
}

impl Inner {
    /// Address for a human on this account.
    pub(crate) fn user_address_for(&self, user_id: u64) -> UserId {
        if self.name == "telegram" {
            UserId::new(format!("telegram:{user_id}"))
        } else {
            UserId::new(format!("telegram:{}:{user_id}", self.name))
        }
    }
}
