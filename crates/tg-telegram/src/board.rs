//! Pinned status boards.
//!
//! One message per `(chat, board key)` summarizing running background
//! jobs: created once, edited in place on every refresh, unpinned and
//! deleted on clear. Editing an identical body is a no-op; a missing pin
//! permission degrades to an unpinned board with `pin_error` set.

use teloxide::payloads::{EditMessageTextSetters, PinChatMessageSetters, UnpinChatMessageSetters};
use teloxide::prelude::*;
use teloxide::types::{MessageId, ParseMode};
use tracing::debug;

use tg_channels::error::ChannelError;
use tg_channels::types::{BoardClear, BoardOptions, BoardUpdate};
use tg_core::address::ChatId;

use crate::adapter::Inner;

pub(crate) async fn upsert(
    inner: &Inner,
    chat_id: &ChatId,
    board_key: &str,
    html: &str,
    opts: BoardOptions,
) -> Result<BoardUpdate, ChannelError> {
    let (tg_chat, thread) = inner.tg_parts(chat_id)?;

    // Edit the existing board when we have one.
    if let Some(existing) = opts.message_id.as_deref().and_then(|m| m.parse::<i32>().ok()) {
        let edit = inner
            .bot
            .edit_message_text(tg_chat, MessageId(existing), html)
            .parse_mode(ParseMode::Html)
            .await;
        match edit {
            Ok(_) => {
                return Ok(BoardUpdate {
                    message_id: existing.to_string(),
                    pinned: opts.pinned,
                    pin_error: None,
                })
            }
            Err(e) if e.to_string().contains("message is not modified") => {
                // Same body — nothing to do.
                return Ok(BoardUpdate {
                    message_id: existing.to_string(),
                    pinned: opts.pinned,
                    pin_error: None,
                });
            }
            Err(e) => {
                debug!(chat = %chat_id, board = board_key, error = %e,
                    "board edit failed, replacing message");
                // The old message is gone or not editable. Unpin it if we
                // pinned it, then fall through to a fresh message.
                if opts.pinned {
                    let _ = inner
                        .bot
                        .unpin_chat_message(tg_chat)
                        .message_id(MessageId(existing))
                        .await;
                }
            }
        }
    }

    let sent = inner.send_html(chat_id, tg_chat, thread, html).await?;
    let mut pinned = false;
    let mut pin_error = None;

    if opts.pin {
        match inner
            .bot
            .pin_chat_message(tg_chat, sent.id)
            .disable_notification(true)
            .await
        {
            Ok(_) => pinned = true,
            Err(e) => pin_error = Some(e.to_string()),
        }
    }

    Ok(BoardUpdate {
        message_id: sent.id.0.to_string(),
        pinned,
        pin_error,
    })
}

pub(crate) async fn clear(
    inner: &Inner,
    chat_id: &ChatId,
    board_key: &str,
    opts: BoardClear,
) -> Result<(), ChannelError> {
    let (tg_chat, _) = inner.tg_parts(chat_id)?;
    let Some(existing) = opts.message_id.as_deref().and_then(|m| m.parse::<i32>().ok()) else {
        return Ok(());
    };

    if opts.unpin && opts.pinned {
        let _ = inner
            .bot
            .unpin_chat_message(tg_chat)
            .message_id(MessageId(existing))
            .await;
    }
    if let Err(e) = inner.bot.delete_message(tg_chat, MessageId(existing)).await {
        debug!(chat = %chat_id, board = board_key, error = %e, "board delete failed");
    }
    Ok(())
}
