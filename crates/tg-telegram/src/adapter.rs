//! The `Channel` implementation for Telegram.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use teloxide::payloads::{
    EditMessageTextSetters, SendDocumentSetters, SendMessageSetters, SendPollSetters,
    SetMyCommandsSetters,
};
use teloxide::prelude::*;
use teloxide::types::{
    BotCommandScope, ChatId as TgChatId, InputFile, MessageId, ParseMode, Recipient, ReplyMarkup,
    ThreadId, UserId as TgUserId,
};
use teloxide::RequestError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tg_channels::channel::Channel;
use tg_channels::dead::{is_dead_chat_error, is_poller_conflict};
use tg_channels::error::ChannelError;
use tg_channels::format::{Formatter, HtmlFormatter};
use tg_channels::types::{
    BoardClear, BoardOptions, BoardUpdate, ChannelEvent, ChatInfo, MenuContext, PollCreated,
    SentMessage,
};
use tg_core::address::{ChannelAddress, ChatId};
use tg_core::paths::Paths;

use crate::lock::PollerLock;
use crate::menu;
use crate::polls;
use crate::send::{merge_into_last, pre_block, sanitize_output, split_chunks, LastOutput};
use crate::typing::TypingManager;

pub(crate) struct PollerHandle {
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
    /// Held for the poller's lifetime; dropping releases the token lock.
    pub _lock: PollerLock,
}

pub(crate) struct Inner {
    pub bot: Bot,
    /// Account name (the key in `config.channels`).
    pub name: String,
    pub bot_username: Option<String>,
    pub paths: Paths,
    pub formatter: HtmlFormatter,
    pub typing: TypingManager,
    /// Last `<pre>` output per chat, for in-place edits.
    pub last_output: DashMap<String, LastOutput>,
    /// `(chat|user)` → digest of the last synced menu.
    pub menu_cache: DashMap<String, u64>,
    /// `chatId:threadId` → forum topic title, learned from service messages.
    pub topic_titles: DashMap<String, String>,
    /// Chats observed by the poller, for discovery.
    pub seen_chats: DashMap<String, ChatInfo>,
    pub poller: tokio::sync::Mutex<Option<PollerHandle>>,
}

/// Telegram adapter. Cheap to clone through its inner `Arc`.
pub struct TelegramAdapter {
    inner: Arc<Inner>,
}

impl TelegramAdapter {
    pub fn new(
        name: impl Into<String>,
        bot_token: &str,
        bot_username: Option<String>,
        paths: Paths,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                bot: Bot::new(bot_token),
                name: name.into(),
                bot_username,
                paths,
                formatter: HtmlFormatter,
                typing: TypingManager::new(),
                last_output: DashMap::new(),
                menu_cache: DashMap::new(),
                topic_titles: DashMap::new(),
                seen_chats: DashMap::new(),
                poller: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }
}

impl Inner {
    /// Split a touchgrass chat address into teloxide chat + thread parts.
    pub(crate) fn tg_parts(
        &self,
        chat: &ChatId,
    ) -> Result<(TgChatId, Option<ThreadId>), ChannelError> {
        let addr = chat
            .parse()
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        let id: i64 = addr
            .id
            .parse()
            .map_err(|_| ChannelError::SendFailed(format!("non-numeric telegram id: {chat}")))?;
        let thread = match addr.thread.as_deref() {
            Some(t) => Some(ThreadId(MessageId(t.parse().map_err(|_| {
                ChannelError::SendFailed(format!("non-numeric thread id: {chat}"))
            })?))),
            None => None,
        };
        Ok((TgChatId(id), thread))
    }

    /// Build the canonical address for a chat this adapter saw. The account
    /// name segment is included only for non-default account names.
    pub(crate) fn address_for(&self, chat_id: i64, thread: Option<i32>) -> ChatId {
        let addr = ChannelAddress {
            channel_type: "telegram".into(),
            channel_name: (self.name != "telegram").then(|| self.name.clone()),
            id: chat_id.to_string(),
            thread: thread.map(|t| t.to_string()),
        };
        ChatId::new(addr.serialize())
    }

    /// Map a teloxide failure onto the channel taxonomy.
    pub(crate) fn classify(&self, chat: &ChatId, err: RequestError) -> ChannelError {
        let text = err.to_string();
        if is_dead_chat_error(&text) {
            ChannelError::DeadChat {
                chat: chat.to_string(),
                reason: text,
            }
        } else if is_poller_conflict(&text) {
            ChannelError::Conflict(text)
        } else {
            ChannelError::Transient(text)
        }
    }

    /// Send one HTML chunk, falling back to plain text when Telegram
    /// rejects the markup.
    pub(crate) async fn send_html(
        &self,
        chat: &ChatId,
        tg_chat: TgChatId,
        thread: Option<ThreadId>,
        html: &str,
    ) -> Result<Message, ChannelError> {
        let mut req = self
            .bot
            .send_message(tg_chat, html)
            .parse_mode(ParseMode::Html);
        if let Some(thread) = thread {
            req = req.message_thread_id(thread);
        }
        match req.await {
            Ok(sent) => Ok(sent),
            Err(first_err) => {
                // HTML rejected? Retry once as plain text before giving up.
                let mut retry = self.bot.send_message(tg_chat, html);
                if let Some(thread) = thread {
                    retry = retry.message_thread_id(thread);
                }
                match retry.await {
                    Ok(sent) => {
                        debug!(chat = %chat, "HTML send failed, plain text fallback used");
                        Ok(sent)
                    }
                    Err(_) => Err(self.classify(chat, first_err)),
                }
            }
        }
    }
}

#[async_trait]
impl Channel for TelegramAdapter {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn channel_type(&self) -> &str {
        "telegram"
    }

    fn formatter(&self) -> &dyn Formatter {
        &self.inner.formatter
    }

    async fn send(&self, chat_id: &ChatId, html: &str) -> Result<SentMessage, ChannelError> {
        let inner = &self.inner;
        let (tg_chat, thread) = inner.tg_parts(chat_id)?;

        // A plain send breaks the output-edit chain for this chat.
        inner.last_output.remove(chat_id.as_str());

        let mut last_id = None;
        for chunk in split_chunks(html) {
            let sent = inner.send_html(chat_id, tg_chat, thread, &chunk).await?;
            last_id = Some(sent.id.0);
        }
        Ok(SentMessage {
            message_id: last_id.unwrap_or_default().to_string(),
        })
    }

    async fn send_output(&self, chat_id: &ChatId, raw_ansi: &str) -> Result<(), ChannelError> {
        let inner = &self.inner;
        let (tg_chat, thread) = inner.tg_parts(chat_id)?;
        let escaped = sanitize_output(raw_ansi);
        if escaped.trim().is_empty() {
            return Ok(());
        }

        // Try to grow the previous output message in place.
        if let Some(last) = inner.last_output.get(chat_id.as_str()).map(|e| e.value().clone()) {
            if let Some(combined) = merge_into_last(&last, &escaped) {
                let edit = inner
                    .bot
                    .edit_message_text(tg_chat, MessageId(last.message_id), pre_block(&combined))
                    .parse_mode(ParseMode::Html)
                    .await;
                match edit {
                    Ok(_) => {
                        inner.last_output.insert(
                            chat_id.as_str().to_string(),
                            LastOutput {
                                message_id: last.message_id,
                                text: combined,
                            },
                        );
                        return Ok(());
                    }
                    Err(e) if e.to_string().contains("message is not modified") => {
                        return Ok(());
                    }
                    Err(e) => {
                        // Not editable anymore (too old, deleted) — fall
                        // through to a fresh message.
                        debug!(chat = %chat_id, error = %e, "output edit failed, sending new");
                    }
                }
            }
        }

        let chunks = split_chunks(&escaped);
        let mut newest: Option<LastOutput> = None;
        for chunk in &chunks {
            let sent = inner
                .send_html(chat_id, tg_chat, thread, &pre_block(chunk))
                .await?;
            newest = Some(LastOutput {
                message_id: sent.id.0,
                text: chunk.clone(),
            });
        }
        if let Some(newest) = newest {
            inner.last_output.insert(chat_id.as_str().to_string(), newest);
        }
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: &ChatId,
        file_path: &Path,
        caption: Option<&str>,
    ) -> Result<(), ChannelError> {
        let inner = &self.inner;
        let (tg_chat, thread) = inner.tg_parts(chat_id)?;
        let mut req = inner
            .bot
            .send_document(tg_chat, InputFile::file(file_path.to_path_buf()));
        if let Some(caption) = caption {
            req = req.caption(caption.to_string());
        }
        if let Some(thread) = thread {
            req = req.message_thread_id(thread);
        }
        req.await.map_err(|e| inner.classify(chat_id, e))?;
        Ok(())
    }

    async fn send_poll(
        &self,
        chat_id: &ChatId,
        question: &str,
        options: &[String],
        multi_select: bool,
    ) -> Result<PollCreated, ChannelError> {
        let inner = &self.inner;
        let (tg_chat, thread) = inner.tg_parts(chat_id)?;

        // Native polls need 2-10 options; anything outside that renders as
        // an inline keyboard.
        if multi_select && (2..=10).contains(&options.len()) {
            // Native poll: several options can be toggled before "Vote".
            let poll_options: Vec<String> = options
                .iter()
                .map(|o| tg_channels::types::truncate_option_label(o))
                .collect();
            let mut req = inner
                .bot
                .send_poll(tg_chat, question.to_string(), poll_options)
                .is_anonymous(false)
                .allows_multiple_answers(true);
            if let Some(thread) = thread {
                req = req.message_thread_id(thread);
            }
            let sent = req.await.map_err(|e| inner.classify(chat_id, e))?;
            let poll_id = sent
                .poll()
                .map(|p| p.id.to_string())
                .unwrap_or_else(|| sent.id.0.to_string());
            return Ok(PollCreated {
                poll_id,
                message_id: sent.id.0.to_string(),
            });
        }

        // Single select: inline keyboard with tgp:<pollId>:<optionId> data.
        let poll_id = polls::new_poll_id();
        let keyboard = polls::keyboard_for(&poll_id, options);
        let mut req = inner
            .bot
            .send_message(tg_chat, question)
            .parse_mode(ParseMode::Html)
            .reply_markup(ReplyMarkup::InlineKeyboard(keyboard));
        if let Some(thread) = thread {
            req = req.message_thread_id(thread);
        }
        let sent = req.await.map_err(|e| inner.classify(chat_id, e))?;
        Ok(PollCreated {
            poll_id,
            message_id: sent.id.0.to_string(),
        })
    }

    async fn close_poll(&self, chat_id: &ChatId, message_id: &str) -> Result<(), ChannelError> {
        let inner = &self.inner;
        let (tg_chat, _) = inner.tg_parts(chat_id)?;
        let id: i32 = message_id
            .parse()
            .map_err(|_| ChannelError::SendFailed(format!("bad message id: {message_id}")))?;

        // Keyboard polls lose their buttons; native polls are stopped.
        // Either call may fail for the other kind — best effort.
        let _ = inner
            .bot
            .edit_message_reply_markup(tg_chat, MessageId(id))
            .await;
        let _ = inner.bot.stop_poll(tg_chat, MessageId(id)).await;
        Ok(())
    }

    async fn upsert_status_board(
        &self,
        chat_id: &ChatId,
        board_key: &str,
        html: &str,
        opts: BoardOptions,
    ) -> Result<BoardUpdate, ChannelError> {
        crate::board::upsert(&self.inner, chat_id, board_key, html, opts).await
    }

    async fn clear_status_board(
        &self,
        chat_id: &ChatId,
        board_key: &str,
        opts: BoardClear,
    ) -> Result<(), ChannelError> {
        crate::board::clear(&self.inner, chat_id, board_key, opts).await
    }

    async fn set_typing(&self, chat_id: &ChatId, active: bool) -> Result<(), ChannelError> {
        let inner = &self.inner;
        if active {
            let (tg_chat, thread) = inner.tg_parts(chat_id)?;
            inner
                .typing
                .start(&inner.bot, chat_id.as_str().to_string(), tg_chat, thread);
        } else {
            inner.typing.stop(chat_id.as_str());
        }
        Ok(())
    }

    async fn sync_command_menu(&self, ctx: &MenuContext) -> Result<(), ChannelError> {
        let inner = &self.inner;
        let commands = menu::commands_for(ctx);
        let digest = menu::menu_digest(&commands);
        let key = menu::cache_key(ctx);
        if inner.menu_cache.get(&key).map(|d| *d) == Some(digest) {
            return Ok(());
        }

        let (tg_chat, _) = inner.tg_parts(&ctx.chat_id)?;
        let scope = if ctx.is_group {
            let user_addr = ctx
                .user_id
                .parse()
                .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
            let uid: u64 = user_addr
                .id
                .parse()
                .map_err(|_| ChannelError::SendFailed("non-numeric telegram user id".into()))?;
            BotCommandScope::ChatMember {
                chat_id: Recipient::Id(tg_chat),
                user_id: TgUserId(uid),
            }
        } else {
            BotCommandScope::Chat {
                chat_id: Recipient::Id(tg_chat),
            }
        };

        inner
            .bot
            .set_my_commands(commands)
            .scope(scope)
            .await
            .map_err(|e| inner.classify(&ctx.chat_id, e))?;
        inner.menu_cache.insert(key, digest);
        Ok(())
    }

    async fn list_chats(&self) -> Result<Vec<ChatInfo>, ChannelError> {
        let mut out: Vec<ChatInfo> = self
            .inner
            .seen_chats
            .iter()
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.chat_id.as_str().cmp(b.chat_id.as_str()));
        Ok(out)
    }

    async fn start_receiving(
        &self,
        events: mpsc::Sender<ChannelEvent>,
    ) -> Result<(), ChannelError> {
        let inner = Arc::clone(&self.inner);
        let mut guard = inner.poller.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let token = inner.bot.token().to_string();
        let lock = PollerLock::acquire(&inner.paths, &token)?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(crate::poller::run(
            Arc::clone(&inner),
            events,
            cancel.clone(),
        ));
        info!(channel = %inner.name, "telegram poller started");
        *guard = Some(PollerHandle {
            cancel,
            task,
            _lock: lock,
        });
        Ok(())
    }

    async fn stop_receiving(&self) {
        let mut guard = self.inner.poller.lock().await;
        if let Some(handle) = guard.take() {
            handle.cancel.cancel();
            handle.task.abort();
            warn!(channel = %self.inner.name, "telegram poller stopped");
        }
        self.inner.typing.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> TelegramAdapter {
        TelegramAdapter::new(
            "telegram",
            "123:abc",
            Some("touchgrass_bot".into()),
            Paths::at("/tmp/tg-test"),
        )
    }

    #[test]
    fn tg_parts_roundtrip() {
        let a = adapter();
        let (chat, thread) = a.inner().tg_parts(&ChatId::new("telegram:-100123:42")).unwrap();
        assert_eq!(chat.0, -100123);
        assert_eq!(thread.unwrap().0 .0, 42);

        let (chat, thread) = a.inner().tg_parts(&ChatId::new("telegram:555")).unwrap();
        assert_eq!(chat.0, 555);
        assert!(thread.is_none());
    }

    #[test]
    fn tg_parts_rejects_garbage() {
        let a = adapter();
        assert!(a.inner().tg_parts(&ChatId::new("telegram:abc")).is_err());
        assert!(a.inner().tg_parts(&ChatId::new("nonsense")).is_err());
    }

    #[test]
    fn address_for_default_account_is_bare() {
        let a = adapter();
        assert_eq!(
            a.inner().address_for(-100123, Some(7)).as_str(),
            "telegram:-100123:7"
        );
    }

    #[test]
    fn address_for_named_account_includes_name() {
        let a = TelegramAdapter::new("work", "1:t", None, Paths::at("/tmp/tg-test"));
        assert_eq!(a.inner().address_for(9, None).as_str(), "telegram:work:9");
    }
}
