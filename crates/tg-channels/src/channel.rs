use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use tg_core::address::ChatId;

use crate::error::ChannelError;
use crate::format::Formatter;
use crate::types::{
    BoardClear, BoardOptions, BoardUpdate, ChannelEvent, ChatInfo, MenuContext, PollCreated,
    SentMessage,
};

/// Capability surface implemented by every channel adapter.
///
/// Implementations must be `Send + Sync` — they are stored behind `Arc` and
/// driven from several Tokio tasks at once. Every method takes `&self`;
/// adapters keep their own interior state.
///
/// Most capabilities are optional: the default implementations return
/// [`ChannelError::Unsupported`] and callers degrade gracefully (no status
/// board on a channel without message editing, no typing indicator, …).
#[async_trait]
pub trait Channel: Send + Sync {
    /// The configured account name (the key in `config.channels`).
    fn name(&self) -> &str;

    /// Channel type string: `"telegram"`, `"slack"`, `"internal"`.
    fn channel_type(&self) -> &str;

    /// The formatter used to render events for this channel.
    fn formatter(&self) -> &dyn Formatter;

    /// Deliver one formatted message. On success any edit-in-place cache
    /// for this chat is invalidated — the next `send_output` starts a new
    /// message.
    async fn send(&self, chat_id: &ChatId, html: &str) -> Result<SentMessage, ChannelError>;

    /// Deliver raw terminal output: ANSI-stripped, escaped, chunked into
    /// ≤4 KB `<pre>` blocks. When the previous message in this chat was an
    /// editable output block and the combined text still fits, the adapter
    /// edits it in place instead of sending a new message.
    async fn send_output(&self, _chat_id: &ChatId, _raw_ansi: &str) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported("send_output"))
    }

    async fn send_document(
        &self,
        _chat_id: &ChatId,
        _file_path: &Path,
        _caption: Option<&str>,
    ) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported("send_document"))
    }

    /// Present options. Single-select renders as an inline keyboard,
    /// multi-select as a native poll. Returns the ephemeral poll id the
    /// daemon keys its pending flow by.
    async fn send_poll(
        &self,
        _chat_id: &ChatId,
        _question: &str,
        _options: &[String],
        _multi_select: bool,
    ) -> Result<PollCreated, ChannelError> {
        Err(ChannelError::Unsupported("send_poll"))
    }

    async fn close_poll(&self, _chat_id: &ChatId, _message_id: &str) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported("close_poll"))
    }

    /// Create or edit the pinned board message for `(chat_id, board_key)`.
    /// Editing an unchanged body is a no-op; a missing pin permission is
    /// reported via `pin_error` without failing the call.
    async fn upsert_status_board(
        &self,
        _chat_id: &ChatId,
        _board_key: &str,
        _html: &str,
        _opts: BoardOptions,
    ) -> Result<BoardUpdate, ChannelError> {
        Err(ChannelError::Unsupported("upsert_status_board"))
    }

    async fn clear_status_board(
        &self,
        _chat_id: &ChatId,
        _board_key: &str,
        _opts: BoardClear,
    ) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported("clear_status_board"))
    }

    /// Assert or clear a typing indicator. Asserting is idempotent and
    /// auto-expires after a hard timeout even if never cleared.
    async fn set_typing(&self, _chat_id: &ChatId, _active: bool) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported("set_typing"))
    }

    /// Install the context-appropriate slash-command menu for this
    /// chat+user. Cached by `(chat_id, user_id)` inside the adapter.
    async fn sync_command_menu(&self, _ctx: &MenuContext) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported("sync_command_menu"))
    }

    /// Chats the adapter can currently see, for discovery.
    async fn list_chats(&self) -> Result<Vec<ChatInfo>, ChannelError> {
        Err(ChannelError::Unsupported("list_chats"))
    }

    /// Start the inbound long-poll loop, delivering events into `events`.
    /// At most one poller may run per token — adapters enforce this with a
    /// filesystem lock. Returns once the poller has started.
    async fn start_receiving(
        &self,
        events: mpsc::Sender<ChannelEvent>,
    ) -> Result<(), ChannelError>;

    /// Stop the long-poll loop and release the poller lock.
    async fn stop_receiving(&self);
}
