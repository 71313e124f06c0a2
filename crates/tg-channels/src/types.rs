use serde::{Deserialize, Serialize};

use tg_core::address::{ChatId, UserId};

/// Option labels are capped for keyboards; anything longer gets a single
/// ellipsis.
pub const OPTION_LABEL_MAX: usize = 100;

/// A message received from a chat backend, normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub user_id: UserId,
    pub chat_id: ChatId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Message text with bot mentions stripped and any downloaded
    /// attachment paths appended.
    pub text: String,
    /// Local paths of attachments downloaded from this message (or the
    /// replied-to message).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_paths: Vec<String>,
    pub is_group: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_title: Option<String>,
    /// Reference to the message this one replies to, when relevant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_ref: Option<String>,
}

/// An answer to an inline keyboard or native poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollAnswer {
    /// The local poll id the adapter returned from `send_poll`.
    pub poll_id: String,
    /// Native poll answers carry no chat; the pending flow keyed by
    /// `poll_id` knows where it lives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
    pub user_id: UserId,
    /// Selected option indices. Single-select keyboards carry exactly one.
    pub option_ids: Vec<usize>,
}

/// Everything the receive loop can hand the daemon.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Message(InboundMessage),
    PollAnswer(PollAnswer),
    /// A chat became permanently unreachable.
    DeadChat { chat_id: ChatId, reason: String },
    /// The poller stopped for good (e.g. getUpdates conflict).
    PollerStopped { reason: String },
}

/// Result of a plain `send`.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message_id: String,
}

/// Result of `send_poll`.
#[derive(Debug, Clone)]
pub struct PollCreated {
    /// Ephemeral id the daemon keys pending flows by.
    pub poll_id: String,
    pub message_id: String,
}

/// Options for `upsert_status_board`.
#[derive(Debug, Clone, Default)]
pub struct BoardOptions {
    /// Pin the board message when it is first created.
    pub pin: bool,
    /// Existing board message to edit in place.
    pub message_id: Option<String>,
    /// Whether the existing message is known to be pinned.
    pub pinned: bool,
}

/// Outcome of a board upsert. `pin_error` is set (and the call still
/// succeeds) when pinning failed, e.g. for missing rights.
#[derive(Debug, Clone)]
pub struct BoardUpdate {
    pub message_id: String,
    pub pinned: bool,
    pub pin_error: Option<String>,
}

/// Options for `clear_status_board`.
#[derive(Debug, Clone, Default)]
pub struct BoardClear {
    pub unpin: bool,
    pub message_id: Option<String>,
    pub pinned: bool,
}

/// Context for `sync_command_menu` — what the menu should contain depends
/// on who is asking from where.
#[derive(Debug, Clone)]
pub struct MenuContext {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub paired: bool,
    pub is_group: bool,
    pub is_linked_group: bool,
    pub has_active_session: bool,
}

/// Kinds of visible chats, for `/channels` discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Dm,
    Group,
    Topic,
}

/// A chat the adapter can see, for channel discovery and `--channel`
/// resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatInfo {
    pub chat_id: ChatId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub kind: ChatKind,
    /// A session is already attached to this chat.
    pub busy: bool,
}

/// Cap an option label, appending one ellipsis past [`OPTION_LABEL_MAX`].
pub fn truncate_option_label(label: &str) -> String {
    let chars: Vec<char> = label.chars().collect();
    if chars.len() <= OPTION_LABEL_MAX {
        label.to_string()
    } else {
        let mut out: String = chars[..OPTION_LABEL_MAX].iter().collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_at_limit_unchanged() {
        let label = "x".repeat(OPTION_LABEL_MAX);
        assert_eq!(truncate_option_label(&label), label);
    }

    #[test]
    fn label_over_limit_gets_single_ellipsis() {
        let label = "x".repeat(OPTION_LABEL_MAX + 1);
        let out = truncate_option_label(&label);
        assert_eq!(out.chars().count(), OPTION_LABEL_MAX + 1);
        assert!(out.ends_with('…'));
        assert_eq!(out.matches('…').count(), 1);
    }

    #[test]
    fn label_truncation_counts_chars_not_bytes() {
        let label = "é".repeat(OPTION_LABEL_MAX + 5);
        let out = truncate_option_label(&label);
        assert_eq!(out.chars().count(), OPTION_LABEL_MAX + 1);
    }
}
