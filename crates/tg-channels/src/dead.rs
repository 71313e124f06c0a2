//! Dead-chat classification.
//!
//! A send failure marks a chat dead only when the backend's error message
//! matches a known-permanent pattern. Anything else is treated as
//! transient — chats must never be detached over a flaky network.

/// Substrings (matched case-insensitively) that indicate a chat is gone
/// for good.
const DEAD_CHAT_PATTERNS: &[&str] = &[
    "chat not found",
    "bot blocked",
    "bot was blocked",
    "forbidden",
    "chat_write_forbidden",
    "not enough rights",
    "group chat was deactivated",
    "bot was kicked",
];

/// True when `error_text` indicates the chat can no longer receive
/// messages.
pub fn is_dead_chat_error(error_text: &str) -> bool {
    let lower = error_text.to_ascii_lowercase();
    DEAD_CHAT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// True when the error is the fatal getUpdates conflict — another poller
/// owns this token.
pub fn is_poller_conflict(error_text: &str) -> bool {
    let lower = error_text.to_ascii_lowercase();
    lower.contains("terminated by other getupdates")
        || (lower.contains("409") && lower.contains("conflict"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_patterns_are_dead() {
        for msg in [
            "Forbidden: bot was blocked by the user",
            "Bad Request: chat not found",
            "Bad Request: CHAT_WRITE_FORBIDDEN",
            "Forbidden: bot was kicked from the supergroup chat",
            "Bad Request: not enough rights to send text messages",
            "Forbidden: the group chat was deactivated",
        ] {
            assert!(is_dead_chat_error(msg), "not classified dead: {msg}");
        }
    }

    #[test]
    fn transient_errors_are_not_dead() {
        for msg in [
            "Gateway Timeout",
            "connection reset by peer",
            "Too Many Requests: retry after 30",
            "Internal Server Error",
        ] {
            assert!(!is_dead_chat_error(msg), "wrongly classified dead: {msg}");
        }
    }

    #[test]
    fn conflict_detection() {
        assert!(is_poller_conflict(
            "409 Conflict: terminated by other getUpdates request"
        ));
        assert!(!is_poller_conflict("502 Bad Gateway"));
    }
}
