//! Approval polls and pickers.
//!
//! Single-select questions render as an inline keyboard whose callback
//! data is `tgp:<localPollId>:<optionId>`; multi-select uses a native
//! (non-anonymous) Telegram poll so several options can be toggled.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use tg_channels::types::truncate_option_label;

/// Callback-data prefix for touchgrass poll buttons.
pub const CALLBACK_PREFIX: &str = "tgp";

/// Build the callback payload for one option.
pub fn callback_data(poll_id: &str, option_id: usize) -> String {
    format!("{CALLBACK_PREFIX}:{poll_id}:{option_id}")
}

/// Parse callback data back into `(poll_id, option_id)`.
pub fn parse_callback_data(data: &str) -> Option<(String, usize)> {
    let mut parts = data.splitn(3, ':');
    if parts.next()? != CALLBACK_PREFIX {
        return None;
    }
    let poll_id = parts.next()?.to_string();
    let option_id = parts.next()?.parse().ok()?;
    Some((poll_id, option_id))
}

/// One button per row — approval options are sentences, not glyphs.
pub fn keyboard_for(poll_id: &str, options: &[String]) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = options
        .iter()
        .enumerate()
        .map(|(i, label)| {
            vec![InlineKeyboardButton::callback(
                truncate_option_label(label),
                callback_data(poll_id, i),
            )]
        })
        .collect();
    InlineKeyboardMarkup::new(rows)
}

/// Mint a fresh local poll id.
pub fn new_poll_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_roundtrip() {
        let data = callback_data("abc123", 2);
        assert_eq!(data, "tgp:abc123:2");
        assert_eq!(parse_callback_data(&data), Some(("abc123".into(), 2)));
    }

    #[test]
    fn rejects_foreign_callback_data() {
        assert_eq!(parse_callback_data("other:abc:1"), None);
        assert_eq!(parse_callback_data("tgp:abc"), None);
        assert_eq!(parse_callback_data("tgp:abc:x"), None);
    }

    #[test]
    fn keyboard_one_button_per_row() {
        let kb = keyboard_for("p", &["Yes".into(), "Yes, always".into(), "No".into()]);
        assert_eq!(kb.inline_keyboard.len(), 3);
        assert_eq!(kb.inline_keyboard[0].len(), 1);
    }

    #[test]
    fn poll_ids_are_short_and_unique() {
        let a = new_poll_id();
        let b = new_poll_id();
        assert_eq!(a.len(), 12);
        assert_ne!(a, b);
    }
}
