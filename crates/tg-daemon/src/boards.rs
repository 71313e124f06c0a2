//! Status-board bookkeeping.
//!
//! The channel adapter edits a board message in place; the daemon remembers
//! which message that is per `(chat, board key)` and persists the mapping
//! to `status-boards.json` so boards survive daemon restarts. The last
//! rendered body is kept too — re-rendering an identical board skips the
//! network call entirely.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use tg_core::address::ChatId;
use tg_core::paths::{write_private, Paths};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardEntry {
    pub message_id: String,
    pub pinned: bool,
    /// Last HTML body pushed to the channel. Not persisted.
    #[serde(skip)]
    pub last_html: String,
}

/// `(chatId, boardKey)` → board message state.
pub struct BoardStore {
    entries: Mutex<HashMap<String, BoardEntry>>,
    paths: Paths,
}

fn key_of(chat_id: &ChatId, board_key: &str) -> String {
    format!("{}|{}", chat_id.as_str(), board_key)
}

impl BoardStore {
    /// Load persisted board positions from `status-boards.json`.
    pub fn load(paths: &Paths) -> Self {
        let entries = std::fs::read_to_string(paths.status_boards_file())
            .ok()
            .and_then(|raw| serde_json::from_str::<HashMap<String, BoardEntry>>(&raw).ok())
            .unwrap_or_default();
        Self {
            entries: Mutex::new(entries),
            paths: paths.clone(),
        }
    }

    pub fn get(&self, chat_id: &ChatId, board_key: &str) -> Option<BoardEntry> {
        self.entries
            .lock()
            .unwrap()
            .get(&key_of(chat_id, board_key))
            .cloned()
    }

    /// True when `html` matches the last body pushed for this board.
    pub fn unchanged(&self, chat_id: &ChatId, board_key: &str, html: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(&key_of(chat_id, board_key))
            .map(|e| e.last_html == html)
            .unwrap_or(false)
    }

    pub fn put(&self, chat_id: &ChatId, board_key: &str, entry: BoardEntry) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key_of(chat_id, board_key), entry);
        self.persist(&entries);
    }

    pub fn remove(&self, chat_id: &ChatId, board_key: &str) -> Option<BoardEntry> {
        let mut entries = self.entries.lock().unwrap();
        let removed = entries.remove(&key_of(chat_id, board_key));
        self.persist(&entries);
        removed
    }

    fn persist(&self, entries: &HashMap<String, BoardEntry>) {
        match serde_json::to_string_pretty(entries) {
            Ok(json) => {
                if let Err(e) = write_private(&self.paths.status_boards_file(), json.as_bytes()) {
                    warn!(error = %e, "failed to persist status boards");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize status boards"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());
        let chat = ChatId::new("telegram:42");

        let store = BoardStore::load(&paths);
        store.put(
            &chat,
            "jobs",
            BoardEntry {
                message_id: "1234".into(),
                pinned: true,
                last_html: "<b>jobs</b>".into(),
            },
        );
        drop(store);

        let reloaded = BoardStore::load(&paths);
        let entry = reloaded.get(&chat, "jobs").unwrap();
        assert_eq!(entry.message_id, "1234");
        assert!(entry.pinned);
        // The body cache is transient — first render after restart edits.
        assert!(entry.last_html.is_empty());
    }

    #[test]
    fn unchanged_detection() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());
        let chat = ChatId::new("telegram:42");
        let store = BoardStore::load(&paths);
        store.put(
            &chat,
            "jobs",
            BoardEntry {
                message_id: "1".into(),
                pinned: false,
                last_html: "same".into(),
            },
        );
        assert!(store.unchanged(&chat, "jobs", "same"));
        assert!(!store.unchanged(&chat, "jobs", "different"));
        assert!(!store.unchanged(&ChatId::new("telegram:7"), "jobs", "same"));
    }
}
