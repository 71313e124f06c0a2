//! Assistant-text batching.
//!
//! Tools stream text in small pieces; forwarding each piece as its own
//! Telegram message is unreadable. Pieces accumulate per `(session, chat)`
//! and flush after a quiet window, at a hard age ceiling, or when the
//! buffer grows past the size cap. Tool calls and results force a flush
//! first so per-chat ordering is preserved.

use std::time::Instant;

use dashmap::DashMap;

struct Buffer {
    text: String,
    first_at: Instant,
    generation: u64,
}

/// Outcome of pushing a piece of text.
pub enum BatchOutcome {
    /// Buffered; flush later via [`OutputBatcher::take_if_current`] with
    /// this generation after the quiet window elapses.
    Buffered { generation: u64 },
    /// Caller must send this immediately (size or age ceiling hit).
    Flush(String),
}

pub struct OutputBatcher {
    buffers: DashMap<String, Buffer>,
    pub min_ms: u64,
    pub max_ms: u64,
    pub max_chars: usize,
}

impl OutputBatcher {
    pub fn new(min_ms: u64, max_ms: u64, max_chars: usize) -> Self {
        Self {
            buffers: DashMap::new(),
            min_ms,
            max_ms,
            max_chars,
        }
    }

    pub fn key(session_id: &str, chat: &str) -> String {
        format!("{session_id}|{chat}")
    }

    /// Append `text` to the buffer for `key`.
    pub fn push(&self, key: &str, text: &str) -> BatchOutcome {
        let mut entry = self.buffers.entry(key.to_string()).or_insert_with(|| Buffer {
            text: String::new(),
            first_at: Instant::now(),
            generation: 0,
        });
        if !entry.text.is_empty() {
            entry.text.push_str("\n\n");
        }
        entry.text.push_str(text);
        entry.generation += 1;

        let too_big = entry.text.len() >= self.max_chars;
        let too_old = entry.first_at.elapsed().as_millis() as u64 >= self.max_ms;
        if too_big || too_old {
            let text = std::mem::take(&mut entry.text);
            let generation = entry.generation;
            drop(entry);
            self.buffers.remove_if(key, |_, b| b.generation == generation);
            return BatchOutcome::Flush(text);
        }

        BatchOutcome::Buffered {
            generation: entry.generation,
        }
    }

    /// Flush iff nothing was appended since `generation` was handed out.
    pub fn take_if_current(&self, key: &str, generation: u64) -> Option<String> {
        let text = {
            let mut entry = self.buffers.get_mut(key)?;
            if entry.generation != generation || entry.text.is_empty() {
                return None;
            }
            std::mem::take(&mut entry.text)
        };
        self.buffers.remove_if(key, |_, b| b.text.is_empty());
        Some(text)
    }

    /// Unconditional flush, used before tool calls/results to keep order.
    pub fn take(&self, key: &str) -> Option<String> {
        let (_, buffer) = self.buffers.remove(key)?;
        if buffer.text.is_empty() {
            None
        } else {
            Some(buffer.text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batcher() -> OutputBatcher {
        OutputBatcher::new(300, 2_000, 100)
    }

    #[test]
    fn small_pushes_buffer() {
        let b = batcher();
        match b.push("k", "one") {
            BatchOutcome::Buffered { generation } => {
                assert_eq!(b.take_if_current("k", generation), Some("one".into()));
            }
            BatchOutcome::Flush(_) => panic!("should buffer"),
        }
    }

    #[test]
    fn stale_generation_does_not_flush() {
        let b = batcher();
        let BatchOutcome::Buffered { generation } = b.push("k", "one") else {
            panic!()
        };
        let BatchOutcome::Buffered { generation: newer } = b.push("k", "two") else {
            panic!()
        };
        assert_eq!(b.take_if_current("k", generation), None);
        assert_eq!(b.take_if_current("k", newer), Some("one\n\ntwo".into()));
    }

    #[test]
    fn size_cap_forces_flush() {
        let b = batcher();
        let big = "x".repeat(200);
        match b.push("k", &big) {
            BatchOutcome::Flush(text) => assert_eq!(text, big),
            BatchOutcome::Buffered { .. } => panic!("should flush"),
        }
    }

    #[test]
    fn force_take_drains() {
        let b = batcher();
        let _ = b.push("k", "pending");
        assert_eq!(b.take("k"), Some("pending".into()));
        assert_eq!(b.take("k"), None);
    }
}
