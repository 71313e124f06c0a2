//! Cross-line parser state.
//!
//! Transcripts interleave tool calls and their results; the result record
//! often carries only a call id, so the parser remembers id → name/input
//! pairs. All maps are bounded to 200 entries, evicting the oldest
//! insertion first.

use std::collections::{HashMap, VecDeque};

/// Bound applied to every id-keyed map.
pub const STATE_CAP: usize = 200;

/// A HashMap bounded by insertion order.
#[derive(Debug, Default)]
pub struct BoundedMap<V> {
    map: HashMap<String, V>,
    order: VecDeque<String>,
}

impl<V> BoundedMap<V> {
    pub fn insert(&mut self, key: String, value: V) {
        if !self.map.contains_key(&key) {
            if self.map.len() >= STATE_CAP {
                if let Some(evicted) = self.order.pop_front() {
                    self.map.remove(&evicted);
                }
            }
            self.order.push_back(key.clone());
        }
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.map.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.order.retain(|k| k != key);
        self.map.remove(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// State carried across lines of one transcript.
#[derive(Debug, Default)]
pub struct ParserState {
    /// tool-call id → tool name, so results can be labelled.
    pub tool_names: BoundedMap<String>,
    /// tool-call id → input arguments, so results can be linked back to
    /// what was asked (diff rendering, URL sniffing).
    pub tool_inputs: BoundedMap<serde_json::Value>,
    /// Codex numeric background-session id → the command that started it.
    pub codex_session_commands: BoundedMap<String>,
    /// Kimi accumulates text fragments across `TextPart` messages…
    pub kimi_text: String,
    /// …and reasoning fragments across `ThinkPart` messages. Both flush at
    /// step boundaries.
    pub kimi_thinking: String,
}

impl ParserState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember_call(&mut self, id: &str, name: &str, input: &serde_json::Value) {
        self.tool_names.insert(id.to_string(), name.to_string());
        self.tool_inputs.insert(id.to_string(), input.clone());
    }

    pub fn name_for(&self, id: &str) -> Option<String> {
        self.tool_names.get(id).cloned()
    }

    pub fn input_for(&self, id: &str) -> Option<&serde_json::Value> {
        self.tool_inputs.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_map_evicts_oldest() {
        let mut m: BoundedMap<u32> = BoundedMap::default();
        for i in 0..STATE_CAP + 10 {
            m.insert(format!("k{i}"), i as u32);
        }
        assert_eq!(m.len(), STATE_CAP);
        assert!(m.get("k0").is_none());
        assert!(m.get(&format!("k{}", STATE_CAP + 9)).is_some());
    }

    #[test]
    fn reinsert_does_not_duplicate_order() {
        let mut m: BoundedMap<u32> = BoundedMap::default();
        m.insert("a".into(), 1);
        m.insert("a".into(), 2);
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("a"), Some(&2));
    }
}
