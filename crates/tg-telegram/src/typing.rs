//! Typing indicator with heartbeat.
//!
//! Telegram's typing status expires after ~5 seconds, so an active
//! indicator is refreshed every 4.5 s. A hard 2-minute timeout stops the
//! loop even if nobody clears it. Asserting an already-active indicator is
//! a no-op.

use std::time::Duration;

use dashmap::DashMap;
use teloxide::payloads::SendChatActionSetters;
use teloxide::prelude::*;
use teloxide::types::ChatAction;
use teloxide::types::ChatId as TgChatId;
use tokio::task::JoinHandle;

/// Refresh cadence.
const HEARTBEAT: Duration = Duration::from_millis(4_500);
/// Hard stop for a forgotten indicator.
const MAX_TYPING: Duration = Duration::from_secs(120);

/// Per-chat typing heartbeat tasks, keyed by the serialized chat address.
#[derive(Default)]
pub struct TypingManager {
    active: DashMap<String, JoinHandle<()>>,
}

impl TypingManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or keep) the heartbeat for `chat`.
    pub fn start(
        &self,
        bot: &Bot,
        key: String,
        chat: TgChatId,
        thread: Option<teloxide::types::ThreadId>,
    ) {
        if self.active.contains_key(&key) {
            return;
        }
        let bot = bot.clone();
        let handle = tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            loop {
                let mut req = bot.send_chat_action(chat, ChatAction::Typing);
                if let Some(thread) = thread {
                    req = req.message_thread_id(thread);
                }
                let _ = req.await;
                if started.elapsed() >= MAX_TYPING {
                    break;
                }
                tokio::time::sleep(HEARTBEAT).await;
            }
        });
        if let Some(previous) = self.active.insert(key, handle) {
            previous.abort();
        }
    }

    /// Stop the heartbeat for `chat`, if one is running.
    pub fn stop(&self, key: &str) {
        if let Some((_, handle)) = self.active.remove(key) {
            handle.abort();
        }
    }

    /// Abort everything (adapter shutdown).
    pub fn stop_all(&self) {
        for entry in self.active.iter() {
            entry.value().abort();
        }
        self.active.clear();
    }
}
