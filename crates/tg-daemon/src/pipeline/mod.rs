//! The output pipeline: normalized session events in, chat messages out.
//!
//! Fan-out reads a snapshot of `(bound chat, subscribed groups)` and never
//! holds the session lock across a network call. Per-chat ordering is
//! preserved by routing every send through one worker task per chat.

pub mod batch;
pub mod render;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use tg_channels::error::ChannelError;
use tg_channels::types::{BoardClear, BoardOptions};
use tg_core::address::ChatId;
use tg_sessions::{PendingFlow, QuestionItem};
use tg_transcript::{BackgroundJobEvent, Question, ToolCall, ToolResult};

use crate::app::AppState;
use crate::boards::BoardEntry;
use batch::BatchOutcome;
use render::{render_jobs_board, render_tool_call, render_tool_result};

/// Board key used for the background-jobs board.
pub const JOBS_BOARD: &str = "jobs";

/// One normalized event pushed by a wrapper.
#[derive(Debug)]
pub enum IngestEvent {
    Assistant { text: String },
    Thinking { text: String },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
    Question(Vec<Question>),
    ApprovalNeeded { prompt: String, options: Vec<String>, multi: bool },
    BackgroundJob(BackgroundJobEvent),
    Typing { active: bool },
}

/// What a per-chat worker can deliver.
enum SendItem {
    /// Markdown-ish assistant text, formatted at send time.
    Markdown(String),
    /// Pre-rendered channel markup.
    Html(String),
}

/// Per-chat ordered send queues.
#[derive(Default)]
pub struct SendQueues {
    workers: DashMap<String, mpsc::UnboundedSender<SendItem>>,
}

impl SendQueues {
    fn enqueue(&self, state: &Arc<AppState>, chat: &ChatId, item: SendItem) {
        let sender = self
            .workers
            .entry(chat.as_str().to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(chat_worker(Arc::clone(state), chat.clone(), rx));
                tx
            })
            .clone();
        if sender.send(item).is_err() {
            self.workers.remove(chat.as_str());
        }
    }
}

/// Sequentially delivers everything queued for one chat.
async fn chat_worker(
    state: Arc<AppState>,
    chat: ChatId,
    mut rx: mpsc::UnboundedReceiver<SendItem>,
) {
    while let Some(item) = rx.recv().await {
        let Some(channel) = state.channel_for_chat(&chat) else {
            debug!(chat = %chat, "no channel for chat, dropping send");
            continue;
        };
        let result = match item {
            SendItem::Markdown(text) => {
                let html = channel.formatter().from_markdown(&text);
                channel.send(&chat, &html).await.map(|_| ())
            }
            SendItem::Html(html) => channel.send(&chat, &html).await.map(|_| ()),
        };
        match result {
            Ok(()) => {}
            Err(ChannelError::DeadChat { reason, .. }) => {
                warn!(chat = %chat, reason = %reason, "chat is dead, detaching");
                state.sessions.detach(&chat);
            }
            Err(e) => warn!(chat = %chat, error = %e, "send failed"),
        }
    }
}

static QUEUES: std::sync::OnceLock<SendQueues> = std::sync::OnceLock::new();

fn queues() -> &'static SendQueues {
    QUEUES.get_or_init(SendQueues::default)
}

/// Route one session event to its chats.
pub async fn dispatch(state: &Arc<AppState>, session_id: &str, event: IngestEvent) {
    let Some(targets) = state.sessions.fanout_targets(session_id) else {
        return;
    };
    let chats = targets.all();

    if let IngestEvent::Typing { active } = event {
        for chat in &chats {
            if let Some(channel) = state.channel_for_chat(chat) {
                let _ = channel.set_typing(chat, active).await;
            }
        }
        return;
    }

    // Any concrete event supersedes the typing indicator.
    for chat in &chats {
        if let Some(channel) = state.channel_for_chat(chat) {
            let _ = channel.set_typing(chat, false).await;
        }
    }

    if chats.is_empty() {
        // Group/topic chats are never implicit fallbacks; with nothing
        // attached the event is dropped.
        return;
    }

    match event {
        IngestEvent::Assistant { text } => {
            for chat in &chats {
                let key = batch::OutputBatcher::key(session_id, chat.as_str());
                match state.batcher.push(&key, &text) {
                    BatchOutcome::Flush(flushed) => {
                        queues().enqueue(state, chat, SendItem::Markdown(flushed));
                    }
                    BatchOutcome::Buffered { generation } => {
                        let state = Arc::clone(state);
                        let chat = chat.clone();
                        let min_ms = state.batcher.min_ms;
                        tokio::spawn(async move {
                            tokio::time::sleep(std::time::Duration::from_millis(min_ms)).await;
                            if let Some(flushed) = state.batcher.take_if_current(&key, generation)
                            {
                                queues().enqueue(&state, &chat, SendItem::Markdown(flushed));
                            }
                        });
                    }
                }
            }
        }

        IngestEvent::Thinking { text } => {
            for chat in &chats {
                let enabled = state.with_config(|c| c.thinking_enabled(chat));
                if !enabled {
                    continue;
                }
                if let Some(channel) = state.channel_for_chat(chat) {
                    let html = format!("💭 {}", channel.formatter().italic(&text));
                    queues().enqueue(state, chat, SendItem::Html(html));
                }
            }
        }

        IngestEvent::ToolCall(call) => {
            for chat in &chats {
                flush_pending(state, session_id, chat);
                let mode = state.with_config(|c| c.output_mode(chat));
                if let Some(channel) = state.channel_for_chat(chat) {
                    if let Some(html) = render_tool_call(channel.formatter(), &call, mode) {
                        queues().enqueue(state, chat, SendItem::Html(html));
                    }
                }
            }
        }

        IngestEvent::ToolResult(result) => {
            for chat in &chats {
                flush_pending(state, session_id, chat);
                let mode = state.with_config(|c| c.output_mode(chat));
                if let Some(channel) = state.channel_for_chat(chat) {
                    if let Some(html) = render_tool_result(channel.formatter(), &result, mode) {
                        queues().enqueue(state, chat, SendItem::Html(html));
                    }
                }
            }
        }

        IngestEvent::Question(questions) => {
            let Some(bound) = targets.bound else { return };
            let items: Vec<QuestionItem> = questions
                .into_iter()
                .map(|q| QuestionItem {
                    question: match q.header {
                        Some(header) => format!("{header}\n{}", q.question),
                        None => q.question,
                    },
                    options: q.options,
                    multi_select: q.multi_select,
                })
                .collect();
            if items.is_empty() {
                return;
            }
            send_question_poll(state, session_id, &bound, items, 0).await;
        }

        IngestEvent::ApprovalNeeded { prompt, options, multi } => {
            // One open approval poll per session; repeats are dropped.
            if state.sessions.open_approval_poll(session_id).is_some() {
                return;
            }
            let Some(bound) = targets.bound else { return };
            let Some(channel) = state.channel_for_chat(&bound) else { return };

            let options = if options.is_empty() {
                vec!["Yes".to_string(), "Yes, don't ask again".to_string(), "No".to_string()]
            } else {
                options
            };
            let question = format!("🔐 {prompt}");
            match channel.send_poll(&bound, &question, &options, multi).await {
                Ok(created) => {
                    state.sessions.put_flow(
                        created.poll_id,
                        PendingFlow::ApprovalPoll {
                            session_id: session_id.to_string(),
                            chat_id: bound,
                            options,
                            multi,
                            message_id: created.message_id,
                        },
                    );
                }
                Err(e) => warn!(session = %session_id, error = %e, "approval poll failed"),
            }
        }

        IngestEvent::BackgroundJob(job) => {
            state.sessions.update_background_job(
                session_id,
                &job.task_id,
                match job.status {
                    tg_transcript::JobStatus::Running => tg_sessions::JobStatus::Running,
                    tg_transcript::JobStatus::Completed => tg_sessions::JobStatus::Completed,
                    tg_transcript::JobStatus::Failed => tg_sessions::JobStatus::Failed,
                    tg_transcript::JobStatus::Killed => tg_sessions::JobStatus::Killed,
                },
                job.command.clone(),
                job.urls.clone(),
            );
            refresh_jobs_board(state, session_id).await;
        }

        IngestEvent::Typing { .. } => unreachable!("handled above"),
    }
}

/// Flush buffered assistant text ahead of a tool event to keep order.
fn flush_pending(state: &Arc<AppState>, session_id: &str, chat: &ChatId) {
    let key = batch::OutputBatcher::key(session_id, chat.as_str());
    if let Some(flushed) = state.batcher.take(&key) {
        queues().enqueue(state, chat, SendItem::Markdown(flushed));
    }
}

/// Present one question of a question set as a poll and register the flow.
pub async fn send_question_poll(
    state: &Arc<AppState>,
    session_id: &str,
    chat: &ChatId,
    questions: Vec<QuestionItem>,
    index: usize,
) {
    let Some(channel) = state.channel_for_chat(chat) else { return };
    let Some(question) = questions.get(index) else { return };

    let mut options: Vec<String> = question
        .options
        .iter()
        .map(|o| tg_channels::types::truncate_option_label(o))
        .collect();
    if question.multi_select && options.len() > 10 {
        // Native polls cap at 10 options.
        options.truncate(10);
    }
    match channel
        .send_poll(chat, &question.question, &options, question.multi_select)
        .await
    {
        Ok(created) => {
            state.sessions.put_flow(
                created.poll_id,
                PendingFlow::QuestionSet {
                    session_id: session_id.to_string(),
                    chat_id: chat.clone(),
                    questions,
                    index,
                    message_id: created.message_id,
                },
            );
        }
        Err(e) => warn!(session = %session_id, error = %e, "question poll failed"),
    }
}

/// Re-render the background-jobs board for the owner DM and subscribed
/// groups: pinned on first create, edited in place after, cleared when the
/// last running job finishes.
pub async fn refresh_jobs_board(state: &Arc<AppState>, session_id: &str) {
    let Some(session) = state.sessions.get(session_id) else { return };
    let running = state.sessions.running_jobs(session_id);

    let mut board_chats = vec![session.chat_id.clone()];
    for group in state.sessions.subscribed_groups(session_id) {
        if !board_chats.contains(&group) {
            board_chats.push(group);
        }
    }

    for chat in board_chats {
        let Some(channel) = state.channel_for_chat(&chat) else { continue };
        let existing = state.boards.get(&chat, JOBS_BOARD);

        if running.is_empty() {
            if let Some(entry) = existing {
                let _ = channel
                    .clear_status_board(
                        &chat,
                        JOBS_BOARD,
                        BoardClear {
                            unpin: true,
                            message_id: Some(entry.message_id),
                            pinned: entry.pinned,
                        },
                    )
                    .await;
                state.boards.remove(&chat, JOBS_BOARD);
            }
            continue;
        }

        let html = render_jobs_board(channel.formatter(), &running);
        if state.boards.unchanged(&chat, JOBS_BOARD, &html) {
            continue;
        }

        let opts = BoardOptions {
            pin: existing.is_none(),
            message_id: existing.as_ref().map(|e| e.message_id.clone()),
            pinned: existing.as_ref().map(|e| e.pinned).unwrap_or(false),
        };
        match channel.upsert_status_board(&chat, JOBS_BOARD, &html, opts).await {
            Ok(update) => {
                if let Some(pin_error) = &update.pin_error {
                    debug!(chat = %chat, pin_error = %pin_error, "board pin failed");
                }
                state.boards.put(
                    &chat,
                    JOBS_BOARD,
                    BoardEntry {
                        message_id: update.message_id,
                        pinned: update.pinned,
                        last_html: html,
                    },
                );
            }
            Err(e) => warn!(chat = %chat, error = %e, "board upsert failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Mutex, RwLock};

    use async_trait::async_trait;
    use tg_channels::channel::Channel;
    use tg_channels::format::{Formatter, HtmlFormatter};
    use tg_channels::types::{PollCreated, SentMessage};
    use tg_core::address::UserId;
    use tg_core::config::Config;
    use tg_core::pairing::PairingCodes;
    use tg_core::paths::Paths;
    use tg_sessions::SessionManager;

    /// Records calls; pinning always fails with a rights error.
    struct FakeChannel {
        sends: Mutex<Vec<(String, String)>>,
        polls: Mutex<Vec<String>>,
        upserts: AtomicU32,
    }

    impl FakeChannel {
        fn new() -> Self {
            Self {
                sends: Mutex::new(Vec::new()),
                polls: Mutex::new(Vec::new()),
                upserts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Channel for FakeChannel {
        fn name(&self) -> &str {
            "telegram"
        }
        fn channel_type(&self) -> &str {
            "telegram"
        }
        fn formatter(&self) -> &dyn Formatter {
            &HtmlFormatter
        }
        async fn send(
            &self,
            chat_id: &ChatId,
            html: &str,
        ) -> Result<SentMessage, ChannelError> {
            self.sends
                .lock()
                .unwrap()
                .push((chat_id.to_string(), html.to_string()));
            Ok(SentMessage {
                message_id: "1".into(),
            })
        }
        async fn send_poll(
            &self,
            _chat_id: &ChatId,
            question: &str,
            _options: &[String],
            _multi_select: bool,
        ) -> Result<PollCreated, ChannelError> {
            self.polls.lock().unwrap().push(question.to_string());
            Ok(PollCreated {
                poll_id: format!("poll-{}", self.polls.lock().unwrap().len()),
                message_id: "2".into(),
            })
        }
        async fn upsert_status_board(
            &self,
            _chat_id: &ChatId,
            _board_key: &str,
            _html: &str,
            opts: BoardOptions,
        ) -> Result<tg_channels::types::BoardUpdate, ChannelError> {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            Ok(tg_channels::types::BoardUpdate {
                message_id: "1234".into(),
                pinned: false,
                pin_error: opts.pin.then(|| "Bad Request: not enough rights".to_string()),
            })
        }
        async fn set_typing(&self, _chat_id: &ChatId, _active: bool) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn start_receiving(
            &self,
            _events: tokio::sync::mpsc::Sender<tg_channels::types::ChannelEvent>,
        ) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn stop_receiving(&self) {}
    }

    fn state_with_fake(dir: &std::path::Path) -> (Arc<AppState>, Arc<FakeChannel>) {
        let paths = Paths::at(dir);
        let fake = Arc::new(FakeChannel::new());
        let state = Arc::new(AppState {
            paths: paths.clone(),
            config: RwLock::new(Config::default()),
            started_at: "2026-08-01T00:00:00Z".into(),
            pid: 1,
            secret: "s".into(),
            sessions: SessionManager::new(8),
            channels: vec![fake.clone() as Arc<dyn Channel>],
            pairing: PairingCodes::new(),
            boards: crate::boards::BoardStore::load(&paths),
            batcher: batch::OutputBatcher::new(50, 500, 4_000),
            shutdown: tokio_util::sync::CancellationToken::new(),
        });
        (state, fake)
    }

    fn register(state: &Arc<AppState>) -> String {
        let session = state
            .sessions
            .register_remote(
                vec!["claude".into()],
                ChatId::new("telegram:42"),
                UserId::new("telegram:42"),
                "/work".into(),
                None,
            )
            .unwrap();
        state.sessions.attach(&ChatId::new("telegram:42"), &session.id);
        session.id
    }

    #[tokio::test]
    async fn board_pin_failure_keeps_board_usable() {
        let dir = tempfile::tempdir().unwrap();
        let (state, fake) = state_with_fake(dir.path());
        let sid = register(&state);

        state.sessions.update_background_job(
            &sid,
            "t1",
            tg_sessions::JobStatus::Running,
            Some("npm run dev".into()),
            vec![],
        );
        refresh_jobs_board(&state, &sid).await;
        assert_eq!(fake.upserts.load(Ordering::SeqCst), 1);

        // Pin failed but the board entry survives for future edits.
        let entry = state.boards.get(&ChatId::new("telegram:42"), JOBS_BOARD).unwrap();
        assert_eq!(entry.message_id, "1234");
        assert!(!entry.pinned);

        // Identical body on the next refresh skips the network entirely.
        refresh_jobs_board(&state, &sid).await;
        assert_eq!(fake.upserts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn approval_polls_dedupe_per_session() {
        let dir = tempfile::tempdir().unwrap();
        let (state, fake) = state_with_fake(dir.path());
        let sid = register(&state);

        for _ in 0..3 {
            dispatch(
                &state,
                &sid,
                IngestEvent::ApprovalNeeded {
                    prompt: "Bash wants to run: rm -rf target".into(),
                    options: vec![],
                    multi: false,
                },
            )
            .await;
        }
        assert_eq!(fake.polls.lock().unwrap().len(), 1);
        assert!(state.sessions.open_approval_poll(&sid).is_some());
    }

    #[tokio::test]
    async fn events_without_targets_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (state, fake) = state_with_fake(dir.path());
        // Registered but nothing attached: fan-out target set is empty.
        let session = state
            .sessions
            .register_remote(
                vec!["codex".into()],
                ChatId::new("telegram:42"),
                UserId::new("telegram:42"),
                "/work".into(),
                None,
            )
            .unwrap();

        dispatch(
            &state,
            &session.id,
            IngestEvent::ApprovalNeeded {
                prompt: "anything".into(),
                options: vec![],
                multi: false,
            },
        )
        .await;
        assert!(fake.polls.lock().unwrap().is_empty());
    }
}
