//! Inbound chat routing: commands, pickers, and stdin input.
//!
//! One entry point per inbound event kind. Precedence for messages:
//! pairing first (works unpaired), help, the unpaired guard, the unlinked
//! group guard, slash commands, and finally free-form text routed to the
//! target session's stdin.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use tg_channels::types::{InboundMessage, MenuContext, PollAnswer};
use tg_core::address::{ChatId, UserId};
use tg_core::config::OutputMode;
use tg_sessions::PendingFlow;
use tg_transcript::discover::Discovery;
use tg_transcript::resume::{extract_resume_ref, is_safe_session_ref};
use tg_transcript::tool::Tool;

use crate::app::AppState;
use crate::pickers::{
    list_repo_files, page_options, rank_files, resolve_page_answer, resume_label, resume_ref_for,
};
use crate::pipeline::send_question_poll;

/// `/pair` attempts allowed per user per minute.
const PAIR_BUCKET_CAPACITY: f64 = 3.0;
const PAIR_REFILL_PER_SEC: f64 = 3.0 / 60.0;

/// Token bucket per user for `/pair` attempts.
#[derive(Default)]
pub struct PairRateLimiter {
    buckets: DashMap<String, (f64, Instant)>,
}

impl PairRateLimiter {
    pub fn allow(&self, user: &UserId) -> bool {
        let now = Instant::now();
        let mut entry = self
            .buckets
            .entry(user.as_str().to_string())
            .or_insert((PAIR_BUCKET_CAPACITY, now));
        let (ref mut tokens, ref mut last) = *entry;
        *tokens = (*tokens + last.elapsed().as_secs_f64() * PAIR_REFILL_PER_SEC)
            .min(PAIR_BUCKET_CAPACITY);
        *last = now;
        if *tokens >= 1.0 {
            *tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

static PAIR_LIMITER: std::sync::OnceLock<PairRateLimiter> = std::sync::OnceLock::new();

fn pair_limiter() -> &'static PairRateLimiter {
    PAIR_LIMITER.get_or_init(PairRateLimiter::default)
}

const HELP_TEXT: &str = "touchgrass bridges your local coding tools to this chat.\n\n\
/pair <code> — pair with the daemon (get a code with `tg pair`)\n\
/sessions — list running sessions\n\
/attach — attach a session to this chat\n\
/files [query] — pick repo files to mention\n\
/resume — resume a past session\n\
/restart — restart the attached session\n\
/stop /kill — interrupt or kill the tool\n\
/output_mode — simple or verbose output\n\
/thinking — toggle the reasoning stream\n\
/background_jobs — running background jobs\n\
/link /unlink — link a group chat\n\
/detach — detach this chat";

/// Route one inbound chat message.
pub async fn route_message(state: &Arc<AppState>, msg: InboundMessage) {
    let text = msg.text.trim().to_string();
    let command = normalize_command(&text);

    // 1. Pairing is accepted even from unpaired users, rate-limited.
    let (head, tail) = split_command(&command);
    if head == "/pair" {
        handle_pair(state, &msg, tail).await;
        return;
    }

    // 2. Help.
    if command == "/start" || command == "/help" {
        reply(state, &msg.chat_id, HELP_TEXT).await;
        return;
    }

    // 3. Everyone else must be paired.
    let paired = state.with_config(|c| c.is_paired(&msg.user_id));
    if !paired {
        reply(
            state,
            &msg.chat_id,
            "Not paired yet. Run `tg pair` on your machine and send /pair <code>.",
        )
        .await;
        return;
    }

    // 4. Groups must be linked before anything but /link works.
    let linked = state.with_config(|c| c.is_linked_group(&msg.chat_id));
    if msg.is_group && !linked && !command.starts_with("/link") {
        reply(state, &msg.chat_id, "This group is not linked. Send /link first.").await;
        return;
    }

    // 5-6. Commands.
    if command.starts_with('/') {
        let (name, args) = split_command(&command);
        match name {
            "/link" => handle_link(state, &msg, args).await,
            "/unlink" => handle_unlink(state, &msg).await,
            "/files" => handle_files(state, &msg, args).await,
            "/resume" => handle_resume(state, &msg).await,
            "/output_mode" => handle_output_mode(state, &msg).await,
            "/thinking" => handle_thinking(state, &msg).await,
            "/sessions" | "/session" => handle_sessions(state, &msg).await,
            "/attach" => handle_attach(state, &msg, args).await,
            "/detach" => handle_detach(state, &msg).await,
            "/stop" => handle_stop_kill(state, &msg, false).await,
            "/kill" => handle_stop_kill(state, &msg, true).await,
            "/restart" => handle_restart(state, &msg).await,
            "/background_jobs" => handle_background_jobs(state, &msg).await,
            _ => reply(state, &msg.chat_id, "Unknown command. /help lists everything.").await,
        }
        sync_menu(state, &msg).await;
        return;
    }

    // 7. Free-form text is stdin input for the target session.
    handle_stdin(state, &msg, &text).await;
}

/// `tg <sub…>` shorthands alias the slash commands.
fn normalize_command(text: &str) -> String {
    if let Some(rest) = text.strip_prefix("tg ") {
        format!("/{}", rest.trim())
    } else {
        text.to_string()
    }
}

fn split_command(command: &str) -> (&str, &str) {
    match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    }
}

async fn handle_pair(state: &Arc<AppState>, msg: &InboundMessage, code: &str) {
    if !pair_limiter().allow(&msg.user_id) {
        reply(state, &msg.chat_id, "Too many attempts. Wait a minute and try again.").await;
        return;
    }
    if code.is_empty() {
        reply(state, &msg.chat_id, "Usage: /pair <code> (from `tg pair` on your machine)").await;
        return;
    }
    if !state.pairing.redeem(code) {
        reply(state, &msg.chat_id, "That code is unknown or expired.").await;
        return;
    }

    let result = state.update_config(|c| {
        c.add_paired_user(msg.user_id.clone(), msg.username.clone())
    });
    match result {
        Ok(Ok(())) => {
            info!(user = %msg.user_id, "paired user");
            reply(state, &msg.chat_id, "Paired ✅ — start a tool with `tg claude` and drive it from here.").await;
        }
        Ok(Err(e)) | Err(e) => {
            warn!(error = %e, "pairing failed");
            reply(state, &msg.chat_id, "Pairing failed: no matching channel is configured.").await;
        }
    }
}

async fn handle_link(state: &Arc<AppState>, msg: &InboundMessage, name: &str) {
    if !msg.is_group {
        reply(state, &msg.chat_id, "/link only makes sense in a group or topic.").await;
        return;
    }
    let title = if name.is_empty() {
        msg.topic_title.clone().or_else(|| msg.chat_title.clone())
    } else {
        Some(name.to_string())
    };

    // Linking a topic auto-links the parent group first.
    let parent = msg.chat_id.parent();
    let result = state.update_config(|c| {
        if parent != msg.chat_id {
            c.link_group(parent.clone(), msg.chat_title.clone())?;
        }
        c.link_group(msg.chat_id.clone(), title.clone())
    });
    match result {
        Ok(Ok(())) => reply(state, &msg.chat_id, "Linked. Sessions can now be attached here.").await,
        Ok(Err(e)) | Err(e) => {
            warn!(error = %e, "link failed");
            reply(state, &msg.chat_id, "Linking failed — is the channel configured?").await;
        }
    }
}

async fn handle_unlink(state: &Arc<AppState>, msg: &InboundMessage) {
    let removed = state
        .update_config(|c| c.unlink_group(&msg.chat_id))
        .unwrap_or(false);
    state.sessions.detach(&msg.chat_id);
    let text = if removed { "Unlinked." } else { "This chat was not linked." };
    reply(state, &msg.chat_id, text).await;
}

async fn handle_files(state: &Arc<AppState>, msg: &InboundMessage, query: &str) {
    let Some(session_id) = resolve_session(state, msg, true).await else {
        return;
    };
    let Some(session) = state.sessions.get(&session_id) else { return };

    let all = list_repo_files(std::path::Path::new(&session.cwd), 500);
    let ranked = rank_files(&all, query);
    if ranked.is_empty() {
        reply(state, &msg.chat_id, "No matching files.").await;
        return;
    }

    // An optional Telegram web-app picker supersedes the poll flow.
    if let Ok(url) = std::env::var("TG_TELEGRAM_FILE_PICKER_URL") {
        if !url.is_empty() {
            reply(
                state,
                &msg.chat_id,
                &format!("Pick files in the web picker: {url}#session={session_id}"),
            )
            .await;
        }
    }

    send_file_picker(state, &session_id, msg, ranked, 0, Vec::new()).await;
}

pub(crate) async fn send_file_picker(
    state: &Arc<AppState>,
    session_id: &str,
    msg: &InboundMessage,
    files: Vec<String>,
    page: usize,
    selected: Vec<String>,
) {
    let Some(channel) = state.channel_for_chat(&msg.chat_id) else { return };
    let (options, _) = page_options(&files, page);
    match channel
        .send_poll(&msg.chat_id, "📎 Pick files to mention", &options, true)
        .await
    {
        Ok(created) => state.sessions.put_flow(
            created.poll_id,
            PendingFlow::FilePicker {
                session_id: session_id.to_string(),
                chat_id: msg.chat_id.clone(),
                user_id: msg.user_id.clone(),
                files,
                page,
                selected,
                message_id: created.message_id,
            },
        ),
        Err(e) => warn!(error = %e, "file picker poll failed"),
    }
}

async fn handle_resume(state: &Arc<AppState>, msg: &InboundMessage) {
    let Some(session_id) = resolve_session(state, msg, true).await else {
        return;
    };
    let Some(session) = state.sessions.get(&session_id) else { return };
    let Some(tool) = session.command.first().and_then(|c| Tool::from_argv0(c)) else {
        reply(state, &msg.chat_id, "Cannot tell which tool this session runs.").await;
        return;
    };

    let Some(discovery) = Discovery::new() else {
        reply(state, &msg.chat_id, "Cannot locate transcripts on this machine.").await;
        return;
    };
    let candidates: Vec<String> = discovery
        .list_transcripts(tool, &session.cwd)
        .into_iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    if candidates.is_empty() {
        reply(state, &msg.chat_id, "No resumable transcripts found.").await;
        return;
    }

    let labels: Vec<String> = candidates
        .iter()
        .map(|p| resume_label(std::path::Path::new(p)))
        .collect();
    let Some(channel) = state.channel_for_chat(&msg.chat_id) else { return };
    let (options, _) = page_options(&labels, 0);
    match channel
        .send_poll(&msg.chat_id, "⏪ Resume which session?", &options, false)
        .await
    {
        Ok(created) => state.sessions.put_flow(
            created.poll_id,
            PendingFlow::ResumePicker {
                chat_id: msg.chat_id.clone(),
                user_id: msg.user_id.clone(),
                tool: tool.name().to_string(),
                cwd: session.cwd.clone(),
                candidates,
                labels,
                page: 0,
                message_id: created.message_id,
            },
        ),
        Err(e) => warn!(error = %e, "resume picker poll failed"),
    }
}

async fn handle_output_mode(state: &Arc<AppState>, msg: &InboundMessage) {
    let Some(channel) = state.channel_for_chat(&msg.chat_id) else { return };
    let options = vec!["Simple".to_string(), "Verbose".to_string()];
    match channel
        .send_poll(&msg.chat_id, "Output mode for this chat?", &options, false)
        .await
    {
        Ok(created) => state.sessions.put_flow(
            created.poll_id,
            PendingFlow::OutputModePicker {
                chat_id: msg.chat_id.clone(),
                message_id: created.message_id,
            },
        ),
        Err(e) => warn!(error = %e, "output mode poll failed"),
    }
}

async fn handle_thinking(state: &Arc<AppState>, msg: &InboundMessage) {
    let enabled = state.with_config(|c| c.thinking_enabled(&msg.chat_id));
    let _ = state.update_config(|c| {
        let prefs = c.chat_preferences.entry(msg.chat_id.as_str().to_string()).or_default();
        prefs.thinking = Some(!enabled);
    });
    let text = if enabled {
        "Reasoning stream off."
    } else {
        "Reasoning stream on — you'll see the tool think."
    };
    reply(state, &msg.chat_id, text).await;
}

async fn handle_sessions(state: &Arc<AppState>, msg: &InboundMessage) {
    let sessions = state.sessions.list();
    if sessions.is_empty() {
        reply(state, &msg.chat_id, "No sessions running. Start one with `tg claude`.").await;
        return;
    }
    let mut out = String::from("Running sessions:");
    for s in &sessions {
        let tool = s.command.first().map(String::as_str).unwrap_or("?");
        let attached = if s.bound_chat.is_some() { "📌" } else { "·" };
        out.push_str(&format!("\n{attached} `{}` {} — {}", s.id, tool, s.cwd));
    }
    out.push_str("\n\nAttach one with /attach.");
    reply(state, &msg.chat_id, &out).await;
}

async fn handle_attach(state: &Arc<AppState>, msg: &InboundMessage, arg: &str) {
    if !arg.is_empty() {
        if !state.sessions.can_user_access_session(&msg.user_id, arg) {
            reply(state, &msg.chat_id, "No such session (or it isn't yours).").await;
            return;
        }
        attach_session(state, msg, arg).await;
        return;
    }

    let owned = state.sessions.sessions_owned_by(&msg.user_id);
    match owned.len() {
        0 => reply(state, &msg.chat_id, "You have no running sessions.").await,
        1 => attach_session(state, msg, &owned[0]).await,
        _ => {
            // Several sessions: ask which.
            let labels: Vec<String> = owned
                .iter()
                .map(|id| {
                    state
                        .sessions
                        .get(id)
                        .map(|s| {
                            format!(
                                "{} — {}",
                                s.command.first().map(String::as_str).unwrap_or("?"),
                                s.cwd
                            )
                        })
                        .unwrap_or_else(|| id.clone())
                })
                .collect();
            let Some(channel) = state.channel_for_chat(&msg.chat_id) else { return };
            match channel
                .send_poll(&msg.chat_id, "Attach which session?", &labels, false)
                .await
            {
                Ok(created) => state.sessions.put_flow(
                    created.poll_id,
                    PendingFlow::RemoteControlPicker {
                        chat_id: msg.chat_id.clone(),
                        user_id: msg.user_id.clone(),
                        session_ids: owned,
                        message_id: created.message_id,
                    },
                ),
                Err(e) => warn!(error = %e, "session picker poll failed"),
            }
        }
    }
}

pub(crate) async fn attach_session(state: &Arc<AppState>, msg: &InboundMessage, session_id: &str) {
    if !state.sessions.attach(&msg.chat_id, session_id) {
        reply(state, &msg.chat_id, "That session already exited.").await;
        return;
    }
    // Group/topic attachments also subscribe the chat for fan-out copies.
    if msg.is_group {
        state.sessions.subscribe_group(session_id, &msg.chat_id);
    }
    reply(
        state,
        &msg.chat_id,
        &format!("Attached `{session_id}`. Messages here go to its stdin."),
    )
    .await;

    // Offer a history load.
    if let Some(channel) = state.channel_for_chat(&msg.chat_id) {
        let options = vec!["Yes, show recent".to_string(), "No".to_string()];
        if let Ok(created) = channel
            .send_poll(&msg.chat_id, "Load recent messages?", &options, false)
            .await
        {
            state.sessions.put_flow(
                created.poll_id,
                PendingFlow::RecentMessagesPoll {
                    session_id: session_id.to_string(),
                    chat_id: msg.chat_id.clone(),
                    message_id: created.message_id,
                },
            );
        }
    }
}

async fn handle_detach(state: &Arc<AppState>, msg: &InboundMessage) {
    let text = if state.sessions.detach(&msg.chat_id) {
        "Detached."
    } else {
        "Nothing attached here."
    };
    reply(state, &msg.chat_id, text).await;
}

async fn handle_stop_kill(state: &Arc<AppState>, msg: &InboundMessage, kill: bool) {
    let Some(session_id) = resolve_session(state, msg, true).await else {
        return;
    };
    let ok = if kill {
        state.sessions.request_remote_kill(&session_id)
    } else {
        state.sessions.request_remote_stop(&session_id)
    };
    let text = match (ok, kill) {
        (true, true) => "Kill requested ☠️",
        (true, false) => "Stop requested — sending Ctrl-C.",
        (false, _) => "That session already exited.",
    };
    reply(state, &msg.chat_id, text).await;
}

async fn handle_restart(state: &Arc<AppState>, msg: &InboundMessage) {
    let Some(session_id) = resolve_session(state, msg, true).await else {
        return;
    };
    let Some(session) = state.sessions.get(&session_id) else { return };
    let Some(tool) = session.command.first().and_then(|c| Tool::from_argv0(c)) else {
        reply(state, &msg.chat_id, "Cannot tell which tool this session runs.").await;
        return;
    };

    let args: Vec<String> = session.command.iter().skip(1).cloned().collect();
    match extract_resume_ref(tool, &args) {
        Some(session_ref) if is_safe_session_ref(&session_ref) => {
            state.sessions.request_remote_resume(&session_id, session_ref);
            reply(state, &msg.chat_id, "Restarting with the same session…").await;
        }
        Some(_) => {
            reply(state, &msg.chat_id, "Invalid session reference.").await;
        }
        None => {
            reply(
                state,
                &msg.chat_id,
                "No resume reference on this session's command line — use /resume.",
            )
            .await;
        }
    }
}

async fn handle_background_jobs(state: &Arc<AppState>, msg: &InboundMessage) {
    let Some(session_id) = resolve_session(state, msg, true).await else {
        return;
    };
    let jobs = state.sessions.background_jobs(&session_id);
    if jobs.is_empty() {
        reply(state, &msg.chat_id, "No background jobs tracked.").await;
        return;
    }
    let mut out = String::from("Background jobs:");
    for job in &jobs {
        let status = match job.status {
            tg_sessions::JobStatus::Running => "▶",
            tg_sessions::JobStatus::Completed => "✅",
            tg_sessions::JobStatus::Failed => "❌",
            tg_sessions::JobStatus::Killed => "☠️",
        };
        out.push_str(&format!(
            "\n{status} `{}` {}",
            job.task_id,
            job.command.as_deref().unwrap_or("")
        ));
        for url in &job.urls {
            out.push_str(&format!(" {url}"));
        }
    }
    reply(state, &msg.chat_id, &out).await;
}

/// Free-form text → session stdin, with mention consumption and the
/// open-approval-poll "Other" path.
async fn handle_stdin(state: &Arc<AppState>, msg: &InboundMessage, text: &str) {
    let Some(session_id) = resolve_session(state, msg, true).await else {
        return;
    };
    if !state
        .sessions
        .can_user_access_session(&msg.user_id, &session_id)
    {
        reply(state, &msg.chat_id, "Only the session owner can drive it.").await;
        return;
    }

    let payload = match state
        .sessions
        .consume_pending_file_mentions(&session_id, &msg.chat_id, &msg.user_id)
    {
        Some(mentions) if !mentions.is_empty() => {
            format!("{} - {}", mentions.join(" "), text)
        }
        _ => text.to_string(),
    };

    // Plain text while an approval poll is open is the free-form "Other"
    // answer: the sentinel first, then the text, then the poll closes.
    if let Some((poll_id, poll_chat, message_id)) =
        state.sessions.open_approval_poll(&session_id)
    {
        state.sessions.queue_input(&session_id, "POLL_OTHER".into());
        state.sessions.queue_input(&session_id, payload);
        state.sessions.take_flow(&poll_id);
        if let Some(channel) = state.channel_for_chat(&poll_chat) {
            let _ = channel.close_poll(&poll_chat, &message_id).await;
        }
        return;
    }

    if !state.sessions.queue_input(&session_id, payload) {
        reply(state, &msg.chat_id, "That session already exited.").await;
    }
}

/// Resolve which session a chat message targets: the attached session,
/// else the user's sole session in a DM, else ask.
async fn resolve_session(
    state: &Arc<AppState>,
    msg: &InboundMessage,
    prompt_if_missing: bool,
) -> Option<String> {
    if let Some(session_id) = state.sessions.session_for_chat(&msg.chat_id) {
        return Some(session_id);
    }
    if !msg.is_group {
        let owned = state.sessions.sessions_owned_by(&msg.user_id);
        if owned.len() == 1 {
            return Some(owned[0].clone());
        }
    }
    if prompt_if_missing {
        reply(
            state,
            &msg.chat_id,
            "No session attached here — /sessions lists them, /attach picks one.",
        )
        .await;
    }
    None
}

/// Handle a poll/keyboard answer against its pending flow.
pub async fn route_poll_answer(state: &Arc<AppState>, answer: PollAnswer) {
    let Some(flow) = state.sessions.take_flow(&answer.poll_id) else {
        debug!(poll = %answer.poll_id, "answer for unknown poll");
        return;
    };

    match flow {
        PendingFlow::ApprovalPoll {
            session_id,
            chat_id,
            message_id,
            ..
        } => {
            let Some(&choice) = answer.option_ids.first() else { return };
            state
                .sessions
                .queue_input(&session_id, format!("POLL:{choice}:false"));
            if let Some(channel) = state.channel_for_chat(&chat_id) {
                let _ = channel.close_poll(&chat_id, &message_id).await;
            }
        }

        PendingFlow::QuestionSet {
            session_id,
            chat_id,
            questions,
            index,
            message_id,
        } => {
            let multi = questions.get(index).map(|q| q.multi_select).unwrap_or(false);
            let ids: Vec<String> = answer.option_ids.iter().map(usize::to_string).collect();
            state
                .sessions
                .queue_input(&session_id, format!("POLL:{}:{}", ids.join(","), multi));
            if multi {
                state.sessions.queue_input(&session_id, "POLL_SUBMIT".into());
            }
            if let Some(channel) = state.channel_for_chat(&chat_id) {
                let _ = channel.close_poll(&chat_id, &message_id).await;
            }
            if index + 1 < questions.len() {
                send_question_poll(state, &session_id, &chat_id, questions, index + 1).await;
            }
        }

        PendingFlow::FilePicker {
            session_id,
            chat_id,
            user_id,
            files,
            page,
            mut selected,
            message_id,
        } => {
            let (picked, wants_more) = resolve_page_answer(files.len(), page, &answer.option_ids);
            for index in picked {
                if let Some(file) = files.get(index) {
                    if !selected.contains(file) {
                        selected.push(file.clone());
                    }
                }
            }
            if let Some(channel) = state.channel_for_chat(&chat_id) {
                let _ = channel.close_poll(&chat_id, &message_id).await;
            }
            if wants_more {
                let fake_msg = InboundMessage {
                    user_id: user_id.clone(),
                    chat_id: chat_id.clone(),
                    username: None,
                    text: String::new(),
                    file_paths: vec![],
                    is_group: chat_id.is_topic(),
                    chat_title: None,
                    topic_title: None,
                    reply_to_ref: None,
                };
                send_file_picker(state, &session_id, &fake_msg, files, page + 1, selected).await;
                return;
            }
            if selected.is_empty() {
                return;
            }
            let count = selected.len();
            state
                .sessions
                .set_pending_file_mentions(&session_id, &chat_id, &user_id, selected);
            reply(
                state,
                &chat_id,
                &format!("📎 {count} file(s) will be prefixed to your next message."),
            )
            .await;
        }

        PendingFlow::ResumePicker {
            chat_id,
            user_id,
            tool,
            candidates,
            message_id,
            page,
            ..
        } => {
            if let Some(channel) = state.channel_for_chat(&chat_id) {
                let _ = channel.close_poll(&chat_id, &message_id).await;
            }
            let (picked, _) = resolve_page_answer(candidates.len(), page, &answer.option_ids);
            let Some(&index) = picked.first() else { return };
            let Some(path) = candidates.get(index) else { return };
            let Some(tool) = Tool::from_argv0(&tool) else { return };
            let Some(session_ref) = resume_ref_for(tool, std::path::Path::new(path)) else {
                reply(state, &chat_id, "Could not derive a session reference.").await;
                return;
            };
            if !is_safe_session_ref(&session_ref) {
                reply(state, &chat_id, "Invalid session reference.").await;
                return;
            }
            // Resume targets the session attached to this chat, or the
            // user's sole session.
            let target = state.sessions.session_for_chat(&chat_id).or_else(|| {
                let owned = state.sessions.sessions_owned_by(&user_id);
                (owned.len() == 1).then(|| owned[0].clone())
            });
            match target {
                Some(session_id) => {
                    state.sessions.request_remote_resume(&session_id, session_ref);
                    reply(state, &chat_id, "Resuming…").await;
                }
                None => reply(state, &chat_id, "No session to resume into.").await,
            }
        }

        PendingFlow::OutputModePicker { chat_id, message_id } => {
            if let Some(channel) = state.channel_for_chat(&chat_id) {
                let _ = channel.close_poll(&chat_id, &message_id).await;
            }
            let mode = match answer.option_ids.first() {
                Some(0) => OutputMode::Compact,
                Some(1) => OutputMode::Verbose,
                _ => return,
            };
            let _ = state.update_config(|c| {
                c.chat_preferences
                    .entry(chat_id.as_str().to_string())
                    .or_default()
                    .output_mode = Some(mode);
            });
            let text = match mode {
                OutputMode::Compact => "Simple output: one-liners, no noise.",
                OutputMode::Verbose => "Verbose output: every call and result.",
            };
            reply(state, &chat_id, text).await;
        }

        PendingFlow::RemoteControlPicker {
            chat_id,
            user_id,
            session_ids,
            message_id,
        } => {
            if let Some(channel) = state.channel_for_chat(&chat_id) {
                let _ = channel.close_poll(&chat_id, &message_id).await;
            }
            let Some(&index) = answer.option_ids.first() else { return };
            let Some(session_id) = session_ids.get(index) else { return };
            let fake_msg = InboundMessage {
                user_id,
                chat_id: chat_id.clone(),
                username: None,
                text: String::new(),
                file_paths: vec![],
                is_group: chat_id.parent() != chat_id,
                chat_title: None,
                topic_title: None,
                reply_to_ref: None,
            };
            attach_session(state, &fake_msg, session_id).await;
        }

        PendingFlow::RecentMessagesPoll {
            session_id,
            chat_id,
            message_id,
        } => {
            if let Some(channel) = state.channel_for_chat(&chat_id) {
                let _ = channel.close_poll(&chat_id, &message_id).await;
            }
            if answer.option_ids.first() != Some(&0) {
                return;
            }
            send_recent_messages(state, &session_id, &chat_id).await;
        }
    }
}

/// Replay the tail of the session's transcript as a compact summary.
async fn send_recent_messages(state: &Arc<AppState>, session_id: &str, chat_id: &ChatId) {
    let manifest_path = state.paths.session_manifest(session_id);
    let transcript = std::fs::read_to_string(&manifest_path)
        .ok()
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
        .and_then(|m| {
            m.get("jsonlFile")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        });
    let Some(transcript) = transcript else {
        reply(state, chat_id, "No transcript recorded for this session yet.").await;
        return;
    };

    let tool = state
        .sessions
        .get(session_id)
        .and_then(|s| s.command.first().cloned())
        .and_then(|c| Tool::from_argv0(&c))
        .unwrap_or(Tool::Claude);

    let Ok(raw) = std::fs::read_to_string(&transcript) else {
        reply(state, chat_id, "Transcript is not readable.").await;
        return;
    };

    let mut parser = tg_transcript::Parser::new(tool);
    let mut texts: Vec<String> = Vec::new();
    for line in raw.lines() {
        if let Some(parsed) = parser.parse_line(line) {
            if let Some(text) = parsed.assistant_text {
                texts.push(text);
            }
        }
    }
    let tail: Vec<String> = texts.into_iter().rev().take(5).collect();
    if tail.is_empty() {
        reply(state, chat_id, "Nothing in the transcript yet.").await;
        return;
    }
    let mut out = String::from("Recent assistant messages:");
    for text in tail.into_iter().rev() {
        out.push_str("\n\n");
        out.push_str(&pickers_clip(&text, 400));
    }
    reply(state, chat_id, &out).await;
}

fn pickers_clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max).collect();
        out.push('…');
        out
    }
}

/// A chat became permanently unreachable.
pub async fn handle_dead_chat(state: &Arc<AppState>, chat_id: &ChatId, reason: &str) {
    warn!(chat = %chat_id, reason = %reason, "dead chat, detaching");
    state.sessions.detach(chat_id);
}

async fn sync_menu(state: &Arc<AppState>, msg: &InboundMessage) {
    let Some(channel) = state.channel_for_chat(&msg.chat_id) else { return };
    let ctx = MenuContext {
        chat_id: msg.chat_id.clone(),
        user_id: msg.user_id.clone(),
        paired: state.with_config(|c| c.is_paired(&msg.user_id)),
        is_group: msg.is_group,
        is_linked_group: state.with_config(|c| c.is_linked_group(&msg.chat_id)),
        has_active_session: state.sessions.session_for_chat(&msg.chat_id).is_some(),
    };
    let _ = channel.sync_command_menu(&ctx).await;
}

/// Send a markdown-ish reply to a chat.
pub async fn reply(state: &Arc<AppState>, chat_id: &ChatId, text: &str) {
    let Some(channel) = state.channel_for_chat(chat_id) else {
        debug!(chat = %chat_id, "no channel for reply");
        return;
    };
    let html = channel.formatter().from_markdown(text);
    if let Err(e) = channel.send(chat_id, &html).await {
        warn!(chat = %chat_id, error = %e, "reply failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tg_shorthand_normalizes() {
        assert_eq!(normalize_command("tg stop"), "/stop");
        assert_eq!(normalize_command("/stop"), "/stop");
        assert_eq!(normalize_command("plain text"), "plain text");
    }

    #[test]
    fn command_split() {
        assert_eq!(split_command("/files auth"), ("/files", "auth"));
        assert_eq!(split_command("/detach"), ("/detach", ""));
    }

    #[test]
    fn pair_rate_limit_exhausts_and_refills() {
        let limiter = PairRateLimiter::default();
        let user = UserId::new("telegram:1");
        assert!(limiter.allow(&user));
        assert!(limiter.allow(&user));
        assert!(limiter.allow(&user));
        assert!(!limiter.allow(&user), "fourth burst attempt must be limited");

        // A different user has their own bucket.
        assert!(limiter.allow(&UserId::new("telegram:2")));
    }
}
