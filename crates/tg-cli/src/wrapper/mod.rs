//! The wrapper: `tg <tool> [args…]`.
//!
//! Owns the PTY, discovers and tails the tool's transcript, scans for
//! approval prompts, and long-polls the daemon for queued input and
//! control actions. A resume control action kills the tool and loops with
//! a rewritten argv.

pub mod input;
pub mod manifest;
pub mod preflight;
pub mod prompt;
pub mod pty;
pub mod recovery;
pub mod tail;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use notify::Watcher;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tg_core::address::{ChatId, UserId};
use tg_core::config::Config;
use tg_core::paths::Paths;
use tg_transcript::discover::Discovery;
use tg_transcript::resume::{build_resume_command_args, extract_resume_ref};
use tg_transcript::tool::Tool;
use tg_transcript::ParsedLine;

use crate::client::{ensure_daemon, DaemonClient};
use input::{keys_for, InputLine};
use manifest::Manifest;
use prompt::{detect, patterns_for, PROMPT_DEBOUNCE_MS};
use pty::{local_winsize, spawn_caffeinate, spawn_stdin_forwarder, PtyHandle, RawModeGuard};
use recovery::Recovery;
use tail::{
    await_new_transcript, find_rollover, snapshot_existing, transcript_for_resume, Tailer,
    TAIL_FALLBACK_POLL,
};

/// Delay between Ctrl-C/SIGINT and the follow-up SIGKILL on a kill action.
const KILL_ESCALATION: Duration = Duration::from_millis(1_500);

pub async fn run_tool(
    tool_name: &str,
    args: Vec<String>,
    channel_selector: Option<String>,
) -> anyhow::Result<i32> {
    let tool = Tool::from_argv0(tool_name)
        .with_context(|| format!("unsupported tool: {tool_name}"))?;
    let paths = Paths::resolve()?;
    paths.ensure_dirs()?;

    let config = Config::load(&paths)?;
    let check = preflight::check_config(&config);
    if !check.ok {
        bail!("{}", check.message);
    }
    preflight::check_tool_version(tool)?;

    let owner = first_paired_user(&config)
        .context("no paired user — run `tg pair` and /pair the bot")?;
    let owner_dm = ChatId::new(owner.as_str());
    let cwd = std::env::current_dir()?
        .to_str()
        .context("cwd is not valid UTF-8")?
        .to_string();

    let mut client = ensure_daemon(&paths).await?;
    let bind_chat = resolve_channel(&client, channel_selector.as_deref(), &owner_dm).await?;

    let mut argv = args;
    let mut session_id: Option<String> = None;
    loop {
        let mut command = vec![tool_name.to_string()];
        command.extend(argv.iter().cloned());

        let registered = client
            .post(
                "/remote/register",
                &json!({
                    "command": command,
                    "chatId": owner_dm,
                    "ownerUserId": owner,
                    "cwd": cwd,
                    "existingId": session_id,
                }),
            )
            .await?;
        let sid = registered
            .pointer("/session/id")
            .and_then(Value::as_str)
            .context("daemon returned no session id")?
            .to_string();
        session_id = Some(sid.clone());

        if let Some(ref chat) = bind_chat {
            client
                .post(
                    "/remote/bind-chat",
                    &json!({ "sessionId": sid, "chatId": chat, "subscribeGroups": [] }),
                )
                .await?;
        }

        let mut man = Manifest {
            id: sid.clone(),
            command: command.clone(),
            cwd: cwd.clone(),
            pid: std::process::id(),
            jsonl_file: None,
            started_at: chrono::Utc::now().to_rfc3339(),
        };
        man.write(&paths)?;

        let (exit_code, resumed_client, pending_resume) = run_session(SessionSetup {
            paths: &paths,
            client,
            tool,
            tool_name,
            argv: &argv,
            session_id: &sid,
            owner_dm: &owner_dm,
            owner: &owner,
            cwd: &cwd,
            bind_chat: bind_chat.as_ref(),
            manifest: &mut man,
        })
        .await?;
        client = resumed_client;

        let _ = client
            .post(&format!("/remote/{sid}/exit"), &json!({ "exitCode": exit_code }))
            .await;
        Manifest::remove(&paths, &sid);

        match pending_resume {
            Some(next_argv) => {
                info!(?next_argv, "restarting tool with resume argv");
                argv = next_argv;
            }
            None => return Ok(exit_code),
        }
    }
}

fn first_paired_user(config: &Config) -> Option<UserId> {
    config
        .channels
        .values()
        .flat_map(|c| c.paired_users.iter())
        .map(|p| p.user_id.clone())
        .next()
}

/// Resolve `--channel` against the daemon's advertised chats: exact
/// address, then case-insensitive title substring (single match required),
/// `dm` for the owner DM, `none` for no binding.
async fn resolve_channel(
    client: &DaemonClient,
    selector: Option<&str>,
    owner_dm: &ChatId,
) -> anyhow::Result<Option<ChatId>> {
    let selector = match selector {
        None => return Ok(Some(owner_dm.clone())),
        Some(s) => s.trim(),
    };
    match selector {
        "none" => return Ok(None),
        "dm" => return Ok(Some(owner_dm.clone())),
        _ => {}
    }

    let body = client.get("/channels").await?;
    let chats = body
        .get("chats")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    // Exact address match first.
    for chat in &chats {
        if chat.get("chatId").and_then(Value::as_str) == Some(selector) {
            return Ok(Some(ChatId::new(selector)));
        }
    }

    // Case-insensitive title substring; ambiguity is an error.
    let needle = selector.to_lowercase();
    let matches: Vec<&Value> = chats
        .iter()
        .filter(|c| {
            c.get("title")
                .and_then(Value::as_str)
                .map(|t| t.to_lowercase().contains(&needle))
                .unwrap_or(false)
        })
        .collect();
    match matches.len() {
        0 => bail!("--channel {selector:?} matches no visible chat"),
        1 => Ok(Some(ChatId::new(
            matches[0]
                .get("chatId")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        ))),
        n => bail!("--channel {selector:?} is ambiguous ({n} chats match)"),
    }
}

struct SessionSetup<'a> {
    paths: &'a Paths,
    client: DaemonClient,
    tool: Tool,
    tool_name: &'a str,
    argv: &'a [String],
    session_id: &'a str,
    owner_dm: &'a ChatId,
    owner: &'a UserId,
    cwd: &'a str,
    bind_chat: Option<&'a ChatId>,
    manifest: &'a mut Manifest,
}

/// Run one tool lifetime inside the PTY. Returns the exit code, the
/// (possibly recovered) client, and a rewritten argv when a resume was
/// requested.
async fn run_session(
    setup: SessionSetup<'_>,
) -> anyhow::Result<(i32, DaemonClient, Option<Vec<String>>)> {
    let SessionSetup {
        paths,
        mut client,
        tool,
        tool_name,
        argv,
        session_id,
        owner_dm,
        owner,
        cwd,
        bind_chat,
        manifest,
    } = setup;

    let discovery = Discovery::new().context("cannot resolve home directory")?;
    let resume_ref = extract_resume_ref(tool, argv);
    let preexisting = snapshot_existing(&discovery, tool, cwd);

    let _raw = RawModeGuard::enable();
    let pty = Arc::new(PtyHandle::spawn(tool_name, argv, cwd)?);
    if let Some(pid) = pty.child_pid() {
        spawn_caffeinate(pid);
    }
    spawn_stdin_forwarder(Arc::clone(&pty.writer));

    let cancel = CancellationToken::new();

    // PTY → local stdout, verbatim.
    {
        let mut output_rx = pty
            .output_rx
            .lock()
            .unwrap()
            .take()
            .context("pty output already taken")?;
        tokio::spawn(async move {
            use std::io::Write;
            let mut stdout = std::io::stdout();
            while let Some(chunk) = output_rx.recv().await {
                let _ = stdout.write_all(&chunk);
                let _ = stdout.flush();
            }
        });
    }

    // SIGWINCH → PTY resize.
    #[cfg(unix)]
    {
        let pty = Arc::clone(&pty);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let Ok(mut winch) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change())
            else {
                return;
            };
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    s = winch.recv() => {
                        if s.is_none() { break; }
                        let (cols, rows) = local_winsize();
                        pty.resize(cols, rows);
                    }
                }
            }
        });
    }

    // Transcript discovery + tailing.
    {
        let client = client.clone();
        let cancel = cancel.clone();
        let discovery = discovery.clone();
        let cwd = cwd.to_string();
        let session_id = session_id.to_string();
        let paths = paths.clone();
        let mut manifest = manifest.clone();
        let resume_ref = resume_ref.clone();
        tokio::spawn(async move {
            let preselected = resume_ref
                .as_deref()
                .and_then(|r| transcript_for_resume(&discovery, tool, &cwd, r));
            let path = match preselected {
                Some(path) => Some(path),
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        found = await_new_transcript(&discovery, tool, &cwd, &preexisting) => found,
                    }
                }
            };
            let Some(path) = path else {
                warn!("no transcript appeared; chat will only see PTY prompts");
                return;
            };
            let _ = manifest.set_transcript(&paths, &path);

            let (watch_tx, mut watch_rx) = mpsc::channel::<()>(4);
            let mut watcher = notify::recommended_watcher(move |_res| {
                let _ = watch_tx.try_send(());
            })
            .ok();
            if let (Some(watcher), Some(dir)) = (watcher.as_mut(), path.parent()) {
                let _ = watcher.watch(dir, notify::RecursiveMode::NonRecursive);
            }

            let mut tailer = Tailer::new(tool, path);
            let mut checked_rollovers = HashSet::new();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = watch_rx.recv() => {}
                    _ = tokio::time::sleep(TAIL_FALLBACK_POLL) => {}
                }
                for parsed in tailer.drain() {
                    push_events(&client, &session_id, parsed);
                }
                // Claude rolls the transcript over mid-session.
                if tool == Tool::Claude {
                    if let Some(active) = tailer.active_session_id.clone() {
                        if let Some(newer) = find_rollover(
                            &discovery,
                            tool,
                            &cwd,
                            tailer.path(),
                            &active,
                            &mut checked_rollovers,
                        ) {
                            for parsed in tailer.drain() {
                                push_events(&client, &session_id, parsed);
                            }
                            tailer.switch_to(newer);
                        }
                    }
                }
            }
        });
    }

    // Approval-prompt scanning (hooks cover Claude).
    if let Some(patterns) = patterns_for(tool) {
        let client = client.clone();
        let cancel = cancel.clone();
        let scan = Arc::clone(&pty.scan_buffer);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            let mut last_prompt: Option<String> = None;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                }
                let snapshot = scan.lock().unwrap().clone();
                let Some(found) = detect(&snapshot, &patterns) else { continue };
                if last_prompt.as_deref() == Some(found.prompt.as_str()) {
                    continue;
                }
                // Let the dialog finish drawing, then re-verify.
                tokio::time::sleep(Duration::from_millis(PROMPT_DEBOUNCE_MS)).await;
                let snapshot = scan.lock().unwrap().clone();
                if detect(&snapshot, &patterns).as_ref() != Some(&found) {
                    continue;
                }
                last_prompt = Some(found.prompt.clone());
                client.post_event(
                    &format!("/remote/{session_id}/approval-needed"),
                    json!({ "prompt": found.prompt, "options": found.options, "multi": false }),
                );
            }
        });
    }

    // The tool's exit, off-thread.
    let mut exit_rx = {
        let pty = Arc::clone(&pty);
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let _ = tx.send(pty.wait());
        });
        rx
    };

    // Input long-poll loop.
    let mut recovery = Recovery::new();
    let mut pending_resume: Option<Vec<String>> = None;
    let mut known_groups: Vec<ChatId> = Vec::new();

    let exit_code = loop {
        // The poll future owns a clone so recovery can swap `client`.
        let poll_client = client.clone();
        let poll = async move {
            poll_client
                .get(&format!("/remote/{session_id}/input"))
                .await
        };
        tokio::select! {
            code = &mut exit_rx => {
                break code.unwrap_or(1);
            }
            polled = poll => {
                match polled {
                    Ok(body) => {
                        if body.get("unknown").and_then(Value::as_bool).unwrap_or(false) {
                            client = recovery
                                .run(paths, session_id, &full_command(tool_name, argv),
                                     owner_dm, owner, cwd, bind_chat, &known_groups)
                                .await;
                            continue;
                        }
                        if let Some(groups) = body.get("groups").and_then(Value::as_array) {
                            known_groups = groups
                                .iter()
                                .filter_map(Value::as_str)
                                .map(ChatId::new)
                                .collect();
                        }
                        if let Some(action) = body.get("controlAction").filter(|v| !v.is_null()) {
                            handle_control_action(&pty, tool, argv, action, &mut pending_resume);
                        }
                        let lines = body
                            .get("input")
                            .and_then(Value::as_array)
                            .cloned()
                            .unwrap_or_default();
                        for raw in lines.iter().filter_map(Value::as_str) {
                            let line = InputLine::parse(raw);
                            let keys = keys_for(&line);
                            if !keys.is_empty() {
                                if let Err(e) = pty.write_bytes(&keys) {
                                    warn!(error = %e, "pty write failed");
                                }
                            }
                            if matches!(line, InputLine::Text(_)) {
                                client.post_event(
                                    &format!("/remote/{session_id}/typing"),
                                    json!({ "active": true }),
                                );
                            }
                        }
                    }
                    Err(e) if !recovery.is_recovering() => {
                        debug!(error = %e, "input poll failed, entering recovery");
                        client = recovery
                            .run(paths, session_id, &full_command(tool_name, argv),
                                 owner_dm, owner, cwd, bind_chat, &known_groups)
                            .await;
                    }
                    Err(_) => {}
                }
            }
        }
    };

    cancel.cancel();
    Ok((exit_code, client, pending_resume))
}

fn full_command(tool_name: &str, argv: &[String]) -> Vec<String> {
    let mut out = vec![tool_name.to_string()];
    out.extend(argv.iter().cloned());
    out
}

/// Act on a control action from the daemon.
fn handle_control_action(
    pty: &Arc<PtyHandle>,
    tool: Tool,
    argv: &[String],
    action: &Value,
    pending_resume: &mut Option<Vec<String>>,
) {
    match action.get("action").and_then(Value::as_str) {
        Some("stop") => {
            let _ = pty.write_bytes(b"\x03");
        }
        Some("kill") => {
            let _ = pty.write_bytes(b"\x03");
            pty.send_sigint();
            let pty = Arc::clone(pty);
            tokio::spawn(async move {
                tokio::time::sleep(KILL_ESCALATION).await;
                pty.send_sigkill();
            });
        }
        Some("resume") => {
            let Some(session_ref) = action.get("session_ref").and_then(Value::as_str) else {
                return;
            };
            match build_resume_command_args(tool, argv, session_ref) {
                Ok(next_argv) => {
                    *pending_resume = Some(next_argv);
                    pty.send_sigkill();
                }
                Err(e) => warn!(error = %e, "resume rejected"),
            }
        }
        other => debug!(?other, "unknown control action"),
    }
}

/// Forward one parsed transcript line to the daemon as events.
fn push_events(client: &DaemonClient, session_id: &str, parsed: ParsedLine) {
    if let Some(text) = parsed.assistant_text {
        client.post_event(&format!("/remote/{session_id}/assistant"), json!({ "text": text }));
    }
    if let Some(text) = parsed.thinking {
        client.post_event(&format!("/remote/{session_id}/thinking"), json!({ "text": text }));
    }
    if !parsed.questions.is_empty() {
        client.post_event(
            &format!("/remote/{session_id}/question"),
            json!({ "questions": parsed.questions }),
        );
    }
    for call in parsed.tool_calls {
        client.post_event(
            &format!("/remote/{session_id}/tool-call"),
            serde_json::to_value(&call).unwrap_or_default(),
        );
    }
    for result in parsed.tool_results {
        if !result.should_forward() {
            continue;
        }
        client.post_event(
            &format!("/remote/{session_id}/tool-result"),
            serde_json::to_value(&result).unwrap_or_default(),
        );
    }
    for job in parsed.background_jobs {
        client.post_event(
            &format!("/remote/{session_id}/background-job"),
            serde_json::to_value(&job).unwrap_or_default(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_command_prefixes_tool() {
        assert_eq!(
            full_command("claude", &["--resume".into(), "x".into()]),
            vec!["claude", "--resume", "x"]
        );
    }
}
