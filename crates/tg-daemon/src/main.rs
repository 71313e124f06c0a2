//! The touchgrass daemon: control HTTP server, chat pollers, output
//! pipeline, and session registry. One daemon per `TOUCHGRASS_HOME`.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tg_channels::channel::Channel;
use tg_channels::types::ChannelEvent;
use tg_core::config::{ChannelType, Config};
use tg_core::pairing::PairingCodes;
use tg_core::paths::{write_executable, write_private, Paths};
use tg_sessions::SessionManager;
use tg_telegram::TelegramAdapter;

mod app;
mod auth;
mod boards;
mod error;
mod http;
mod lock;
mod pickers;
mod pipeline;
mod router;

use app::AppState;

/// Sessions whose wrapper has not polled for this long are reaped.
const SESSION_TTL: Duration = Duration::from_secs(15 * 60);
/// Reaper sweep cadence.
const REAP_INTERVAL: Duration = Duration::from_secs(60);
/// Uploads-directory sweep cadence.
const UPLOADS_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = Paths::resolve()?;
    paths.ensure_dirs()?;
    init_logging(&paths)?;

    let _lock = lock::DaemonLock::acquire(&paths)?;
    lock::sweep_duplicate_daemons(&paths).await;

    let config = Config::load(&paths).unwrap_or_else(|e| {
        warn!(error = %e, "config load failed, starting with defaults");
        Config::default()
    });
    let secret = auth::load_or_create_secret(&paths)?;

    let channels = build_channels(&config, &paths);
    if channels.is_empty() {
        warn!("no chat channels configured; run `tg setup` to add one");
    }

    let settings = config.settings.clone();
    let state = Arc::new(AppState {
        paths: paths.clone(),
        config: RwLock::new(config),
        started_at: chrono::Utc::now().to_rfc3339(),
        pid: std::process::id(),
        secret,
        sessions: SessionManager::new(settings.max_sessions),
        channels,
        pairing: PairingCodes::new(),
        boards: boards::BoardStore::load(&paths),
        batcher: pipeline::batch::OutputBatcher::new(
            settings.output_batch_min_ms,
            settings.output_batch_max_ms,
            settings.output_buffer_max_chars,
        ),
        shutdown: CancellationToken::new(),
    });

    install_claude_hook_script(&paths);

    // Inbound channel events: one consumer task fed by every poller.
    let (event_tx, event_rx) = mpsc::channel::<ChannelEvent>(256);
    for channel in &state.channels {
        if let Err(e) = channel.start_receiving(event_tx.clone()).await {
            error!(channel = channel.name(), error = %e, "poller failed to start");
        }
    }
    tokio::spawn(run_event_loop(Arc::clone(&state), event_rx));
    tokio::spawn(run_reaper(Arc::clone(&state)));
    tokio::spawn(run_uploads_sweeper(paths.clone()));

    // SIGINT/SIGTERM funnel into the same graceful shutdown as POST
    // /shutdown.
    {
        let shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
        });
    }
    #[cfg(unix)]
    {
        let shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            let Ok(mut sigterm) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            else {
                return;
            };
            sigterm.recv().await;
            shutdown.cancel();
        });
    }

    // Loopback only; the OS picks the port and we publish it.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    write_private(&paths.port_file(), port.to_string().as_bytes())?;
    info!(port, pid = state.pid, "touchgrass daemon listening");

    let router = http::build_router(Arc::clone(&state));
    let shutdown = state.shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    // Quiesce: stop pollers, drop the port file.
    for channel in &state.channels {
        channel.stop_receiving().await;
    }
    let _ = std::fs::remove_file(paths.port_file());
    info!("daemon stopped");
    Ok(())
}

fn init_logging(paths: &Paths) -> anyhow::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths.log_file())?;
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tg_daemon=info,tg_telegram=info,tg_sessions=info".into()),
        )
        .with_writer(std::sync::Mutex::new(file))
        .init();
    Ok(())
}

/// Instantiate an adapter per configured channel entry with credentials.
fn build_channels(config: &Config, paths: &Paths) -> Vec<Arc<dyn Channel>> {
    let mut out: Vec<Arc<dyn Channel>> = Vec::new();
    for (name, entry) in &config.channels {
        match entry.channel_type {
            ChannelType::Telegram => {
                let Some(token) = entry.credentials.bot_token.as_deref() else {
                    warn!(channel = name, "telegram entry has no bot token, skipping");
                    continue;
                };
                out.push(Arc::new(TelegramAdapter::new(
                    name.clone(),
                    token,
                    entry.credentials.bot_username.clone(),
                    paths.clone(),
                )));
            }
            ChannelType::Slack => {
                // The Slack adapter ships separately; entries are kept in
                // config so setup can round-trip them.
                warn!(channel = name, "slack adapter not bundled in this build");
            }
            ChannelType::Internal => {}
        }
    }
    out
}

async fn run_event_loop(state: Arc<AppState>, mut rx: mpsc::Receiver<ChannelEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ChannelEvent::Message(msg) => router::route_message(&state, msg).await,
            ChannelEvent::PollAnswer(answer) => router::route_poll_answer(&state, answer).await,
            ChannelEvent::DeadChat { chat_id, reason } => {
                router::handle_dead_chat(&state, &chat_id, &reason).await
            }
            ChannelEvent::PollerStopped { reason } => {
                // Fatal for that adapter; the daemon itself stays up.
                error!(reason = %reason, "a channel poller stopped");
            }
        }
    }
}

async fn run_reaper(state: Arc<AppState>) {
    let mut tick = tokio::time::interval(REAP_INTERVAL);
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => return,
            _ = tick.tick() => {}
        }
        for reaped in state.sessions.reap_stale_remotes(SESSION_TTL) {
            for chat in &reaped.attached_chats {
                router::reply(
                    &state,
                    chat,
                    &format!("Session `{}` went quiet and was detached.", reaped.session.id),
                )
                .await;
            }
        }
    }
}

async fn run_uploads_sweeper(paths: Paths) {
    let mut tick = tokio::time::interval(UPLOADS_SWEEP_INTERVAL);
    loop {
        tick.tick().await;
        match tg_core::paths::sweep_uploads(&paths) {
            Ok(0) => {}
            Ok(n) => info!(removed = n, "swept expired uploads"),
            Err(e) => warn!(error = %e, "uploads sweep failed"),
        }
    }
}

/// Write the hook script Claude Code is pointed at. It forwards hook JSON
/// to `/hook/<session-id>` with the shared secret.
fn install_claude_hook_script(paths: &Paths) {
    let script = r#"#!/usr/bin/env bash
# Forwards Claude Code hook events to the touchgrass daemon.
# Wire into Claude settings as: claude-hooks.sh <touchgrass-session-id>
set -euo pipefail
HOME_DIR="${TOUCHGRASS_HOME:-$HOME/.touchgrass}"
PORT="$(cat "$HOME_DIR/daemon.port")"
AUTH="$(cat "$HOME_DIR/daemon.auth")"
exec curl -fsS -m 5 -X POST "http://127.0.0.1:${PORT}/hook/$1" \
  -H "X-Touchgrass-Auth: ${AUTH}" \
  -H 'Content-Type: application/json' \
  --data-binary @-
"#;
    if let Err(e) = write_executable(&paths.claude_hook_script(), script.as_bytes()) {
        warn!(error = %e, "failed to install claude hook script");
    }
}
