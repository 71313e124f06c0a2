//! Daemon-restart recovery.
//!
//! When the input long-poll answers `{unknown:true}` (or the daemon stops
//! answering), the wrapper re-registers under its existing id, rebinds the
//! chat, and re-subscribes the groups it last saw. Registration is
//! idempotent on the id, so the daemon ends up with an identical record.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, info};

use tg_core::address::{ChatId, UserId};
use tg_core::paths::Paths;

use crate::client::{ensure_daemon, DaemonClient};

/// Backoff schedule for recovery attempts.
const BACKOFF_START: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// idle → recovering → idle. Ordinary logging quiets down while
/// recovering so a daemon bounce doesn't spam the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Idle,
    Recovering,
}

pub struct Recovery {
    pub state: RecoveryState,
}

impl Recovery {
    pub fn new() -> Self {
        Self {
            state: RecoveryState::Idle,
        }
    }

    pub fn is_recovering(&self) -> bool {
        self.state == RecoveryState::Recovering
    }

    /// Re-establish the daemon-side record. Returns a (possibly fresh)
    /// client once registration and rebinding succeed.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &mut self,
        paths: &Paths,
        session_id: &str,
        command: &[String],
        owner_dm: &ChatId,
        owner: &UserId,
        cwd: &str,
        bound_chat: Option<&ChatId>,
        groups: &[ChatId],
    ) -> DaemonClient {
        self.state = RecoveryState::Recovering;
        let mut backoff = BACKOFF_START;

        loop {
            match try_recover(
                paths, session_id, command, owner_dm, owner, cwd, bound_chat, groups,
            )
            .await
            {
                Ok(client) => {
                    info!(session = %session_id, "recovered daemon registration");
                    self.state = RecoveryState::Idle;
                    return client;
                }
                Err(e) => {
                    // Quiet: debug only, recovery is expected during
                    // daemon upgrades.
                    debug!(error = %e, "recovery attempt failed");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn try_recover(
    paths: &Paths,
    session_id: &str,
    command: &[String],
    owner_dm: &ChatId,
    owner: &UserId,
    cwd: &str,
    bound_chat: Option<&ChatId>,
    groups: &[ChatId],
) -> anyhow::Result<DaemonClient> {
    let client = ensure_daemon(paths).await?;
    client
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
    if let Some(chat) = bound_chat {
        client
            .post(
                "/remote/bind-chat",
                &json!({
                    "sessionId": session_id,
                    "chatId": chat,
                    "subscribeGroups": groups,
                }),
            )
            .await?;
    }
    Ok(client)
}
