//! HTTP client for the control server, plus ensure-daemon logic.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use serde_json::{json, Value};
use tracing::{debug, info};

use tg_core::paths::Paths;

const AUTH_HEADER: &str = "X-Touchgrass-Auth";

/// Client bound to one daemon instance.
#[derive(Clone)]
pub struct DaemonClient {
    http: reqwest::Client,
    base: String,
    secret: String,
}

impl DaemonClient {
    /// Connect using the port and secret files under `paths`.
    pub fn connect(paths: &Paths) -> anyhow::Result<Self> {
        let port: u16 = std::fs::read_to_string(paths.port_file())
            .context("daemon port file missing — is the daemon running?")?
            .trim()
            .parse()
            .context("daemon port file is corrupt")?;
        let secret = std::fs::read_to_string(paths.auth_file())
            .context("daemon auth file missing")?
            .trim()
            .to_string();
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(40))
                .build()?,
            base: format!("http://127.0.0.1:{port}"),
            secret,
        })
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<Value> {
        let response = self
            .http
            .get(format!("{}{}", self.base, path))
            .header(AUTH_HEADER, &self.secret)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        let response = self
            .http
            .post(format!("{}{}", self.base, path))
            .header(AUTH_HEADER, &self.secret)
            .json(body)
            .send()
            .await?;
        decode(response).await
    }

    /// Fire-and-forget event push; the wrapper must never stall on chat
    /// latency.
    pub fn post_event(&self, path: &str, body: Value) {
        let client = self.clone();
        let path = path.to_string();
        tokio::spawn(async move {
            if let Err(e) = client.post(&path, &body).await {
                debug!(path = %path, error = %e, "event push failed");
            }
        });
    }

    pub async fn health(&self) -> anyhow::Result<Value> {
        let response = self
            .http
            .get(format!("{}/health", self.base))
            .timeout(Duration::from_secs(2))
            .send()
            .await?;
        decode(response).await
    }
}

async fn decode(response: reqwest::Response) -> anyhow::Result<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .unwrap_or_else(|_| json!({ "ok": false, "error": "non-JSON response" }));
    if !status.is_success() {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("request failed");
        bail!("{status}: {message}");
    }
    Ok(body)
}

/// Locate the `tg-daemon` binary: next to the current exe, else on PATH.
fn daemon_binary() -> anyhow::Result<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        let sibling = exe.with_file_name("tg-daemon");
        if sibling.is_file() {
            return Ok(sibling);
        }
    }
    which::which("tg-daemon").map_err(|_| anyhow!("tg-daemon binary not found"))
}

/// Make sure a healthy daemon is running and return a client for it.
///
/// If the running daemon predates the installed binary and has no active
/// sessions, it is shut down and respawned so code updates take effect.
pub async fn ensure_daemon(paths: &Paths) -> anyhow::Result<DaemonClient> {
    if let Ok(client) = DaemonClient::connect(paths) {
        if let Ok(health) = client.health().await {
            if !should_replace(paths, &health, &client).await {
                return Ok(client);
            }
            info!("daemon binary is newer and idle — restarting daemon");
            let _ = client.post("/shutdown", &json!({})).await;
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
    }

    spawn_daemon(paths)?;

    // Wait for the health endpoint to come up.
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        if let Ok(client) = DaemonClient::connect(paths) {
            if client.health().await.is_ok() {
                return Ok(client);
            }
        }
    }
    bail!("daemon did not become healthy within 10s");
}

/// The daemon should be replaced when its code on disk is newer than its
/// `startedAt` and nothing is depending on it right now.
async fn should_replace(paths: &Paths, health: &Value, client: &DaemonClient) -> bool {
    let Some(started_at) = health
        .get("startedAt")
        .and_then(Value::as_str)
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
    else {
        return false;
    };
    let Ok(binary) = daemon_binary() else { return false };
    let Ok(modified) = std::fs::metadata(&binary).and_then(|m| m.modified()) else {
        return false;
    };
    let modified: chrono::DateTime<chrono::Utc> = modified.into();
    if modified <= started_at {
        return false;
    }

    // Only replace an idle daemon — never orphan live wrappers.
    let _ = paths;
    match client.get("/status").await {
        Ok(status) => status
            .get("sessions")
            .and_then(Value::as_array)
            .map(|s| s.is_empty())
            .unwrap_or(false),
        Err(_) => false,
    }
}

fn spawn_daemon(paths: &Paths) -> anyhow::Result<()> {
    let binary = daemon_binary()?;
    info!(binary = %binary.display(), "starting daemon");
    std::process::Command::new(binary)
        .env("TOUCHGRASS_HOME", paths.home())
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context("failed to spawn tg-daemon")?;
    Ok(())
}
