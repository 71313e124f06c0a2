//! Thin CLI subcommands over the control server.

use std::io::{BufRead, Seek, SeekFrom};

use anyhow::{bail, Context};
use serde_json::{json, Value};

use tg_core::config::{ChannelEntry, ChannelType, Config, Credentials};
use tg_core::paths::Paths;

use crate::client::{ensure_daemon, DaemonClient};

pub async fn setup(
    telegram: Option<String>,
    slack: Option<String>,
    slack_app_token: Option<String>,
    channel: Option<String>,
    list_channels: bool,
    show: bool,
) -> anyhow::Result<i32> {
    let paths = Paths::resolve()?;
    paths.ensure_dirs()?;
    let mut config = Config::load(&paths)?;

    if list_channels {
        for (name, entry) in &config.channels {
            println!("{name} ({})", entry.channel_type.as_str());
        }
        return Ok(0);
    }
    if show {
        for (name, entry) in &config.channels {
            let token = entry
                .credentials
                .bot_token
                .as_deref()
                .map(|t| format!("{}…", &t[..t.len().min(6)]))
                .unwrap_or_else(|| "(none)".into());
            println!(
                "{name}: type={} token={token} paired={} groups={}",
                entry.channel_type.as_str(),
                entry.paired_users.len(),
                entry.linked_groups.len()
            );
        }
        return Ok(0);
    }

    let mut changed = false;
    if let Some(token) = telegram {
        let name = channel.clone().unwrap_or_else(|| "telegram".into());
        upsert_channel(&mut config, &name, ChannelType::Telegram, |c| {
            c.bot_token = Some(token.clone());
        });
        println!("telegram channel '{name}' configured");
        changed = true;
    }
    if let Some(token) = slack {
        let name = channel.unwrap_or_else(|| "slack".into());
        upsert_channel(&mut config, &name, ChannelType::Slack, |c| {
            c.bot_token = Some(token.clone());
            c.app_token = slack_app_token.clone();
        });
        println!("slack channel '{name}' configured");
        changed = true;
    }

    if changed {
        config.save(&paths)?;
        println!("Saved. Restart the daemon (it restarts on next `tg <tool>`).");
        Ok(0)
    } else {
        eprintln!("Nothing to do — pass --telegram TOKEN or --slack TOKEN.");
        Ok(1)
    }
}

fn upsert_channel(
    config: &mut Config,
    name: &str,
    channel_type: ChannelType,
    apply: impl FnOnce(&mut Credentials),
) {
    let entry = config
        .channels
        .entry(name.to_string())
        .or_insert(ChannelEntry {
            channel_type,
            credentials: Credentials::default(),
            paired_users: Vec::new(),
            linked_groups: Vec::new(),
        });
    entry.channel_type = channel_type;
    apply(&mut entry.credentials);
}

pub async fn pair() -> anyhow::Result<i32> {
    let paths = Paths::resolve()?;
    let client = ensure_daemon(&paths).await?;
    let body = client.post("/generate-code", &json!({})).await?;
    let code = body
        .get("code")
        .and_then(Value::as_str)
        .context("daemon returned no code")?;
    println!("Pairing code: {code}");
    println!("Send the bot:  /pair {code}");
    println!("The code expires in 10 minutes.");
    Ok(0)
}

pub async fn resume() -> anyhow::Result<i32> {
    // Interactive resume runs through the chat picker; from the terminal
    // the useful form is listing candidates for the current directory.
    let paths = Paths::resolve()?;
    let client = ensure_daemon(&paths).await?;
    let cwd = std::env::current_dir()?.to_string_lossy().into_owned();

    let mut any = false;
    for tool in ["claude", "codex", "pi", "kimi"] {
        let body = client
            .get(&format!("/sessions/recent?tool={tool}&cwd={}", urlenc(&cwd)))
            .await?;
        let transcripts = body
            .get("transcripts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for t in transcripts.iter().take(5) {
            any = true;
            let reference = t.get("resumeRef").and_then(Value::as_str).unwrap_or("?");
            let invocation = match tool {
                "claude" => format!("tg claude --resume {reference}"),
                "codex" => format!("tg codex resume {reference}"),
                _ => format!("tg {tool} --session {reference}"),
            };
            println!("{invocation}");
        }
    }
    if !any {
        println!("No resumable transcripts under {cwd}.");
    }
    Ok(0)
}

pub async fn restart(id: Option<String>) -> anyhow::Result<i32> {
    let paths = Paths::resolve()?;
    let client = ensure_daemon(&paths).await?;
    let id = match id {
        Some(id) => id,
        None => sole_session_id(&client).await?,
    };
    client.post(&format!("/session/{id}/restart"), &json!({})).await?;
    println!("Restart requested for {id}.");
    Ok(0)
}

pub async fn send(
    id: &str,
    text: Option<String>,
    file: Option<String>,
    caption: Option<String>,
) -> anyhow::Result<i32> {
    let paths = Paths::resolve()?;
    let client = ensure_daemon(&paths).await?;
    match (text, file) {
        (_, Some(path)) => {
            client
                .post(
                    &format!("/remote/{id}/send-file"),
                    &json!({ "path": path, "caption": caption }),
                )
                .await?;
        }
        (Some(text), None) => {
            client
                .post(&format!("/remote/{id}/send-message"), &json!({ "text": text }))
                .await?;
        }
        (None, None) => bail!("pass text or --file PATH"),
    }
    Ok(0)
}

pub async fn write(id: &str, text: Option<String>, file: Option<String>) -> anyhow::Result<i32> {
    let paths = Paths::resolve()?;
    let client = ensure_daemon(&paths).await?;
    let text = match (text, file) {
        (Some(text), None) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read {path}"))?,
        _ => bail!("pass text or --file PATH"),
    };
    client
        .post(&format!("/remote/{id}/send-input"), &json!({ "text": text }))
        .await?;
    Ok(0)
}

pub async fn peek(id: Option<String>, all: bool, count: Option<usize>) -> anyhow::Result<i32> {
    let paths = Paths::resolve()?;
    let client = ensure_daemon(&paths).await?;
    let status = client.get("/status").await?;
    let sessions = status
        .get("sessions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let shown: Vec<&Value> = match (&id, all) {
        (Some(id), _) => sessions
            .iter()
            .filter(|s| s.get("id").and_then(Value::as_str) == Some(id.as_str()))
            .collect(),
        (None, _) => sessions.iter().take(count.unwrap_or(usize::MAX)).collect(),
    };
    if shown.is_empty() {
        println!("No matching sessions.");
        return Ok(if id.is_some() { 1 } else { 0 });
    }
    for s in shown {
        println!(
            "{} {} cwd={} queued={} idle={}s chat={}",
            s.get("id").and_then(Value::as_str).unwrap_or("?"),
            s.get("command")
                .and_then(Value::as_array)
                .and_then(|c| c.first())
                .and_then(Value::as_str)
                .unwrap_or("?"),
            s.get("cwd").and_then(Value::as_str).unwrap_or("?"),
            s.get("queuedInput").and_then(Value::as_u64).unwrap_or(0),
            s.get("idleSecs").and_then(Value::as_u64).unwrap_or(0),
            s.get("boundChat").and_then(Value::as_str).unwrap_or("-"),
        );
    }
    Ok(0)
}

pub async fn logs(lines: usize, follow: bool) -> anyhow::Result<i32> {
    let paths = Paths::resolve()?;
    let path = paths.log_file();
    let file = std::fs::File::open(&path)
        .with_context(|| format!("no daemon log at {}", path.display()))?;

    // Print the last N lines, then optionally follow appends.
    let reader = std::io::BufReader::new(&file);
    let all: Vec<String> = reader.lines().map_while(Result::ok).collect();
    for line in all.iter().skip(all.len().saturating_sub(lines)) {
        println!("{line}");
    }

    if follow {
        let mut file = std::fs::File::open(&path)?;
        let mut offset = file.metadata()?.len();
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            let len = file.metadata()?.len();
            if len < offset {
                offset = 0; // rotated
            }
            if len > offset {
                file.seek(SeekFrom::Start(offset))?;
                let mut buf = String::new();
                std::io::Read::read_to_string(&mut file, &mut buf)?;
                print!("{buf}");
                offset = len;
            }
        }
    }
    Ok(0)
}

pub async fn doctor() -> anyhow::Result<i32> {
    let paths = Paths::resolve()?;
    let mut failures = 0;

    let check = |ok: bool, label: &str, hint: &str| {
        if ok {
            println!("✓ {label}");
            0
        } else {
            println!("✗ {label} — {hint}");
            1
        }
    };

    failures += check(
        paths.home().is_dir(),
        "home directory exists",
        "run `tg setup` first",
    );
    let config = Config::load(&paths);
    failures += check(config.is_ok(), "config parses", "fix or delete config.json");
    let config = config.unwrap_or_default();
    failures += check(
        !config.channels.is_empty(),
        "a channel is configured",
        "tg setup --telegram TOKEN",
    );
    let has_token = config
        .channels
        .values()
        .any(|c| c.credentials.bot_token.as_deref().is_some_and(|t| !t.is_empty()));
    failures += check(has_token, "a bot token is present", "tg setup --telegram TOKEN");
    let has_paired = config.channels.values().any(|c| !c.paired_users.is_empty());
    failures += check(has_paired, "a user is paired", "tg pair, then /pair <code> in chat");

    match DaemonClient::connect(&paths) {
        Ok(client) => match client.health().await {
            Ok(_) => {
                println!("✓ daemon reachable");
                match client.get("/status").await {
                    Ok(_) => println!("✓ auth accepted"),
                    Err(_) => {
                        println!("✗ auth rejected — delete daemon.auth and restart");
                        failures += 1;
                    }
                }
            }
            Err(_) => {
                println!("✗ daemon not responding — it starts on `tg <tool>`");
                failures += 1;
            }
        },
        Err(_) => {
            println!("✗ daemon not running — it starts on `tg <tool>`");
            failures += 1;
        }
    }

    Ok(if failures == 0 { 0 } else { 1 })
}

pub async fn channels() -> anyhow::Result<i32> {
    let paths = Paths::resolve()?;
    let client = ensure_daemon(&paths).await?;
    let body = client.get("/channels").await?;
    let chats = body
        .get("chats")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if chats.is_empty() {
        println!("No chats visible yet — message the bot once.");
        return Ok(0);
    }
    for chat in chats {
        println!(
            "{} [{}]{} {}",
            chat.get("chatId").and_then(Value::as_str).unwrap_or("?"),
            chat.get("kind").and_then(Value::as_str).unwrap_or("?"),
            if chat.get("busy").and_then(Value::as_bool).unwrap_or(false) {
                " (busy)"
            } else {
                ""
            },
            chat.get("title").and_then(Value::as_str).unwrap_or(""),
        );
    }
    Ok(0)
}

async fn sole_session_id(client: &DaemonClient) -> anyhow::Result<String> {
    let status = client.get("/status").await?;
    let sessions = status
        .get("sessions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    match sessions.len() {
        0 => bail!("no sessions running"),
        1 => Ok(sessions[0]
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()),
        _ => bail!("several sessions running — pass an id (see `tg peek --all`)"),
    }
}

fn urlenc(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
