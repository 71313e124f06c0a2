//! Pre-flight checks run before anything is spawned.

use anyhow::{bail, Context};

use tg_core::config::{ChannelType, Config};
use tg_transcript::tool::{meets_minimum, parse_version, Tool};

/// Outcome of the config pre-flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preflight {
    pub ok: bool,
    pub message: String,
}

/// A wrapper needs at least one channel with a usable bot token and at
/// least one paired user to talk to.
pub fn check_config(config: &Config) -> Preflight {
    if config.channels.is_empty() {
        return Preflight {
            ok: false,
            message: "No chat channel configured. Run `tg setup --telegram TOKEN`.".into(),
        };
    }

    for (name, entry) in &config.channels {
        let token_ok = entry
            .credentials
            .bot_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        if !token_ok {
            let what = match entry.channel_type {
                ChannelType::Telegram => "Telegram",
                ChannelType::Slack => "Slack",
                ChannelType::Internal => continue,
            };
            return Preflight {
                ok: false,
                message: format!(
                    "{what} setup is incomplete for channel '{name}' — run `tg setup` with a bot token."
                ),
            };
        }
    }

    let paired = config.channels.values().any(|c| !c.paired_users.is_empty());
    if !paired {
        return Preflight {
            ok: false,
            message: "No paired user. Run `tg pair` and send the bot /pair <code>.".into(),
        };
    }

    Preflight {
        ok: true,
        message: String::new(),
    }
}

/// Enforce the per-tool minimum version by parsing `tool --version`.
pub fn check_tool_version(tool: Tool) -> anyhow::Result<()> {
    let binary = which::which(tool.name())
        .with_context(|| format!("{} is not installed (not on PATH)", tool.name()))?;
    let output = std::process::Command::new(&binary)
        .arg("--version")
        .output()
        .with_context(|| format!("failed to run {} --version", tool.name()))?;
    let text = String::from_utf8_lossy(&output.stdout).into_owned()
        + &String::from_utf8_lossy(&output.stderr);

    let Some(found) = parse_version(&text) else {
        // A tool that prints no parsable version is allowed through; the
        // transcript parser will complain soon enough if it's ancient.
        return Ok(());
    };
    let minimum = tool.min_version();
    if !meets_minimum(found, minimum) {
        bail!(
            "{} {}.{}.{} is too old — touchgrass needs ≥ {}.{}.{}",
            tool.name(),
            found.0,
            found.1,
            found.2,
            minimum.0,
            minimum.1,
            minimum.2
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_core::config::{ChannelEntry, Credentials, PairedUser};
    use tg_core::address::UserId;

    fn config_with(token: Option<&str>, paired: bool) -> Config {
        let mut config = Config::default();
        config.channels.insert(
            "telegram".into(),
            ChannelEntry {
                channel_type: ChannelType::Telegram,
                credentials: Credentials {
                    bot_token: token.map(str::to_string),
                    ..Credentials::default()
                },
                paired_users: if paired {
                    vec![PairedUser {
                        user_id: UserId::new("telegram:42"),
                        username: None,
                        paired_at: "2026-07-01T00:00:00Z".into(),
                    }]
                } else {
                    vec![]
                },
                linked_groups: vec![],
            },
        );
        config
    }

    #[test]
    fn empty_credentials_fail_with_hint() {
        let result = check_config(&config_with(None, true));
        assert!(!result.ok);
        assert!(result.message.contains("Telegram setup is incomplete"));
    }

    #[test]
    fn token_and_paired_user_pass() {
        let result = check_config(&config_with(Some("123:abc"), true));
        assert!(result.ok, "{}", result.message);
    }

    #[test]
    fn missing_paired_user_fails() {
        let result = check_config(&config_with(Some("123:abc"), false));
        assert!(!result.ok);
        assert!(result.message.contains("paired"));
    }

    #[test]
    fn no_channels_fails() {
        let result = check_config(&Config::default());
        assert!(!result.ok);
    }
}
