//! JSON configuration at `<TOUCHGRASS_HOME>/config.json`.
//!
//! Loaded through figment (JSON file + `TOUCHGRASS__`-prefixed env
//! overrides) and written back atomically with 0600 permissions. Field
//! names on disk are camelCase.

use std::collections::BTreeMap;
use std::path::Path;

use figment::{
    providers::{Env, Format, Json},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::address::{ChatId, UserId};
use crate::error::{Error, Result};
use crate::paths::{write_private, Paths};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Named channel accounts. The common case is a single entry named
    /// `"telegram"`.
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelEntry>,

    #[serde(default)]
    pub settings: Settings,

    /// Per-chat output preferences, keyed by the serialized `ChatId`.
    #[serde(default)]
    pub chat_preferences: BTreeMap<String, ChatPreferences>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEntry {
    #[serde(rename = "type")]
    pub channel_type: ChannelType,

    #[serde(default)]
    pub credentials: Credentials,

    #[serde(default)]
    pub paired_users: Vec<PairedUser>,

    #[serde(default)]
    pub linked_groups: Vec<LinkedGroup>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Telegram,
    Slack,
    Internal,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Telegram => "telegram",
            ChannelType::Slack => "slack",
            ChannelType::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_app_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairedUser {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// RFC3339 timestamp of when the pairing happened.
    pub paired_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedGroup {
    pub chat_id: ChatId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub linked_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Batch window floor for output coalescing, milliseconds.
    #[serde(default = "default_batch_min_ms")]
    pub output_batch_min_ms: u64,
    /// Batch window ceiling — a batch is flushed no later than this.
    #[serde(default = "default_batch_max_ms")]
    pub output_batch_max_ms: u64,
    /// Maximum buffered output characters before a forced flush.
    #[serde(default = "default_buffer_max_chars")]
    pub output_buffer_max_chars: usize,
    /// Hard cap on concurrently registered remote sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_shell: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_batch_min_ms: default_batch_min_ms(),
            output_batch_max_ms: default_batch_max_ms(),
            output_buffer_max_chars: default_buffer_max_chars(),
            max_sessions: default_max_sessions(),
            default_shell: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_mode: Option<OutputMode>,
    /// Forward the tool's reasoning/thinking stream to this chat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<bool>,
}

/// How tool calls and results are rendered for a chat.
///
/// `Compact` is the "simple" mode in user-facing labels: one-liners, noisy
/// tool calls suppressed. `Verbose` renders everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Compact,
    Verbose,
}

fn default_batch_min_ms() -> u64 {
    400
}
fn default_batch_max_ms() -> u64 {
    2_500
}
fn default_buffer_max_chars() -> usize {
    16_000
}
fn default_max_sessions() -> usize {
    32
}

impl Config {
    /// Load from `<home>/config.json` with `TOUCHGRASS__` env overrides.
    /// A missing file yields the default (empty) config.
    pub fn load(paths: &Paths) -> Result<Self> {
        let file = paths.config_file();
        let figment = Figment::new()
            .merge(Json::file(&file))
            .merge(Env::prefixed("TOUCHGRASS__").split("__"));
        figment
            .extract()
            .map_err(|e| Error::Config(format!("{}: {e}", file.display())))
    }

    /// Persist atomically with 0600 permissions.
    pub fn save(&self, paths: &Paths) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_private(&paths.config_file(), json.as_bytes())
    }

    /// The channel entry whose type matches `user_id`'s address type, if any.
    pub fn channel_for_user(&self, user_id: &UserId) -> Option<(&String, &ChannelEntry)> {
        let t = user_id.channel_type();
        self.channels
            .iter()
            .find(|(_, entry)| entry.channel_type.as_str() == t)
    }

    /// True when `user_id` appears in any channel's paired-user list.
    pub fn is_paired(&self, user_id: &UserId) -> bool {
        self.channels
            .values()
            .any(|c| c.paired_users.iter().any(|p| &p.user_id == user_id))
    }

    /// True when `chat_id` (or its parent group, for topics) is linked.
    pub fn is_linked_group(&self, chat_id: &ChatId) -> bool {
        let parent = chat_id.parent();
        self.channels.values().any(|c| {
            c.linked_groups
                .iter()
                .any(|g| g.chat_id == *chat_id || g.chat_id == parent)
        })
    }

    /// Record a paired user under the channel matching their address type.
    /// Re-pairing an already-paired user refreshes `paired_at`.
    pub fn add_paired_user(&mut self, user_id: UserId, username: Option<String>) -> Result<()> {
        let t = user_id.channel_type();
        let entry = self
            .channels
            .values_mut()
            .find(|c| c.channel_type.as_str() == t)
            .ok_or_else(|| Error::Config(format!("no configured channel of type {t:?}")))?;

        entry.paired_users.retain(|p| p.user_id != user_id);
        entry.paired_users.push(PairedUser {
            user_id,
            username,
            paired_at: chrono::Utc::now().to_rfc3339(),
        });
        Ok(())
    }

    /// Link a group chat. Idempotent on `chat_id`.
    pub fn link_group(&mut self, chat_id: ChatId, title: Option<String>) -> Result<()> {
        let t = chat_id.channel_type();
        let entry = self
            .channels
            .values_mut()
            .find(|c| c.channel_type.as_str() == t)
            .ok_or_else(|| Error::Config(format!("no configured channel of type {t:?}")))?;

        if entry.linked_groups.iter().any(|g| g.chat_id == chat_id) {
            return Ok(());
        }
        entry.linked_groups.push(LinkedGroup {
            chat_id,
            title,
            linked_at: chrono::Utc::now().to_rfc3339(),
        });
        Ok(())
    }

    /// Unlink a chat. Returns true when something was removed.
    pub fn unlink_group(&mut self, chat_id: &ChatId) -> bool {
        let mut removed = false;
        for entry in self.channels.values_mut() {
            let before = entry.linked_groups.len();
            entry.linked_groups.retain(|g| &g.chat_id != chat_id);
            removed |= entry.linked_groups.len() != before;
        }
        removed
    }

    /// Effective output mode for a chat (default: compact).
    pub fn output_mode(&self, chat_id: &ChatId) -> OutputMode {
        self.chat_preferences
            .get(chat_id.as_str())
            .and_then(|p| p.output_mode)
            .unwrap_or_default()
    }

    /// Whether thinking events are forwarded to this chat (default: off).
    pub fn thinking_enabled(&self, chat_id: &ChatId) -> bool {
        self.chat_preferences
            .get(chat_id.as_str())
            .and_then(|p| p.thinking)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        let mut config = Config::default();
        config.channels.insert(
            "telegram".into(),
            ChannelEntry {
                channel_type: ChannelType::Telegram,
                credentials: Credentials {
                    bot_token: Some("123:abc".into()),
                    bot_username: Some("touchgrass_bot".into()),
                    ..Credentials::default()
                },
                paired_users: vec![PairedUser {
                    user_id: UserId::new("telegram:42"),
                    username: Some("dev".into()),
                    paired_at: "2026-07-01T10:00:00Z".into(),
                }],
                linked_groups: vec![LinkedGroup {
                    chat_id: ChatId::new("telegram:-100555"),
                    title: Some("team".into()),
                    linked_at: "2026-07-02T09:30:00Z".into(),
                }],
            },
        );
        config
    }

    #[test]
    fn save_load_roundtrip_preserves_users_and_groups() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());
        let config = sample();
        config.save(&paths).unwrap();

        let loaded = Config::load(&paths).unwrap();
        let entry = &loaded.channels["telegram"];
        assert_eq!(entry.paired_users, config.channels["telegram"].paired_users);
        assert_eq!(entry.linked_groups, config.channels["telegram"].linked_groups);
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());
        let loaded = Config::load(&paths).unwrap();
        assert!(loaded.channels.is_empty());
        assert_eq!(loaded.settings.max_sessions, default_max_sessions());
    }

    #[test]
    fn camel_case_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());
        sample().save(&paths).unwrap();
        let raw = std::fs::read_to_string(paths.config_file()).unwrap();
        assert!(raw.contains("\"pairedUsers\""));
        assert!(raw.contains("\"linkedGroups\""));
        assert!(raw.contains("\"botToken\""));
        assert!(!raw.contains("\"bot_token\""));
    }

    #[test]
    fn pairing_is_idempotent_per_user() {
        let mut config = sample();
        config
            .add_paired_user(UserId::new("telegram:42"), Some("dev2".into()))
            .unwrap();
        let entry = &config.channels["telegram"];
        assert_eq!(entry.paired_users.len(), 1);
        assert_eq!(entry.paired_users[0].username.as_deref(), Some("dev2"));
    }

    #[test]
    fn topic_counts_as_linked_when_parent_is() {
        let config = sample();
        assert!(config.is_linked_group(&ChatId::new("telegram:-100555:7")));
        assert!(!config.is_linked_group(&ChatId::new("telegram:-100999")));
    }

    #[test]
    fn output_mode_defaults_to_compact() {
        let config = sample();
        assert_eq!(
            config.output_mode(&ChatId::new("telegram:42")),
            OutputMode::Compact
        );
    }
}
