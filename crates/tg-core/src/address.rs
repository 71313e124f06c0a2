//! Colon-delimited channel addresses.
//!
//! An address identifies either a chat endpoint (`ChatId`) or a paired human
//! (`UserId`). The wire forms are:
//!
//! | Form | Meaning |
//! |------|---------|
//! | `telegram:12345` | bare chat/user id on the default account |
//! | `telegram:work:12345` | id on the named account `work` |
//! | `telegram:12345:77` | forum topic `77` inside chat `12345` |
//! | `telegram:work:12345:77` | named account + topic |
//!
//! Whether the second segment is an account name or an id is decided by
//! whether it parses as a (possibly negative) integer — Telegram group ids
//! are negative, account names never start with a digit or `-`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A fully parsed channel address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelAddress {
    /// Channel type: `"telegram"`, `"slack"`, `"internal"`.
    pub channel_type: String,
    /// Named account, when more than one account of the same type is
    /// configured. `None` for the sole/default account.
    pub channel_name: Option<String>,
    /// Platform-native id (chat id or user id). Kept as a string — Telegram
    /// ids are i64, Slack ids are alphanumeric.
    pub id: String,
    /// Forum-topic / thread suffix, when present.
    pub thread: Option<String>,
}

impl ChannelAddress {
    /// Parse the colon-delimited wire form.
    pub fn parse(s: &str) -> Result<Self> {
        let segments: Vec<&str> = s.split(':').collect();
        if segments.len() < 2 || segments.len() > 4 {
            return Err(Error::Address(format!("expected 2-4 segments: {s}")));
        }
        if segments.iter().any(|seg| seg.is_empty()) {
            return Err(Error::Address(format!("empty segment: {s}")));
        }

        let channel_type = segments[0].to_string();
        let (channel_name, id, thread) = match segments.len() {
            2 => (None, segments[1], None),
            3 => {
                if is_numeric_id(segments[1]) {
                    (None, segments[1], Some(segments[2]))
                } else {
                    (Some(segments[1].to_string()), segments[2], None)
                }
            }
            _ => (
                Some(segments[1].to_string()),
                segments[2],
                Some(segments[3]),
            ),
        };

        Ok(Self {
            channel_type,
            channel_name,
            id: id.to_string(),
            thread: thread.map(str::to_string),
        })
    }

    /// Render the canonical wire form.
    pub fn serialize(&self) -> String {
        let mut out = self.channel_type.clone();
        if let Some(ref name) = self.channel_name {
            out.push(':');
            out.push_str(name);
        }
        out.push(':');
        out.push_str(&self.id);
        if let Some(ref thread) = self.thread {
            out.push(':');
            out.push_str(thread);
        }
        out
    }
}

impl std::fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.serialize())
    }
}

/// True when `s` is a (possibly negative) decimal integer.
fn is_numeric_id(s: &str) -> bool {
    let body = s.strip_prefix('-').unwrap_or(s);
    !body.is_empty() && body.bytes().all(|b| b.is_ascii_digit())
}

/// Address of a chat endpoint (DM, group, or forum topic).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn parse(&self) -> Result<ChannelAddress> {
        ChannelAddress::parse(&self.0)
    }

    /// Strip any thread suffix, yielding the containing group's address.
    /// Addresses without a thread are returned unchanged.
    pub fn parent(&self) -> ChatId {
        match self.parse() {
            Ok(mut addr) if addr.thread.is_some() => {
                addr.thread = None;
                ChatId(addr.serialize())
            }
            _ => self.clone(),
        }
    }

    /// True when this address carries a thread suffix.
    pub fn is_topic(&self) -> bool {
        self.parse().map(|a| a.thread.is_some()).unwrap_or(false)
    }

    /// Channel type segment, or empty string for malformed addresses.
    pub fn channel_type(&self) -> String {
        self.parse().map(|a| a.channel_type).unwrap_or_default()
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of a paired human on some channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn parse(&self) -> Result<ChannelAddress> {
        ChannelAddress::parse(&self.0)
    }

    pub fn channel_type(&self) -> String {
        self.parse().map(|a| a.channel_type).unwrap_or_default()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bare_id() {
        let a = ChannelAddress::parse("telegram:12345").unwrap();
        assert_eq!(a.channel_type, "telegram");
        assert_eq!(a.channel_name, None);
        assert_eq!(a.id, "12345");
        assert_eq!(a.thread, None);
    }

    #[test]
    fn parse_negative_group_id() {
        let a = ChannelAddress::parse("telegram:-100987654321").unwrap();
        assert_eq!(a.id, "-100987654321");
        assert_eq!(a.channel_name, None);
    }

    #[test]
    fn parse_named_account() {
        let a = ChannelAddress::parse("telegram:work:12345").unwrap();
        assert_eq!(a.channel_name.as_deref(), Some("work"));
        assert_eq!(a.id, "12345");
        assert_eq!(a.thread, None);
    }

    #[test]
    fn parse_topic_without_name() {
        let a = ChannelAddress::parse("telegram:-100123:42").unwrap();
        assert_eq!(a.channel_name, None);
        assert_eq!(a.id, "-100123");
        assert_eq!(a.thread.as_deref(), Some("42"));
    }

    #[test]
    fn parse_full_form() {
        let a = ChannelAddress::parse("telegram:work:-100123:42").unwrap();
        assert_eq!(a.channel_name.as_deref(), Some("work"));
        assert_eq!(a.id, "-100123");
        assert_eq!(a.thread.as_deref(), Some("42"));
    }

    #[test]
    fn roundtrip_all_forms() {
        for s in [
            "telegram:12345",
            "telegram:-100987",
            "telegram:work:12345",
            "telegram:-100123:42",
            "telegram:work:-100123:42",
            "slack:T123ABC",
        ] {
            let parsed = ChannelAddress::parse(s).unwrap();
            assert_eq!(parsed.serialize(), s);
            assert_eq!(ChannelAddress::parse(&parsed.serialize()).unwrap(), parsed);
        }
    }

    #[test]
    fn reject_malformed() {
        assert!(ChannelAddress::parse("telegram").is_err());
        assert!(ChannelAddress::parse("a:b:c:d:e").is_err());
        assert!(ChannelAddress::parse("telegram::5").is_err());
    }

    #[test]
    fn parent_strips_thread() {
        let topic = ChatId::new("telegram:-100123:42");
        assert_eq!(topic.parent().as_str(), "telegram:-100123");
        let dm = ChatId::new("telegram:555");
        assert_eq!(dm.parent().as_str(), "telegram:555");
    }

    #[test]
    fn slack_alphanumeric_id_is_not_numeric() {
        // Second segment "C0AB" is not numeric, so it is an account name only
        // when a third segment follows; as the last segment it is the id.
        let a = ChannelAddress::parse("slack:C0AB12").unwrap();
        assert_eq!(a.id, "C0AB12");
    }
}
