use serde::{Deserialize, Serialize};

use tg_core::address::{ChatId, UserId};

/// The daemon-side record of a live wrapper-managed tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSession {
    /// Opaque id of the form `r-<16 hex chars>`. Stable across daemon
    /// restarts when the wrapper supplies it on re-registration.
    pub id: String,
    /// The argv the wrapper executed (tool binary first). Used for tool
    /// detection and resume-ref extraction.
    pub command: Vec<String>,
    /// Absolute working directory of the wrapper.
    pub cwd: String,
    /// The owner's DM address — the fallback output target.
    pub chat_id: ChatId,
    /// The paired user permitted to drive this session. Immutable.
    pub owner_user_id: UserId,
    /// RFC3339 registration timestamp.
    pub registered_at: String,
}

impl RemoteSession {
    /// Mint a fresh session id: `r-` + 16 lowercase hex chars.
    pub fn new_id() -> String {
        let bytes = uuid::Uuid::new_v4();
        let hex: String = bytes
            .as_bytes()
            .iter()
            .take(8)
            .map(|b| format!("{b:02x}"))
            .collect();
        format!("r-{hex}")
    }
}

/// The stop/kill/resume signal queued for a wrapper to observe on its next
/// long-poll. At most one is pending per session; merging follows the
/// precedence resume > kill > stop, and a newer resume replaces an older
/// one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ControlAction {
    Stop,
    Kill,
    Resume { session_ref: String },
}

impl ControlAction {
    fn rank(&self) -> u8 {
        match self {
            ControlAction::Stop => 0,
            ControlAction::Kill => 1,
            ControlAction::Resume { .. } => 2,
        }
    }

    /// Merge `incoming` into `current`, returning the action that survives.
    pub fn merge(current: Option<ControlAction>, incoming: ControlAction) -> ControlAction {
        match current {
            None => incoming,
            Some(current) => {
                // A newer resume replaces an older one; otherwise higher
                // rank wins and ties keep the existing action.
                if incoming.rank() > current.rank()
                    || matches!(
                        (&current, &incoming),
                        (ControlAction::Resume { .. }, ControlAction::Resume { .. })
                    )
                {
                    incoming
                } else {
                    current
                }
            }
        }
    }
}

/// Lifecycle states of a tool-spawned background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Killed,
}

/// One tracked background job, keyed by the tool's task id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundJobRecord {
    pub task_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Up to three URLs sniffed from the job's output and command line.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    /// RFC3339 timestamp of the most recent status change.
    pub updated_at: String,
}

/// A single tool-originated question awaiting an answer from the chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionItem {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    /// Whether several options may be toggled before submitting.
    #[serde(default)]
    pub multi_select: bool,
}

/// An interactive flow waiting on a poll/keyboard answer, keyed by the
/// ephemeral poll id the channel adapter returned.
#[derive(Debug, Clone)]
pub enum PendingFlow {
    /// Paginated selector over repo files with multi-select of mentions.
    FilePicker {
        session_id: String,
        chat_id: ChatId,
        user_id: UserId,
        files: Vec<String>,
        page: usize,
        selected: Vec<String>,
        message_id: String,
    },
    /// Paginated list of candidate transcript files with preview labels.
    ResumePicker {
        chat_id: ChatId,
        user_id: UserId,
        tool: String,
        cwd: String,
        candidates: Vec<String>,
        labels: Vec<String>,
        page: usize,
        message_id: String,
    },
    /// `simple` vs `verbose` for a chat.
    OutputModePicker { chat_id: ChatId, message_id: String },
    /// Pick which session this chat attaches to.
    RemoteControlPicker {
        chat_id: ChatId,
        user_id: UserId,
        session_ids: Vec<String>,
        message_id: String,
    },
    /// A sequence of tool-originated `AskUserQuestion` items.
    QuestionSet {
        session_id: String,
        chat_id: ChatId,
        questions: Vec<QuestionItem>,
        index: usize,
        message_id: String,
    },
    /// Single-choice approval keyboard (Yes / Yes-always / No).
    ApprovalPoll {
        session_id: String,
        chat_id: ChatId,
        options: Vec<String>,
        multi: bool,
        message_id: String,
    },
    /// Optional history load offered right after an attach.
    RecentMessagesPoll {
        session_id: String,
        chat_id: ChatId,
        message_id: String,
    },
}

impl PendingFlow {
    /// The session this flow belongs to, when it has one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            PendingFlow::FilePicker { session_id, .. }
            | PendingFlow::QuestionSet { session_id, .. }
            | PendingFlow::ApprovalPoll { session_id, .. }
            | PendingFlow::RecentMessagesPoll { session_id, .. } => Some(session_id),
            _ => None,
        }
    }

    pub fn chat_id(&self) -> &ChatId {
        match self {
            PendingFlow::FilePicker { chat_id, .. }
            | PendingFlow::ResumePicker { chat_id, .. }
            | PendingFlow::OutputModePicker { chat_id, .. }
            | PendingFlow::RemoteControlPicker { chat_id, .. }
            | PendingFlow::QuestionSet { chat_id, .. }
            | PendingFlow::ApprovalPoll { chat_id, .. }
            | PendingFlow::RecentMessagesPoll { chat_id, .. } => chat_id,
        }
    }
}

/// Snapshot of where a session's output goes: the bound chat plus any
/// subscribed groups. Taken under the manager lock, used outside it.
#[derive(Debug, Clone, Default)]
pub struct FanoutTargets {
    pub bound: Option<ChatId>,
    pub groups: Vec<ChatId>,
}

impl FanoutTargets {
    /// Deduplicated union of bound chat and groups.
    pub fn all(&self) -> Vec<ChatId> {
        let mut out: Vec<ChatId> = Vec::new();
        if let Some(ref bound) = self.bound {
            out.push(bound.clone());
        }
        for g in &self.groups {
            if !out.contains(g) {
                out.push(g.clone());
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_none() && self.groups.is_empty()
    }
}

/// Summary row for `GET /status` and `tg peek --all`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub command: Vec<String>,
    pub cwd: String,
    pub bound_chat: Option<ChatId>,
    pub queued_input: usize,
    pub idle_secs: u64,
}

/// A session removed by the reaper, with the chats that were attached so
/// the caller can notify them.
#[derive(Debug, Clone)]
pub struct ReapedSession {
    pub session: RemoteSession,
    pub attached_chats: Vec<ChatId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_id_shape() {
        let id = RemoteSession::new_id();
        assert!(id.starts_with("r-"));
        assert_eq!(id.len(), 18);
        assert!(id[2..].bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn merge_resume_beats_kill_beats_stop() {
        use ControlAction::*;
        let r = Resume { session_ref: "abc".into() };

        // Any merge order of [stop, resume, kill] ends at resume("abc").
        let orders: Vec<Vec<ControlAction>> = vec![
            vec![Stop, r.clone(), Kill],
            vec![Stop, Kill, r.clone()],
            vec![Kill, Stop, r.clone()],
            vec![Kill, r.clone(), Stop],
            vec![r.clone(), Stop, Kill],
            vec![r.clone(), Kill, Stop],
        ];
        for order in orders {
            let mut current = None;
            for action in order {
                current = Some(ControlAction::merge(current, action));
            }
            assert_eq!(current, Some(r.clone()));
        }
    }

    #[test]
    fn merge_newer_resume_replaces_older() {
        let first = ControlAction::Resume { session_ref: "old".into() };
        let second = ControlAction::Resume { session_ref: "new".into() };
        let merged = ControlAction::merge(Some(first), second.clone());
        assert_eq!(merged, second);
    }

    #[test]
    fn merge_lower_rank_does_not_displace() {
        let kill = ControlAction::Kill;
        let merged = ControlAction::merge(Some(kill.clone()), ControlAction::Stop);
        assert_eq!(merged, kill);
    }

    #[test]
    fn fanout_all_dedupes_bound_from_groups() {
        let targets = FanoutTargets {
            bound: Some(ChatId::new("telegram:-1001")),
            groups: vec![ChatId::new("telegram:-1001"), ChatId::new("telegram:-1002")],
        };
        assert_eq!(targets.all().len(), 2);
    }
}
