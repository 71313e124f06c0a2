//! The normalized event model every dialect decoder produces.

use serde::{Deserialize, Serialize};

/// Tool names whose results are worth forwarding to chat even when they
/// succeed. Anything else is forwarded only on error.
pub const RESULT_ALLOWLIST: &[&str] = &[
    "WebFetch",
    "WebSearch",
    "Bash",
    "web_fetch",
    "web_search",
    "bash",
    "exec_command",
    "Task",
    "spawn_agent",
    "send_input",
    "wait",
];

/// A local-TTY duplicate — the tool already printed this refusal where the
/// developer is sitting, so chat suppresses it.
pub const USER_DECLINED_MARKER: &str = "The user doesn't want to proceed with this tool use";

/// Everything extracted from one transcript line. Most lines populate a
/// single field; Claude `assistant` records can carry text, thinking, and
/// tool calls at once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedLine {
    pub assistant_text: Option<String>,
    pub thinking: Option<String>,
    pub questions: Vec<Question>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub background_jobs: Vec<BackgroundJobEvent>,
    /// The tool's own session id, when the line carries one. Used for
    /// Claude rollover-file detection.
    pub session_id: Option<String>,
}

impl ParsedLine {
    pub fn is_empty(&self) -> bool {
        self.assistant_text.is_none()
            && self.thinking.is_none()
            && self.questions.is_empty()
            && self.tool_calls.is_empty()
            && self.tool_results.is_empty()
            && self.background_jobs.is_empty()
    }
}

/// A tool invocation by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// The outcome of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    /// Resolved from the call-id map when the result record doesn't name
    /// the tool itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
    /// URLs extracted from the result body plus command-line sniffing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
}

impl ToolResult {
    /// Forwarding rule: errors always, successes only for
    /// allowlisted tools, and never the local-TTY decline duplicate.
    pub fn should_forward(&self) -> bool {
        if self.content.contains(USER_DECLINED_MARKER) {
            return false;
        }
        if self.is_error {
            return true;
        }
        self.tool_name
            .as_deref()
            .map(|name| RESULT_ALLOWLIST.contains(&name))
            .unwrap_or(false)
    }
}

/// An `AskUserQuestion` lifted out of the tool-call stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub multi_select: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
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

/// A state change of a background job, extracted from the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundJobEvent {
    pub task_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_error_results() {
        let r = ToolResult {
            tool_use_id: None,
            tool_name: Some("Edit".into()),
            content: "no such file".into(),
            is_error: true,
            urls: vec![],
        };
        assert!(r.should_forward());
    }

    #[test]
    fn forward_allowlisted_success() {
        let r = ToolResult {
            tool_use_id: None,
            tool_name: Some("Bash".into()),
            content: "ok".into(),
            is_error: false,
            urls: vec![],
        };
        assert!(r.should_forward());
    }

    #[test]
    fn drop_non_allowlisted_success() {
        let r = ToolResult {
            tool_use_id: None,
            tool_name: Some("Edit".into()),
            content: "applied".into(),
            is_error: false,
            urls: vec![],
        };
        assert!(!r.should_forward());
    }

    #[test]
    fn suppress_user_decline_even_on_error() {
        let r = ToolResult {
            tool_use_id: None,
            tool_name: Some("Bash".into()),
            content: format!("Error: {USER_DECLINED_MARKER}."),
            is_error: true,
            urls: vec![],
        };
        assert!(!r.should_forward());
    }
}
