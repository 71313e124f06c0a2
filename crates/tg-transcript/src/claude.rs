//! Claude Code transcript dialect.
//!
//! Records are tagged by a top-level `type`: `assistant` carries content
//! blocks (text, thinking, tool_use), `user` carries tool results, and
//! `queue-operation` carries background-task notifications embedded as
//! `<task-notification …>` XML.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::events::{BackgroundJobEvent, JobStatus, ParsedLine, ToolCall, ToolResult};
use crate::parser::{command_of_input, content_text, decode_questions};
use crate::state::ParserState;
use crate::urls::discover_urls;

pub(crate) fn running_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Command running in background with ID:\s*([\w.-]+)").unwrap())
}

pub(crate) fn stopped_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Successfully stopped task:\s*([\w.-]+)(?:\s*\((.*?)\))?").unwrap()
    })
}

pub(crate) fn stopped_msg_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(?:stopped|killed|terminated|cancelled)\s+task").unwrap())
}

fn notification_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<task-notification\b([^>]*)>").unwrap())
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([\w-]+)="([^"]*)""#).unwrap())
}

pub(crate) fn decode(value: &Value, state: &mut ParserState) -> Option<ParsedLine> {
    let mut out = ParsedLine {
        session_id: value
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string),
        ..ParsedLine::default()
    };

    match value.get("type").and_then(Value::as_str) {
        Some("assistant") => decode_assistant(value, state, &mut out),
        Some("user") => decode_user(value, state, &mut out),
        Some("queue-operation") => decode_queue_operation(value, &mut out),
        _ => {}
    }
    Some(out)
}

fn decode_assistant(value: &Value, state: &mut ParserState, out: &mut ParsedLine) {
    let Some(blocks) = value
        .pointer("/message/content")
        .and_then(Value::as_array)
    else {
        return;
    };

    let mut text = String::new();
    let mut thinking = String::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(Value::as_str) {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(t);
                }
            }
            Some("thinking") => {
                if let Some(t) = block.get("thinking").and_then(Value::as_str) {
                    if !thinking.is_empty() {
                        thinking.push('\n');
                    }
                    thinking.push_str(t);
                }
            }
            Some("tool_use") => {
                let name = block
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let id = block.get("id").and_then(Value::as_str);
                let input = block.get("input").cloned().unwrap_or(Value::Null);

                if let Some(id) = id {
                    state.remember_call(id, &name, &input);
                }

                if name == "AskUserQuestion" {
                    out.questions.extend(decode_questions(&input));
                } else {
                    out.tool_calls.push(ToolCall {
                        id: id.map(str::to_string),
                        name,
                        input,
                    });
                }
            }
            _ => {}
        }
    }

    if !text.is_empty() {
        out.assistant_text = Some(text);
    }
    if !thinking.is_empty() {
        out.thinking = Some(thinking);
    }
}

fn decode_user(value: &Value, state: &mut ParserState, out: &mut ParsedLine) {
    let side_result = value.get("toolUseResult");

    let Some(blocks) = value
        .pointer("/message/content")
        .and_then(Value::as_array)
    else {
        return;
    };

    for block in blocks {
        if block.get("type").and_then(Value::as_str) != Some("tool_result") {
            continue;
        }
        let tool_use_id = block
            .get("tool_use_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let content = content_text(block.get("content").unwrap_or(&Value::Null));
        let is_error = block
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let tool_name = tool_use_id.as_deref().and_then(|id| state.name_for(id));
        let command = tool_use_id
            .as_deref()
            .and_then(|id| state.input_for(id))
            .and_then(command_of_input);

        extract_job_events(&content, side_result, command.as_deref(), out);

        out.tool_results.push(ToolResult {
            tool_use_id,
            tool_name,
            urls: discover_urls(&content, command.as_deref()),
            content,
            is_error,
        });
    }
}

/// Background-job transitions found inside a tool result.
fn extract_job_events(
    content: &str,
    side_result: Option<&Value>,
    command: Option<&str>,
    out: &mut ParsedLine,
) {
    // "Command running in background with ID: <id>" — job started. The
    // sibling toolUseResult.backgroundTaskId names the same id when present.
    if let Some(caps) = running_re().captures(content) {
        let task_id = side_result
            .and_then(|r| r.get("backgroundTaskId"))
            .and_then(Value::as_str)
            .unwrap_or(caps.get(1).map(|m| m.as_str()).unwrap_or_default())
            .to_string();
        out.background_jobs.push(BackgroundJobEvent {
            task_id,
            status: JobStatus::Running,
            command: command.map(str::to_string),
            urls: discover_urls(content, command),
        });
        return;
    }

    // "Successfully stopped task: <id> (<command>)" — explicit kill.
    if let Some(caps) = stopped_re().captures(content) {
        out.background_jobs.push(BackgroundJobEvent {
            task_id: caps[1].to_string(),
            status: JobStatus::Killed,
            command: caps.get(2).map(|m| m.as_str().to_string()),
            urls: Vec::new(),
        });
        return;
    }

    // toolUseResult carrying a stop/kill message names the task indirectly.
    if let Some(side) = side_result {
        let message = side
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| side.as_str().unwrap_or_default().to_string());
        if stopped_msg_re().is_match(&message) {
            if let Some(caps) = stopped_re().captures(&message) {
                out.background_jobs.push(BackgroundJobEvent {
                    task_id: caps[1].to_string(),
                    status: JobStatus::Killed,
                    command: caps.get(2).map(|m| m.as_str().to_string()),
                    urls: Vec::new(),
                });
            } else if let Some(task_id) = side.get("backgroundTaskId").and_then(Value::as_str) {
                out.background_jobs.push(BackgroundJobEvent {
                    task_id: task_id.to_string(),
                    status: JobStatus::Killed,
                    command: None,
                    urls: Vec::new(),
                });
            }
        }
    }
}

/// `queue-operation` records embed `<task-notification …>` tags whose
/// attributes carry the job transition.
fn decode_queue_operation(value: &Value, out: &mut ParsedLine) {
    let content = value
        .get("content")
        .and_then(Value::as_str)
        .or_else(|| value.get("operation").and_then(Value::as_str))
        .unwrap_or_default();

    for caps in notification_re().captures_iter(content) {
        let attrs = &caps[1];
        let mut task_id = None;
        let mut status = None;
        let mut command = None;
        for attr in attr_re().captures_iter(attrs) {
            match &attr[1] {
                "task-id" | "id" => task_id = Some(attr[2].to_string()),
                "status" => status = Some(attr[2].to_string()),
                "command" => command = Some(attr[2].to_string()),
                _ => {}
            }
        }
        let (Some(task_id), Some(status)) = (task_id, status) else {
            continue;
        };
        let status = match status.as_str() {
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "killed" => JobStatus::Killed,
            _ => continue,
        };
        out.background_jobs.push(BackgroundJobEvent {
            task_id,
            status,
            urls: command.as_deref().map(crate::urls::sniff_command_urls).unwrap_or_default(),
            command,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::tool::Tool;

    fn parse(lines: &[&str]) -> Vec<ParsedLine> {
        let mut p = Parser::new(Tool::Claude);
        lines.iter().filter_map(|l| p.parse_line(l)).collect()
    }

    #[test]
    fn assistant_text_and_thinking() {
        let out = parse(&[
            r#"{"type":"assistant","sessionId":"s1","message":{"content":[{"type":"thinking","thinking":"hmm"},{"type":"text","text":"Done."}]}}"#,
        ]);
        assert_eq!(out[0].assistant_text.as_deref(), Some("Done."));
        assert_eq!(out[0].thinking.as_deref(), Some("hmm"));
        assert_eq!(out[0].session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn tool_result_gets_name_from_call() {
        let out = parse(&[
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"cargo test"}}]}}"#,
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t1","content":"32 passed","is_error":false}]}}"#,
        ]);
        assert_eq!(out[0].tool_calls[0].name, "Bash");
        let result = &out[1].tool_results[0];
        assert_eq!(result.tool_name.as_deref(), Some("Bash"));
        assert!(result.should_forward());
    }

    #[test]
    fn ask_user_question_is_lifted() {
        let out = parse(&[
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t2","name":"AskUserQuestion","input":{"questions":[{"question":"Proceed?","options":["Yes","No"]}]}}]}}"#,
        ]);
        assert!(out[0].tool_calls.is_empty());
        assert_eq!(out[0].questions[0].question, "Proceed?");
    }

    #[test]
    fn background_job_running_from_result() {
        let out = parse(&[
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t3","name":"Bash","input":{"command":"npm run dev --port 3000"}}]}}"#,
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t3","content":"Command running in background with ID: bash_1"}]},"toolUseResult":{"backgroundTaskId":"bash_1"}}"#,
        ]);
        let job = &out[1].background_jobs[0];
        assert_eq!(job.task_id, "bash_1");
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.command.as_deref(), Some("npm run dev --port 3000"));
        assert_eq!(job.urls, vec!["http://localhost:3000"]);
    }

    #[test]
    fn background_job_stopped_with_command() {
        let out = parse(&[
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"tx","content":"Successfully stopped task: bash_7 (npm run dev)"}]}}"#,
        ]);
        let job = &out[0].background_jobs[0];
        assert_eq!(job.task_id, "bash_7");
        assert_eq!(job.status, JobStatus::Killed);
        assert_eq!(job.command.as_deref(), Some("npm run dev"));
    }

    #[test]
    fn queue_notification_statuses() {
        let out = parse(&[
            r#"{"type":"queue-operation","content":"<task-notification task-id=\"bash_2\" status=\"completed\" command=\"cargo build\">done</task-notification>"}"#,
        ]);
        let job = &out[0].background_jobs[0];
        assert_eq!(job.task_id, "bash_2");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.command.as_deref(), Some("cargo build"));
    }
}
