//! Codex transcript dialect.
//!
//! Two record families: `event_msg` (agent text and reasoning) and
//! `response_item` (tool calls, tool outputs, assistant messages). Codex's
//! background shells are numeric session ids reported inline in
//! `exec_command` output; the id → command mapping is cached so exit
//! records can name the command even after Codex truncates it.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::events::{BackgroundJobEvent, JobStatus, ParsedLine, ToolCall, ToolResult};
use crate::parser::{command_of_input, content_text, decode_questions};
use crate::state::ParserState;
use crate::urls::discover_urls;

fn session_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Process running with session ID\s+(\d+)").unwrap())
}

fn exited_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Process exited with code\s+(-?\d+)").unwrap())
}

fn gone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"stdin is closed|session not found").unwrap())
}

fn session_id_arg_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""session_id"\s*:\s*(\d+)"#).unwrap())
}

pub(crate) fn decode(value: &Value, state: &mut ParserState) -> Option<ParsedLine> {
    let mut out = ParsedLine::default();
    match value.get("type").and_then(Value::as_str) {
        Some("event_msg") => decode_event_msg(value, &mut out),
        Some("response_item") => decode_response_item(value, state, &mut out),
        _ => {}
    }
    Some(out)
}

fn decode_event_msg(value: &Value, out: &mut ParsedLine) {
    let Some(payload) = value.get("payload") else { return };
    match payload.get("type").and_then(Value::as_str) {
        Some("agent_message") => {
            out.assistant_text = payload
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        Some("agent_reasoning") => {
            out.thinking = payload
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        _ => {}
    }
}

fn decode_response_item(value: &Value, state: &mut ParserState, out: &mut ParsedLine) {
    let Some(payload) = value.get("payload") else { return };
    match payload.get("type").and_then(Value::as_str) {
        Some("function_call") | Some("custom_tool_call") => {
            let name = payload
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let call_id = payload.get("call_id").and_then(Value::as_str);

            // Arguments arrive as a JSON-encoded string for function calls
            // and as a plain field for custom tool calls.
            let input = payload
                .get("arguments")
                .and_then(Value::as_str)
                .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
                .or_else(|| payload.get("input").cloned())
                .unwrap_or(Value::Null);

            if let Some(id) = call_id {
                state.remember_call(id, &name, &input);
            }
            if name == "AskUserQuestion" {
                out.questions.extend(decode_questions(&input));
            } else {
                out.tool_calls.push(ToolCall {
                    id: call_id.map(str::to_string),
                    name,
                    input,
                });
            }
        }
        Some("function_call_output") | Some("custom_tool_call_output") => {
            let call_id = payload
                .get("call_id")
                .and_then(Value::as_str)
                .map(str::to_string);
            let raw_output = payload.get("output").cloned().unwrap_or(Value::Null);

            // Output may itself be a JSON envelope {"output": "...", ...}.
            let content = match &raw_output {
                Value::String(s) => serde_json::from_str::<Value>(s)
                    .ok()
                    .and_then(|v| {
                        v.get("output")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .unwrap_or_else(|| s.clone()),
                other => content_text(other),
            };

            let tool_name = call_id.as_deref().and_then(|id| state.name_for(id));
            let input = call_id.as_deref().and_then(|id| state.input_for(id)).cloned();
            let command = input.as_ref().and_then(command_of_input);

            extract_job_events(
                tool_name.as_deref(),
                input.as_ref(),
                &content,
                command.as_deref(),
                state,
                out,
            );

            let is_error = content.contains("exited with code")
                && !content.contains("exited with code 0")
                || content.to_ascii_lowercase().starts_with("error");

            out.tool_results.push(ToolResult {
                tool_use_id: call_id,
                tool_name,
                urls: discover_urls(&content, command.as_deref()),
                content,
                is_error,
            });
        }
        Some("message") => {
            if payload.get("role").and_then(Value::as_str) == Some("assistant") {
                let text = content_text(payload.get("content").unwrap_or(&Value::Null));
                if !text.is_empty() {
                    out.assistant_text = Some(text);
                }
            }
        }
        _ => {}
    }
}

/// Background-shell transitions in `exec_command` / `write_stdin` output.
fn extract_job_events(
    tool_name: Option<&str>,
    input: Option<&Value>,
    content: &str,
    command: Option<&str>,
    state: &mut ParserState,
    out: &mut ParsedLine,
) {
    let is_shell_tool = matches!(tool_name, Some("exec_command") | Some("write_stdin"));
    if !is_shell_tool {
        return;
    }

    if let Some(caps) = session_re().captures(content) {
        let session_id = caps[1].to_string();
        if let Some(cmd) = command {
            state
                .codex_session_commands
                .insert(session_id.clone(), cmd.to_string());
        }
        out.background_jobs.push(BackgroundJobEvent {
            task_id: session_id,
            status: JobStatus::Running,
            command: command.map(str::to_string),
            urls: discover_urls(content, command),
        });
        return;
    }

    // Exit/kill records reference the session via the call's session_id
    // argument; the cached command is attached and then evicted.
    let session_id = input
        .and_then(|i| i.get("session_id"))
        .and_then(|v| {
            v.as_u64()
                .map(|n| n.to_string())
                .or_else(|| v.as_str().map(str::to_string))
        })
        .or_else(|| {
            input
                .map(|i| i.to_string())
                .and_then(|raw| session_id_arg_re().captures(&raw).map(|c| c[1].to_string()))
        });

    let Some(session_id) = session_id else { return };

    if let Some(caps) = exited_re().captures(content) {
        let code: i64 = caps[1].parse().unwrap_or(-1);
        let cached = state.codex_session_commands.remove(&session_id);
        out.background_jobs.push(BackgroundJobEvent {
            task_id: session_id,
            status: if code == 0 {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            },
            command: cached,
            urls: Vec::new(),
        });
    } else if gone_re().is_match(content) {
        let cached = state.codex_session_commands.remove(&session_id);
        out.background_jobs.push(BackgroundJobEvent {
            task_id: session_id,
            status: JobStatus::Killed,
            command: cached,
            urls: Vec::new(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::tool::Tool;

    fn parse(lines: &[&str]) -> Vec<ParsedLine> {
        let mut p = Parser::new(Tool::Codex);
        lines.iter().filter_map(|l| p.parse_line(l)).collect()
    }

    #[test]
    fn agent_message_and_reasoning() {
        let out = parse(&[
            r#"{"type":"event_msg","payload":{"type":"agent_reasoning","text":"planning"}}"#,
            r#"{"type":"event_msg","payload":{"type":"agent_message","message":"Done."}}"#,
        ]);
        assert_eq!(out[0].thinking.as_deref(), Some("planning"));
        assert_eq!(out[1].assistant_text.as_deref(), Some("Done."));
    }

    #[test]
    fn function_call_arguments_are_decoded() {
        let out = parse(&[
            r#"{"type":"response_item","payload":{"type":"function_call","name":"exec_command","call_id":"c1","arguments":"{\"command\":[\"npm\",\"test\"]}"}}"#,
        ]);
        let call = &out[0].tool_calls[0];
        assert_eq!(call.name, "exec_command");
        assert_eq!(call.input["command"][0], "npm");
    }

    #[test]
    fn background_session_lifecycle() {
        let out = parse(&[
            r#"{"type":"response_item","payload":{"type":"function_call","name":"exec_command","call_id":"c1","arguments":"{\"command\":[\"npm\",\"run\",\"dev\"]}"}}"#,
            r#"{"type":"response_item","payload":{"type":"function_call_output","call_id":"c1","output":"Process running with session ID 3"}}"#,
            r#"{"type":"response_item","payload":{"type":"function_call","name":"write_stdin","call_id":"c2","arguments":"{\"session_id\":3,\"chars\":\"q\"}"}}"#,
            r#"{"type":"response_item","payload":{"type":"function_call_output","call_id":"c2","output":"Process exited with code 0"}}"#,
        ]);

        let started = &out[1].background_jobs[0];
        assert_eq!(started.task_id, "3");
        assert_eq!(started.status, JobStatus::Running);
        assert_eq!(started.command.as_deref(), Some("npm run dev"));

        let exited = &out[3].background_jobs[0];
        assert_eq!(exited.task_id, "3");
        assert_eq!(exited.status, JobStatus::Completed);
        // The exit record carries no command — the cache supplies it.
        assert_eq!(exited.command.as_deref(), Some("npm run dev"));
    }

    #[test]
    fn nonzero_exit_is_failed_and_closed_stdin_is_killed() {
        let out = parse(&[
            r#"{"type":"response_item","payload":{"type":"function_call","name":"exec_command","call_id":"c1","arguments":"{\"command\":[\"sleep\",\"99\"]}"}}"#,
            r#"{"type":"response_item","payload":{"type":"function_call_output","call_id":"c1","output":"Process running with session ID 7"}}"#,
            r#"{"type":"response_item","payload":{"type":"function_call","name":"write_stdin","call_id":"c2","arguments":"{\"session_id\":7}"}}"#,
            r#"{"type":"response_item","payload":{"type":"function_call_output","call_id":"c2","output":"Process exited with code 137"}}"#,
            r#"{"type":"response_item","payload":{"type":"function_call","name":"write_stdin","call_id":"c3","arguments":"{\"session_id\":7}"}}"#,
            r#"{"type":"response_item","payload":{"type":"function_call_output","call_id":"c3","output":"session not found"}}"#,
        ]);
        assert_eq!(out[3].background_jobs[0].status, JobStatus::Failed);
        // Cache was evicted at exit, so the kill has no command attached.
        let killed = &out[5].background_jobs[0];
        assert_eq!(killed.status, JobStatus::Killed);
        assert_eq!(killed.command, None);
    }

    #[test]
    fn assistant_message_response_item() {
        let out = parse(&[
            r#"{"type":"response_item","payload":{"type":"message","role":"assistant","content":[{"type":"output_text","text":"hello"}]}}"#,
        ]);
        assert_eq!(out[0].assistant_text.as_deref(), Some("hello"));
    }
}
