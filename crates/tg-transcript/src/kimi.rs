//! Kimi wire-log dialect.
//!
//! Kimi streams fragments: `TextPart`/`ThinkPart` messages accumulate into
//! buffers that flush at step boundaries (`StepBegin`, `StepInterrupted`,
//! `TurnBegin`). Tool calls and results arrive whole. Background jobs are
//! recognized with the same regexes as the Claude dialect, applied to
//! `ToolResult.return_value.message`.

use serde_json::Value;

use crate::claude::{running_re, stopped_re};
use crate::events::{BackgroundJobEvent, JobStatus, ParsedLine, ToolCall, ToolResult};
use crate::parser::{command_of_input, content_text, decode_questions};
use crate::state::ParserState;
use crate::urls::discover_urls;

pub(crate) fn decode(value: &Value, state: &mut ParserState) -> Option<ParsedLine> {
    let mut out = ParsedLine {
        session_id: value
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string),
        ..ParsedLine::default()
    };

    let Some(message) = value.get("message") else {
        return Some(out);
    };

    match message.get("type").and_then(Value::as_str) {
        Some("TextPart") => {
            if let Some(text) = message.get("text").and_then(Value::as_str) {
                state.kimi_text.push_str(text);
            }
        }
        Some("ThinkPart") => {
            if let Some(text) = message.get("text").and_then(Value::as_str) {
                state.kimi_thinking.push_str(text);
            }
        }
        Some("ContentPart") => {
            let text = content_text(message.get("content").unwrap_or(&Value::Null));
            state.kimi_text.push_str(&text);
        }
        Some("StepBegin") | Some("StepInterrupted") | Some("TurnBegin") => {
            flush(state, &mut out);
        }
        Some("ToolCall") => {
            // A tool call ends whatever text/thinking run preceded it.
            flush(state, &mut out);
            decode_tool_call(message, state, &mut out);
        }
        Some("ToolResult") => decode_tool_result(message, state, &mut out),
        _ => {}
    }

    Some(out)
}

/// Flush accumulated fragment buffers into the current line's events.
fn flush(state: &mut ParserState, out: &mut ParsedLine) {
    if !state.kimi_text.is_empty() {
        out.assistant_text = Some(std::mem::take(&mut state.kimi_text));
    }
    if !state.kimi_thinking.is_empty() {
        out.thinking = Some(std::mem::take(&mut state.kimi_thinking));
    }
}

fn decode_tool_call(message: &Value, state: &mut ParserState, out: &mut ParsedLine) {
    let name = message
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let id = message.get("id").and_then(Value::as_str);
    let input = message
        .get("arguments")
        .cloned()
        .or_else(|| message.get("input").cloned())
        .unwrap_or(Value::Null);

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

fn decode_tool_result(message: &Value, state: &mut ParserState, out: &mut ParsedLine) {
    let tool_use_id = message
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let return_value = message.get("return_value").unwrap_or(&Value::Null);
    let content = return_value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| content_text(return_value));
    let is_error = return_value
        .get("is_error")
        .and_then(Value::as_bool)
        .or_else(|| message.get("is_error").and_then(Value::as_bool))
        .unwrap_or(false);

    let tool_name = message
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| tool_use_id.as_deref().and_then(|id| state.name_for(id)));
    let command = tool_use_id
        .as_deref()
        .and_then(|id| state.input_for(id))
        .and_then(command_of_input);

    // Same background-job patterns as the Claude dialect.
    if let Some(caps) = running_re().captures(&content) {
        out.background_jobs.push(BackgroundJobEvent {
            task_id: caps[1].to_string(),
            status: JobStatus::Running,
            command: command.clone(),
            urls: discover_urls(&content, command.as_deref()),
        });
    } else if let Some(caps) = stopped_re().captures(&content) {
        out.background_jobs.push(BackgroundJobEvent {
            task_id: caps[1].to_string(),
            status: JobStatus::Killed,
            command: caps.get(2).map(|m| m.as_str().to_string()),
            urls: Vec::new(),
        });
    }

    out.tool_results.push(ToolResult {
        tool_use_id,
        tool_name,
        urls: discover_urls(&content, command.as_deref()),
        content,
        is_error,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::tool::Tool;

    fn parse(lines: &[&str]) -> Vec<ParsedLine> {
        let mut p = Parser::new(Tool::Kimi);
        lines.iter().filter_map(|l| p.parse_line(l)).collect()
    }

    #[test]
    fn fragments_flush_at_step_boundary() {
        let out = parse(&[
            r#"{"message":{"type":"TextPart","text":"Hello "}}"#,
            r#"{"message":{"type":"TextPart","text":"world."}}"#,
            r#"{"message":{"type":"ThinkPart","text":"quietly"}}"#,
            r#"{"message":{"type":"StepBegin"}}"#,
        ]);
        // Fragment lines emit nothing; the boundary line carries the flush.
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].assistant_text.as_deref(), Some("Hello world."));
        assert_eq!(out[0].thinking.as_deref(), Some("quietly"));
    }

    #[test]
    fn turn_begin_and_interrupt_also_flush() {
        for boundary in [
            r#"{"message":{"type":"TurnBegin"}}"#,
            r#"{"message":{"type":"StepInterrupted"}}"#,
        ] {
            let out = parse(&[r#"{"message":{"type":"TextPart","text":"x"}}"#, boundary]);
            assert_eq!(out[0].assistant_text.as_deref(), Some("x"));
        }
    }

    #[test]
    fn tool_call_flushes_pending_text() {
        let out = parse(&[
            r#"{"message":{"type":"TextPart","text":"Running tests."}}"#,
            r#"{"message":{"type":"ToolCall","id":"k1","name":"bash","arguments":{"command":"cargo test"}}}"#,
        ]);
        assert_eq!(out[0].assistant_text.as_deref(), Some("Running tests."));
        assert_eq!(out[0].tool_calls[0].name, "bash");
    }

    #[test]
    fn tool_result_background_job() {
        let out = parse(&[
            r#"{"message":{"type":"ToolCall","id":"k2","name":"bash","arguments":{"command":"npm run dev --port 5173"}}}"#,
            r#"{"message":{"type":"ToolResult","id":"k2","return_value":{"message":"Command running in background with ID: job_4"}}}"#,
        ]);
        let job = &out[1].background_jobs[0];
        assert_eq!(job.task_id, "job_4");
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.command.as_deref(), Some("npm run dev --port 5173"));
        assert_eq!(job.urls, vec!["http://localhost:5173"]);
    }

    #[test]
    fn tool_result_stopped_task() {
        let out = parse(&[
            r#"{"message":{"type":"ToolResult","id":"k3","name":"bash","return_value":{"message":"Successfully stopped task: job_4 (npm run dev)"}}}"#,
        ]);
        let job = &out[0].background_jobs[0];
        assert_eq!(job.status, JobStatus::Killed);
        assert_eq!(job.command.as_deref(), Some("npm run dev"));
    }
}
