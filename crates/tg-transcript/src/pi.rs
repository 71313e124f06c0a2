//! PI transcript dialect.
//!
//! One record family: `{"type":"message","message":{...}}` where the inner
//! role is `assistant` (text, thinking, toolCall blocks) or `toolResult`.

use serde_json::Value;

use crate::events::{ParsedLine, ToolCall, ToolResult};
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

    match message.get("role").and_then(Value::as_str) {
        Some("assistant") => decode_assistant(message, state, &mut out),
        Some("toolResult") => decode_tool_result(message, state, &mut out),
        _ => {}
    }
    Some(out)
}

fn decode_assistant(message: &Value, state: &mut ParserState, out: &mut ParsedLine) {
    let Some(blocks) = message.get("content").and_then(Value::as_array) else {
        // Some records carry a bare string.
        let text = content_text(message.get("content").unwrap_or(&Value::Null));
        if !text.is_empty() {
            out.assistant_text = Some(text);
        }
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
                if let Some(t) = block
                    .get("thinking")
                    .and_then(Value::as_str)
                    .or_else(|| block.get("text").and_then(Value::as_str))
                {
                    if !thinking.is_empty() {
                        thinking.push('\n');
                    }
                    thinking.push_str(t);
                }
            }
            Some("toolCall") => {
                let name = block
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let id = block.get("id").and_then(Value::as_str);
                let input = block
                    .get("arguments")
                    .cloned()
                    .or_else(|| block.get("input").cloned())
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

fn decode_tool_result(message: &Value, state: &mut ParserState, out: &mut ParsedLine) {
    let tool_use_id = message
        .get("toolCallId")
        .and_then(Value::as_str)
        .map(str::to_string);
    let content = content_text(message.get("content").unwrap_or(&Value::Null));
    let is_error = message
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let tool_name = message
        .get("toolName")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| tool_use_id.as_deref().and_then(|id| state.name_for(id)));
    let command = tool_use_id
        .as_deref()
        .and_then(|id| state.input_for(id))
        .and_then(command_of_input);

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
        let mut p = Parser::new(Tool::Pi);
        lines.iter().filter_map(|l| p.parse_line(l)).collect()
    }

    #[test]
    fn assistant_blocks() {
        let out = parse(&[
            r#"{"type":"message","message":{"role":"assistant","content":[{"type":"thinking","thinking":"let me look"},{"type":"text","text":"Found it."}]}}"#,
        ]);
        assert_eq!(out[0].assistant_text.as_deref(), Some("Found it."));
        assert_eq!(out[0].thinking.as_deref(), Some("let me look"));
    }

    #[test]
    fn tool_call_then_result() {
        let out = parse(&[
            r#"{"type":"message","message":{"role":"assistant","content":[{"type":"toolCall","id":"p1","name":"bash","arguments":{"command":"ls"}}]}}"#,
            r#"{"type":"message","message":{"role":"toolResult","toolCallId":"p1","content":[{"type":"text","text":"main.rs"}],"isError":false}}"#,
        ]);
        assert_eq!(out[0].tool_calls[0].name, "bash");
        let result = &out[1].tool_results[0];
        assert_eq!(result.tool_name.as_deref(), Some("bash"));
        assert_eq!(result.content, "main.rs");
        assert!(result.should_forward());
    }

    #[test]
    fn result_tool_name_field_wins() {
        let out = parse(&[
            r#"{"type":"message","message":{"role":"toolResult","toolCallId":"px","toolName":"read_file","content":"...","isError":true}}"#,
        ]);
        assert_eq!(out[0].tool_results[0].tool_name.as_deref(), Some("read_file"));
        assert!(out[0].tool_results[0].is_error);
    }
}
