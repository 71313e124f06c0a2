//! Event rendering for chat.
//!
//! Two modes per chat: compact (one-liners, noisy tools suppressed) and
//! verbose (everything, with truncated diffs and command heads).

use serde_json::Value;

use tg_channels::format::Formatter;
use tg_core::config::OutputMode;
use tg_sessions::BackgroundJobRecord;
use tg_transcript::{ToolCall, ToolResult};

/// Tool calls hidden entirely in compact mode.
const COMPACT_SUPPRESSED_CALLS: &[&str] = &["Bash", "bash", "exec_command", "write_stdin", "read_stdin"];

/// Tools whose successful results still show in compact mode.
const COMPACT_RESULT_TOOLS: &[&str] = &["WebSearch", "WebFetch", "web_search", "web_fetch"];

/// Verbose result bodies are clipped to keep chats readable.
const RESULT_CLIP: usize = 1_500;

pub fn render_tool_call(
    fmt: &dyn Formatter,
    call: &ToolCall,
    mode: OutputMode,
) -> Option<String> {
    match mode {
        OutputMode::Compact => render_call_compact(fmt, call),
        OutputMode::Verbose => Some(render_call_verbose(fmt, call)),
    }
}

fn render_call_compact(fmt: &dyn Formatter, call: &ToolCall) -> Option<String> {
    if COMPACT_SUPPRESSED_CALLS.contains(&call.name.as_str()) {
        return None;
    }
    let line = match call.name.as_str() {
        "Edit" | "Write" | "edit" | "write_file" | "patch_file" => {
            format!("✏️ {}", input_str(call, &["file_path", "path", "file"]))
        }
        "Read" | "read_file" => format!("📖 {}", input_str(call, &["file_path", "path", "file"])),
        "WebSearch" | "web_search" => format!("🔎 {}", input_str(call, &["query"])),
        "WebFetch" | "web_fetch" => format!("🌐 {}", input_str(call, &["url"])),
        "Task" | "spawn_agent" => {
            format!("🤖 {}", input_str(call, &["description", "prompt", "agent"]))
        }
        "Grep" | "Glob" | "search_files" | "list_files" => {
            format!("🔍 {}", input_str(call, &["pattern", "query", "glob"]))
        }
        _ => format!("🔧 {}", call.name),
    };
    Some(fmt.escape(&line))
}

fn render_call_verbose(fmt: &dyn Formatter, call: &ToolCall) -> String {
    match call.name.as_str() {
        "Bash" | "bash" | "exec_command" => {
            let command = input_str(call, &["command", "cmd", "script"]);
            let head: Vec<&str> = command.lines().take(3).collect();
            let shown = if command.lines().count() > 3 {
                format!("{}\n…", head.join("\n"))
            } else {
                head.join("\n")
            };
            format!("{}\n{}", fmt.bold(&call.name), fmt.pre(&shown))
        }
        "Edit" | "edit" => {
            let file = input_str(call, &["file_path", "path", "file"]);
            let old = clip_lines(&input_str(call, &["old_string", "old"]), 6);
            let new = clip_lines(&input_str(call, &["new_string", "new"]), 6);
            format!(
                "{} {}\n{}",
                fmt.bold("Edit"),
                fmt.code(&file),
                fmt.pre(&format!("- {old}\n+ {new}"))
            )
        }
        "Write" | "write_file" => {
            let file = input_str(call, &["file_path", "path", "file"]);
            let content = clip_lines(&input_str(call, &["content", "text"]), 8);
            format!("{} {}\n{}", fmt.bold("Write"), fmt.code(&file), fmt.pre(&content))
        }
        _ => {
            let args = serde_json::to_string(&call.input).unwrap_or_default();
            let clipped = clip_chars(&args, 200);
            format!("{} {}", fmt.bold(&call.name), fmt.code(&clipped))
        }
    }
}

pub fn render_tool_result(
    fmt: &dyn Formatter,
    result: &ToolResult,
    mode: OutputMode,
) -> Option<String> {
    if mode == OutputMode::Compact {
        let allowed = result.is_error
            || result
                .tool_name
                .as_deref()
                .map(|n| COMPACT_RESULT_TOOLS.contains(&n))
                .unwrap_or(false);
        if !allowed {
            return None;
        }
    }

    let mut body = clip_chars(result.content.trim(), RESULT_CLIP);
    if body.is_empty() {
        body = "(no output)".into();
    }

    let mut out = if result.is_error {
        format!("⚠️ {}\n{}", fmt.bold("error"), fmt.pre(&body))
    } else {
        fmt.pre(&body)
    };
    for url in &result.urls {
        out.push('\n');
        out.push_str(&fmt.link(url, url));
    }
    Some(out)
}

/// The pinned "currently running background jobs" board body.
pub fn render_jobs_board(fmt: &dyn Formatter, jobs: &[BackgroundJobRecord]) -> String {
    let mut out = fmt.bold("Background jobs");
    for job in jobs {
        out.push('\n');
        let label = job.command.as_deref().unwrap_or(job.task_id.as_str());
        out.push_str(&format!("▶ {}", fmt.code(&clip_chars(label, 80))));
        for url in &job.urls {
            out.push(' ');
            out.push_str(&fmt.link(url, url));
        }
    }
    out
}

fn input_str(call: &ToolCall, keys: &[&str]) -> String {
    for key in keys {
        match call.input.get(key) {
            Some(Value::String(s)) => return s.clone(),
            Some(Value::Array(parts)) => {
                let joined: Vec<&str> = parts.iter().filter_map(Value::as_str).collect();
                if !joined.is_empty() {
                    return joined.join(" ");
                }
            }
            _ => {}
        }
    }
    String::new()
}

fn clip_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().take(max_lines).collect();
    if text.lines().count() > max_lines {
        format!("{}\n…", lines.join("\n"))
    } else {
        lines.join("\n")
    }
}

fn clip_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_channels::format::HtmlFormatter;

    fn call(name: &str, input: serde_json::Value) -> ToolCall {
        ToolCall {
            id: None,
            name: name.into(),
            input,
        }
    }

    #[test]
    fn compact_suppresses_bash() {
        let c = call("Bash", serde_json::json!({"command": "ls"}));
        assert!(render_tool_call(&HtmlFormatter, &c, OutputMode::Compact).is_none());
        assert!(render_tool_call(&HtmlFormatter, &c, OutputMode::Verbose).is_some());
    }

    #[test]
    fn compact_edit_is_one_liner() {
        let c = call("Edit", serde_json::json!({"file_path": "src/foo.ts"}));
        let out = render_tool_call(&HtmlFormatter, &c, OutputMode::Compact).unwrap();
        assert_eq!(out, "✏️ src/foo.ts");
    }

    #[test]
    fn verbose_bash_clips_command() {
        let c = call(
            "Bash",
            serde_json::json!({"command": "a\nb\nc\nd\ne"}),
        );
        let out = render_tool_call(&HtmlFormatter, &c, OutputMode::Verbose).unwrap();
        assert!(out.contains("a\nb\nc\n…"));
        assert!(!out.contains("\nd"));
    }

    #[test]
    fn compact_result_rules() {
        let ok = ToolResult {
            tool_use_id: None,
            tool_name: Some("Bash".into()),
            content: "done".into(),
            is_error: false,
            urls: vec![],
        };
        assert!(render_tool_result(&HtmlFormatter, &ok, OutputMode::Compact).is_none());
        assert!(render_tool_result(&HtmlFormatter, &ok, OutputMode::Verbose).is_some());

        let err = ToolResult { is_error: true, ..ok.clone() };
        assert!(render_tool_result(&HtmlFormatter, &err, OutputMode::Compact).is_some());

        let web = ToolResult {
            tool_name: Some("WebFetch".into()),
            ..ok
        };
        assert!(render_tool_result(&HtmlFormatter, &web, OutputMode::Compact).is_some());
    }

    #[test]
    fn result_appends_urls_as_links() {
        let r = ToolResult {
            tool_use_id: None,
            tool_name: Some("Bash".into()),
            content: "serving".into(),
            is_error: false,
            urls: vec!["http://localhost:3000".into()],
        };
        let out = render_tool_result(&HtmlFormatter, &r, OutputMode::Verbose).unwrap();
        assert!(out.contains("<a href=\"http://localhost:3000\">"));
    }

    #[test]
    fn jobs_board_lists_commands() {
        let jobs = vec![BackgroundJobRecord {
            task_id: "t1".into(),
            status: tg_sessions::JobStatus::Running,
            command: Some("npm run dev".into()),
            urls: vec!["http://localhost:5173".into()],
            updated_at: "2026-08-01T10:00:00Z".into(),
        }];
        let out = render_jobs_board(&HtmlFormatter, &jobs);
        assert!(out.contains("npm run dev"));
        assert!(out.contains("localhost:5173"));
    }
}
