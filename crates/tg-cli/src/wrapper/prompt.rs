//! Approval-prompt detection in PTY output.
//!
//! Claude reports approvals through hooks; every other tool draws a TUI
//! dialog. The wrapper keeps a rolling ANSI-stripped tail of PTY output
//! and looks for a per-tool `{prompt text, option text}` pair; on a match
//! the numbered options are extracted and posted to the daemon (after a
//! short debounce, deduplicated by prompt).

use std::sync::OnceLock;

use regex::Regex;

use tg_transcript::tool::Tool;

/// Rolling PTY tail size the scanner sees.
pub const SCAN_BUFFER_MAX: usize = 2_000;

/// Debounce between identical prompts.
pub const PROMPT_DEBOUNCE_MS: u64 = 1_000;

/// The per-tool marker pair: `prompt_text` flags a dialog, `option_text`
/// confirms an option list follows.
pub struct PromptPatterns {
    pub prompt_text: &'static str,
    pub option_text: &'static str,
}

/// Patterns for tools that draw approval dialogs. Claude uses hooks.
pub fn patterns_for(tool: Tool) -> Option<PromptPatterns> {
    match tool {
        Tool::Claude => None,
        Tool::Codex => Some(PromptPatterns {
            prompt_text: "Allow command?",
            option_text: "1.",
        }),
        Tool::Pi => Some(PromptPatterns {
            prompt_text: "Approve this tool call?",
            option_text: "1.",
        }),
        Tool::Kimi => Some(PromptPatterns {
            prompt_text: "Do you want to allow",
            option_text: "1.",
        }),
    }
}

/// Markers that end an option list.
const FOOTER_MARKERS: &[&str] = &["Esc to cancel", "Press enter", "esc to interrupt", "↑/↓"];

fn option_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)[.)]\s+(.+?)\s*$").unwrap())
}

/// A detected approval dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedPrompt {
    pub prompt: String,
    pub options: Vec<String>,
}

/// Scan the rolling buffer for the newest approval dialog.
pub fn detect(buffer: &str, patterns: &PromptPatterns) -> Option<DetectedPrompt> {
    // Work from the LAST occurrence — the buffer may hold stale dialogs.
    let at = buffer.rfind(patterns.prompt_text)?;
    let after = &buffer[at..];
    if !after.contains(patterns.option_text) {
        return None;
    }

    let mut lines = after.lines();
    let prompt = lines.next().unwrap_or_default().trim().to_string();

    let mut options = Vec::new();
    let mut expected = 1;
    for line in lines {
        if FOOTER_MARKERS.iter().any(|m| line.contains(m)) {
            break;
        }
        if let Some(caps) = option_re().captures(line) {
            let number: usize = caps[1].parse().unwrap_or(0);
            // Option numbering restarts at 1 for a new dialog; accept only
            // the consecutive run.
            if number == expected {
                options.push(caps[2].to_string());
                expected += 1;
                continue;
            }
        }
        if !options.is_empty() && line.trim().is_empty() {
            break;
        }
    }

    if options.is_empty() {
        return None;
    }
    Some(DetectedPrompt { prompt, options })
}

/// Append PTY output to the rolling scan buffer, trimming the front.
pub fn push_scan_buffer(buffer: &mut String, stripped: &str) {
    buffer.push_str(stripped);
    if buffer.len() > SCAN_BUFFER_MAX {
        let excess = buffer.len() - SCAN_BUFFER_MAX;
        let mut cut = excess;
        while cut < buffer.len() && !buffer.is_char_boundary(cut) {
            cut += 1;
        }
        buffer.drain(..cut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIALOG: &str = "\
some earlier output
Allow command? npm install left-pad
  1. Yes
  2. Yes, and don't ask again for npm
  3. No
  Esc to cancel
";

    #[test]
    fn detects_numbered_options() {
        let patterns = patterns_for(Tool::Codex).unwrap();
        let found = detect(DIALOG, &patterns).unwrap();
        assert!(found.prompt.contains("Allow command?"));
        assert_eq!(
            found.options,
            vec!["Yes", "Yes, and don't ask again for npm", "No"]
        );
    }

    #[test]
    fn footer_stops_extraction() {
        let patterns = patterns_for(Tool::Codex).unwrap();
        let text = format!("{DIALOG}  4. stray line after footer\n");
        let found = detect(&text, &patterns).unwrap();
        assert_eq!(found.options.len(), 3);
    }

    #[test]
    fn uses_last_dialog_in_buffer() {
        let patterns = patterns_for(Tool::Codex).unwrap();
        let text = format!("{DIALOG}\nmore output\nAllow command? rm -rf /tmp/x\n  1. Yes\n  2. No\nPress enter\n");
        let found = detect(&text, &patterns).unwrap();
        assert!(found.prompt.contains("rm -rf"));
        assert_eq!(found.options.len(), 2);
    }

    #[test]
    fn no_options_no_detection() {
        let patterns = patterns_for(Tool::Codex).unwrap();
        assert!(detect("Allow command? something\nEsc to cancel\n", &patterns).is_none());
        assert!(detect("perfectly normal output", &patterns).is_none());
    }

    #[test]
    fn claude_has_no_patterns() {
        assert!(patterns_for(Tool::Claude).is_none());
    }

    #[test]
    fn scan_buffer_trims_front() {
        let mut buffer = String::new();
        push_scan_buffer(&mut buffer, &"a".repeat(SCAN_BUFFER_MAX));
        push_scan_buffer(&mut buffer, "TAIL");
        assert_eq!(buffer.len(), SCAN_BUFFER_MAX);
        assert!(buffer.ends_with("TAIL"));
    }
}
