//! Resume-reference extraction and argv rewriting for restarts.
//!
//! Each tool spells "resume this session" differently; restarting a wrapper
//! means stripping whatever resume/continue flags were present and
//! appending the canonical form with the new ref. Rewriting is idempotent:
//! rewriting an already-rewritten argv for the same ref changes nothing.

use crate::tool::Tool;

/// Characters that must never appear in a session ref — it ends up in an
/// argv that may be logged and re-parsed.
const UNSAFE: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '!', '#', '<', '>', '\\', '\'', '"',
];

/// Reject refs containing shell-significant characters.
pub fn is_safe_session_ref(s: &str) -> bool {
    !s.is_empty() && !s.contains(UNSAFE)
}

/// Claude: `--resume/-r [ref]`, `--continue/-c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaudeResume {
    pub base_args: Vec<String>,
    pub resume_id: Option<String>,
    pub use_continue: bool,
}

/// Codex: `resume [id]` subcommand, `--resume[=]<id>`, `--last`, plus the
/// `exec` / `--json` one-shot flags that make no sense on an interactive
/// restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodexResume {
    pub base_args: Vec<String>,
    pub resume_id: Option<String>,
    pub use_resume_last: bool,
}

/// PI: `--session <id>`, `--resume/-r <id>`, `--continue/-c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiResume {
    pub base_args: Vec<String>,
    pub session_id: Option<String>,
    pub use_continue: bool,
}

/// Kimi: `--session/-S <id>`, `--continue/-C`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KimiResume {
    pub base_args: Vec<String>,
    pub session_id: Option<String>,
    pub use_continue: bool,
}

/// True when `arg` is a flag (so it cannot be a flag's value).
fn is_flag(arg: &str) -> bool {
    arg.starts_with('-')
}

pub fn parse_claude_args(args: &[String]) -> ClaudeResume {
    let mut base_args = Vec::new();
    let mut resume_id = None;
    let mut use_continue = false;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--continue" | "-c" => use_continue = true,
            "--resume" | "-r" => {
                if let Some(next) = args.get(i + 1) {
                    if !is_flag(next) {
                        resume_id = Some(next.clone());
                        i += 1;
                    }
                }
            }
            _ if arg.starts_with("--resume=") => {
                resume_id = Some(arg["--resume=".len()..].to_string());
            }
            _ => base_args.push(args[i].clone()),
        }
        i += 1;
    }

    ClaudeResume {
        base_args,
        resume_id,
        use_continue,
    }
}

pub fn parse_codex_args(args: &[String]) -> CodexResume {
    let mut base_args = Vec::new();
    let mut resume_id = None;
    let mut use_resume_last = false;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "resume" => {
                if let Some(next) = args.get(i + 1) {
                    if !is_flag(next) {
                        resume_id = Some(next.clone());
                        i += 1;
                    }
                }
            }
            "--resume" => {
                if let Some(next) = args.get(i + 1) {
                    if !is_flag(next) {
                        resume_id = Some(next.clone());
                        i += 1;
                    }
                }
            }
            "--last" => use_resume_last = true,
            "exec" | "--json" => {}
            _ if arg.starts_with("--resume=") => {
                resume_id = Some(arg["--resume=".len()..].to_string());
            }
            _ => base_args.push(args[i].clone()),
        }
        i += 1;
    }

    CodexResume {
        base_args,
        resume_id,
        use_resume_last,
    }
}

pub fn parse_pi_args(args: &[String]) -> PiResume {
    let mut base_args = Vec::new();
    let mut session_id = None;
    let mut use_continue = false;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--continue" | "-c" => use_continue = true,
            "--session" | "--resume" | "-r" => {
                if let Some(next) = args.get(i + 1) {
                    if !is_flag(next) {
                        session_id = Some(next.clone());
                        i += 1;
                    }
                }
            }
            _ if arg.starts_with("--session=") => {
                session_id = Some(arg["--session=".len()..].to_string());
            }
            _ => base_args.push(args[i].clone()),
        }
        i += 1;
    }

    PiResume {
        base_args,
        session_id,
        use_continue,
    }
}

pub fn parse_kimi_args(args: &[String]) -> KimiResume {
    let mut base_args = Vec::new();
    let mut session_id = None;
    let mut use_continue = false;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--continue" | "-C" => use_continue = true,
            "--session" | "-S" => {
                if let Some(next) = args.get(i + 1) {
                    if !is_flag(next) {
                        session_id = Some(next.clone());
                        i += 1;
                    }
                }
            }
            _ if arg.starts_with("--session=") => {
                session_id = Some(arg["--session=".len()..].to_string());
            }
            _ => base_args.push(args[i].clone()),
        }
        i += 1;
    }

    KimiResume {
        base_args,
        session_id,
        use_continue,
    }
}

/// The resume ref already present in a session's argv, used by `/restart`.
pub fn extract_resume_ref(tool: Tool, args: &[String]) -> Option<String> {
    match tool {
        Tool::Claude => parse_claude_args(args).resume_id,
        Tool::Codex => parse_codex_args(args).resume_id,
        Tool::Pi => parse_pi_args(args).session_id,
        Tool::Kimi => parse_kimi_args(args).session_id,
    }
}

/// Rewrite `args` so the tool resumes `session_ref` on its next launch.
///
/// Refs failing [`is_safe_session_ref`] are rejected.
pub fn build_resume_command_args(
    tool: Tool,
    args: &[String],
    session_ref: &str,
) -> Result<Vec<String>, String> {
    if !is_safe_session_ref(session_ref) {
        return Err(format!("invalid session reference: {session_ref}"));
    }

    let mut out = match tool {
        Tool::Claude => parse_claude_args(args).base_args,
        Tool::Codex => parse_codex_args(args).base_args,
        Tool::Pi => parse_pi_args(args).base_args,
        Tool::Kimi => parse_kimi_args(args).base_args,
    };

    match tool {
        Tool::Claude => {
            out.push("--resume".into());
            out.push(session_ref.into());
        }
        Tool::Codex => {
            out.push("resume".into());
            out.push(session_ref.into());
        }
        Tool::Pi | Tool::Kimi => {
            out.push("--session".into());
            out.push(session_ref.into());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn codex_resume_subcommand_form() {
        let parsed = parse_codex_args(&argv(&[
            "--dangerously-bypass-approvals-and-sandbox",
            "resume",
            "019c56ac-417b-7180-bd3f-2ed6e25885e3",
        ]));
        assert_eq!(
            parsed,
            CodexResume {
                base_args: argv(&["--dangerously-bypass-approvals-and-sandbox"]),
                resume_id: Some("019c56ac-417b-7180-bd3f-2ed6e25885e3".into()),
                use_resume_last: false,
            }
        );
    }

    #[test]
    fn codex_strips_exec_json_last() {
        let parsed = parse_codex_args(&argv(&["exec", "--json", "--last", "--model", "o4"]));
        assert_eq!(parsed.base_args, argv(&["--model", "o4"]));
        assert!(parsed.use_resume_last);
    }

    #[test]
    fn kimi_session_extraction() {
        let parsed = parse_kimi_args(&argv(&[
            "--model",
            "kimi-k2",
            "--session",
            "b6e5f0a5-1c85-4d8f-9dd6-5f4f18cb0f30",
            "--yolo",
        ]));
        assert_eq!(
            parsed,
            KimiResume {
                base_args: argv(&["--model", "kimi-k2", "--yolo"]),
                session_id: Some("b6e5f0a5-1c85-4d8f-9dd6-5f4f18cb0f30".into()),
                use_continue: false,
            }
        );
    }

    #[test]
    fn claude_restart_rewrite() {
        let rewritten = build_resume_command_args(
            Tool::Claude,
            &argv(&[
                "--dangerously-skip-permissions",
                "--resume",
                "old-id",
                "--append-system-prompt",
                "AGENTS.md",
            ]),
            "new-id",
        )
        .unwrap();

        assert!(rewritten.contains(&"--dangerously-skip-permissions".to_string()));
        assert!(rewritten.contains(&"--append-system-prompt".to_string()));
        assert!(rewritten.contains(&"AGENTS.md".to_string()));
        assert!(!rewritten.contains(&"old-id".to_string()));
        assert_eq!(&rewritten[rewritten.len() - 2..], &argv(&["--resume", "new-id"]));
    }

    #[test]
    fn rewrite_is_idempotent() {
        // Rewriting an already-resumed argv for the same ref is a no-op.
        for tool in [Tool::Claude, Tool::Codex, Tool::Pi, Tool::Kimi] {
            let first =
                build_resume_command_args(tool, &argv(&["--verbose"]), "ref-1").unwrap();
            let second = build_resume_command_args(tool, &first, "ref-1").unwrap();
            assert_eq!(first, second, "not idempotent for {tool}");
        }
    }

    #[test]
    fn claude_continue_flag_is_stripped() {
        let rewritten =
            build_resume_command_args(Tool::Claude, &argv(&["-c", "--verbose"]), "abc").unwrap();
        assert_eq!(rewritten, argv(&["--verbose", "--resume", "abc"]));
    }

    #[test]
    fn unsafe_refs_rejected() {
        for bad in [
            "x;rm -rf", "a|b", "a`b`", "$(id)", "a&b", "a>b", "a<b", "a\\b", "a'b", "a\"b",
            "a#b", "a!b", "a{b}", "a(b)",
        ] {
            assert!(
                build_resume_command_args(Tool::Claude, &[], bad).is_err(),
                "accepted unsafe ref {bad:?}"
            );
        }
        assert!(build_resume_command_args(Tool::Claude, &[], "019c56ac-417b").is_ok());
    }

    #[test]
    fn extract_ref_per_tool() {
        assert_eq!(
            extract_resume_ref(Tool::Claude, &argv(&["--resume", "r1"])),
            Some("r1".into())
        );
        assert_eq!(
            extract_resume_ref(Tool::Codex, &argv(&["resume", "r2"])),
            Some("r2".into())
        );
        assert_eq!(
            extract_resume_ref(Tool::Pi, &argv(&["--session", "r3"])),
            Some("r3".into())
        );
        assert_eq!(
            extract_resume_ref(Tool::Kimi, &argv(&["-S", "r4"])),
            Some("r4".into())
        );
        assert_eq!(extract_resume_ref(Tool::Claude, &argv(&["--continue"])), None);
    }
}
