//! Tool identity: detection from argv and minimum-version gating.

use std::path::Path;

/// The four supported coding tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Claude,
    Codex,
    Pi,
    Kimi,
}

impl Tool {
    /// Detect the tool from argv[0]. Matches on the basename so both
    /// `claude` and `/usr/local/bin/claude` work.
    pub fn from_argv0(argv0: &str) -> Option<Self> {
        let base = Path::new(argv0)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(argv0);
        match base {
            "claude" => Some(Tool::Claude),
            "codex" => Some(Tool::Codex),
            "pi" => Some(Tool::Pi),
            "kimi" => Some(Tool::Kimi),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tool::Claude => "claude",
            Tool::Codex => "codex",
            Tool::Pi => "pi",
            Tool::Kimi => "kimi",
        }
    }

    /// Oldest tool version whose transcript dialect we understand.
    pub fn min_version(&self) -> (u64, u64, u64) {
        match self {
            Tool::Claude => (1, 0, 0),
            Tool::Codex => (0, 20, 0),
            Tool::Pi => (0, 9, 0),
            Tool::Kimi => (0, 3, 0),
        }
    }

    /// Claude reports approvals through hooks; everyone else gets their PTY
    /// output scanned for prompt patterns.
    pub fn uses_hooks(&self) -> bool {
        matches!(self, Tool::Claude)
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Pull the first `x.y.z` out of a `tool --version` output line.
pub fn parse_version(output: &str) -> Option<(u64, u64, u64)> {
    let mut digits = Vec::new();
    let mut current = String::new();
    for ch in output.chars() {
        if ch.is_ascii_digit() {
            current.push(ch);
        } else if ch == '.' && !current.is_empty() {
            digits.push(current.clone());
            current.clear();
        } else {
            if digits.len() >= 2 && !current.is_empty() {
                break;
            }
            digits.clear();
            current.clear();
        }
    }
    if !current.is_empty() {
        digits.push(current);
    }
    if digits.len() < 3 {
        return None;
    }
    Some((
        digits[0].parse().ok()?,
        digits[1].parse().ok()?,
        digits[2].parse().ok()?,
    ))
}

/// True when `found` satisfies `minimum` (semver-style triple compare).
pub fn meets_minimum(found: (u64, u64, u64), minimum: (u64, u64, u64)) -> bool {
    found >= minimum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_by_basename() {
        assert_eq!(Tool::from_argv0("claude"), Some(Tool::Claude));
        assert_eq!(Tool::from_argv0("/opt/homebrew/bin/codex"), Some(Tool::Codex));
        assert_eq!(Tool::from_argv0("vim"), None);
    }

    #[test]
    fn version_parse_variants() {
        assert_eq!(parse_version("1.0.35 (Claude Code)"), Some((1, 0, 35)));
        assert_eq!(parse_version("codex-cli 0.23.1"), Some((0, 23, 1)));
        assert_eq!(parse_version("v2.11.0"), Some((2, 11, 0)));
        assert_eq!(parse_version("nope"), None);
    }

    #[test]
    fn minimum_check() {
        assert!(meets_minimum((1, 2, 3), (1, 0, 0)));
        assert!(meets_minimum((1, 0, 0), (1, 0, 0)));
        assert!(!meets_minimum((0, 19, 9), (0, 20, 0)));
    }
}
