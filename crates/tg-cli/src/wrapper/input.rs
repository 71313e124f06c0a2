//! Queued-input interpretation: sentinel frames become synthesized
//! keystrokes, plain text becomes a bracketed paste.

/// One parsed input line from the daemon's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLine {
    /// `POLL:<ids>:<multi>` — select options in the tool's dialog.
    PollSelect { ids: Vec<usize>, multi: bool },
    /// `POLL_NEXT:<pos>:<count>` — navigate to the "Next" entry.
    PollNext { pos: usize, count: usize },
    /// `POLL_SUBMIT` — confirm a multi-select.
    PollSubmit,
    /// `POLL_OTHER` — free-form answer follows as plain text.
    PollOther,
    Text(String),
}

impl InputLine {
    pub fn parse(raw: &str) -> Self {
        if raw == "POLL_SUBMIT" {
            return InputLine::PollSubmit;
        }
        if raw == "POLL_OTHER" {
            return InputLine::PollOther;
        }
        if let Some(rest) = raw.strip_prefix("POLL_NEXT:") {
            if let Some((pos, count)) = rest.split_once(':') {
                if let (Ok(pos), Ok(count)) = (pos.parse(), count.parse()) {
                    return InputLine::PollNext { pos, count };
                }
            }
        }
        if let Some(rest) = raw.strip_prefix("POLL:") {
            if let Some((ids, multi)) = rest.rsplit_once(':') {
                let parsed: Option<Vec<usize>> =
                    ids.split(',').map(|i| i.parse().ok()).collect();
                if let (Some(ids), Ok(multi)) = (parsed, multi.parse::<bool>()) {
                    return InputLine::PollSelect { ids, multi };
                }
            }
        }
        InputLine::Text(raw.to_string())
    }
}

const DOWN: &str = "\x1b[B";
const ENTER: &str = "\r";

/// The byte sequence to write to the PTY for one input line.
pub fn keys_for(line: &InputLine) -> Vec<u8> {
    let mut out = String::new();
    match line {
        InputLine::PollSelect { ids, multi: false } => {
            // Single select: move down to the option, Enter submits.
            if let Some(&target) = ids.first() {
                for _ in 0..target {
                    out.push_str(DOWN);
                }
                out.push_str(ENTER);
            }
        }
        InputLine::PollSelect { ids, multi: true } => {
            // Multi select: toggle each option; submission is a separate
            // POLL_SUBMIT frame.
            let mut sorted = ids.clone();
            sorted.sort_unstable();
            let mut position = 0;
            for target in sorted {
                for _ in position..target {
                    out.push_str(DOWN);
                }
                position = target;
                out.push_str(ENTER);
            }
        }
        InputLine::PollNext { pos, .. } => {
            for _ in 0..*pos {
                out.push_str(DOWN);
            }
            out.push_str(ENTER);
        }
        InputLine::PollSubmit => out.push_str(ENTER),
        InputLine::PollOther => {}
        InputLine::Text(text) => {
            // Bracketed paste with control escapes stripped; the second
            // Enter lands the input in editors that treat the first as a
            // newline.
            out.push_str("\x1b[200~");
            out.push_str(&strip_controls(text));
            out.push_str("\x1b[201~");
            out.push_str(ENTER);
            out.push_str(ENTER);
        }
    }
    out.into_bytes()
}

/// Remove ANSI escape sequences and control characters (newline and tab
/// survive) so pasted text cannot smuggle keystrokes.
pub fn strip_controls(text: &str) -> String {
    let stripped = strip_ansi_escapes::strip(text.as_bytes());
    String::from_utf8_lossy(&stripped)
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sentinels() {
        assert_eq!(
            InputLine::parse("POLL:2:false"),
            InputLine::PollSelect { ids: vec![2], multi: false }
        );
        assert_eq!(
            InputLine::parse("POLL:0,3:true"),
            InputLine::PollSelect { ids: vec![0, 3], multi: true }
        );
        assert_eq!(
            InputLine::parse("POLL_NEXT:8:20"),
            InputLine::PollNext { pos: 8, count: 20 }
        );
        assert_eq!(InputLine::parse("POLL_SUBMIT"), InputLine::PollSubmit);
        assert_eq!(InputLine::parse("POLL_OTHER"), InputLine::PollOther);
        assert_eq!(
            InputLine::parse("just text"),
            InputLine::Text("just text".into())
        );
        // Malformed sentinels fall back to literal text.
        assert_eq!(
            InputLine::parse("POLL:x:maybe"),
            InputLine::Text("POLL:x:maybe".into())
        );
    }

    #[test]
    fn single_select_keys() {
        let keys = keys_for(&InputLine::PollSelect { ids: vec![2], multi: false });
        assert_eq!(keys, b"\x1b[B\x1b[B\r");
    }

    #[test]
    fn multi_select_has_no_final_enter() {
        let keys = keys_for(&InputLine::PollSelect { ids: vec![0, 2], multi: true });
        // Toggle 0 (Enter), two Downs, toggle 2 (Enter) — no submit Enter.
        assert_eq!(keys, b"\r\x1b[B\x1b[B\r");
    }

    #[test]
    fn text_is_bracketed_with_double_enter() {
        let keys = keys_for(&InputLine::Text("fix the test".into()));
        let s = String::from_utf8(keys).unwrap();
        assert!(s.starts_with("\x1b[200~fix the test\x1b[201~"));
        assert!(s.ends_with("\r\r"));
    }

    #[test]
    fn paste_strips_escapes_but_keeps_newlines() {
        let cleaned = strip_controls("line1\n\x1b[31mred\x1b[0m\tdone\x07");
        assert_eq!(cleaned, "line1\nred\tdone");
    }

    #[test]
    fn poll_other_emits_nothing() {
        assert!(keys_for(&InputLine::PollOther).is_empty());
    }
}
