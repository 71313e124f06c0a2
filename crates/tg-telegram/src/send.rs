//! Outbound message helpers.
//!
//! Telegram's hard limit is 4096 characters per message; 4000 leaves room
//! for the `<pre>` wrapper and a trailing ellipsis. Terminal output is
//! ANSI-stripped, HTML-escaped, and chunked on line boundaries; when the
//! previous message in a chat was an output block and the combined text
//! still fits, the adapter edits it in place instead of posting again.

use tg_channels::format::{Formatter, HtmlFormatter};

/// Maximum characters per chunk (Telegram limit 4096, minus markup room).
pub const CHUNK_MAX: usize = 4000;

/// The last output message sent to a chat, kept for in-place edits.
#[derive(Debug, Clone)]
pub struct LastOutput {
    pub message_id: i32,
    /// Escaped text currently inside the message's `<pre>` block.
    pub text: String,
}

/// ANSI-strip and HTML-escape raw terminal output.
pub fn sanitize_output(raw: &str) -> String {
    let stripped = strip_ansi_escapes::strip(raw.as_bytes());
    let text = String::from_utf8_lossy(&stripped);
    HtmlFormatter.escape(&text)
}

/// Split already-escaped text into ≤ [`CHUNK_MAX`] chunks, preferring line
/// boundaries and force-splitting single oversized lines.
pub fn split_chunks(text: &str) -> Vec<String> {
    if text.len() <= CHUNK_MAX {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in text.split('\n') {
        let cost = if current.is_empty() { line.len() } else { 1 + line.len() };
        if !current.is_empty() && current.len() + cost > CHUNK_MAX {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    // Force-split any chunk that is still oversized (one huge line).
    let mut out = Vec::new();
    for chunk in chunks {
        if chunk.len() <= CHUNK_MAX {
            out.push(chunk);
            continue;
        }
        let mut rest = chunk.as_str();
        while rest.len() > CHUNK_MAX {
            let mut cut = CHUNK_MAX;
            while !rest.is_char_boundary(cut) {
                cut -= 1;
            }
            // Avoid splitting inside an HTML entity like &amp;.
            if let Some(amp) = rest[..cut].rfind('&') {
                if cut - amp < 6 && !rest[amp..cut].contains(';') {
                    cut = amp;
                }
            }
            out.push(rest[..cut].to_string());
            rest = &rest[cut..];
        }
        if !rest.is_empty() {
            out.push(rest.to_string());
        }
    }
    out
}

/// Wrap one escaped chunk for sending.
pub fn pre_block(escaped: &str) -> String {
    format!("<pre>{escaped}</pre>")
}

/// Decide whether new output can be merged into the previous message.
/// Returns the combined escaped text when it fits.
pub fn merge_into_last(last: &LastOutput, escaped_new: &str) -> Option<String> {
    let combined_len = last.text.len() + 1 + escaped_new.len();
    if combined_len <= CHUNK_MAX {
        Some(format!("{}\n{}", last.text, escaped_new))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_single_chunk() {
        assert_eq!(split_chunks("hello"), vec!["hello"]);
    }

    #[test]
    fn exactly_chunk_max_is_single_chunk() {
        let text = "a".repeat(CHUNK_MAX);
        assert_eq!(split_chunks(&text).len(), 1);
    }

    #[test]
    fn over_limit_splits_on_newline() {
        let line = "a".repeat(1500);
        let text = format!("{line}\n{line}\n{line}");
        let chunks = split_chunks(&text);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.len() <= CHUNK_MAX, "chunk too large: {}", c.len());
        }
    }

    #[test]
    fn huge_single_line_force_splits() {
        let text = "x".repeat(CHUNK_MAX * 2 + 17);
        let chunks = split_chunks(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.iter().map(String::len).sum::<usize>(), text.len());
    }

    #[test]
    fn force_split_avoids_breaking_entities() {
        let mut text = "y".repeat(CHUNK_MAX - 2);
        text.push_str("&amp;");
        text.push_str(&"z".repeat(50));
        let chunks = split_chunks(&text);
        for c in &chunks {
            // No chunk ends with a truncated entity.
            if let Some(amp) = c.rfind('&') {
                assert!(
                    c[amp..].contains(';') || c[amp..].len() >= 6,
                    "entity split across chunks: …{}",
                    &c[amp..]
                );
            }
        }
    }

    #[test]
    fn sanitize_strips_ansi_and_escapes() {
        let out = sanitize_output("\x1b[31mred\x1b[0m <tag>");
        assert_eq!(out, "red &lt;tag&gt;");
    }

    #[test]
    fn merge_respects_limit() {
        let last = LastOutput {
            message_id: 1,
            text: "a".repeat(CHUNK_MAX - 10),
        };
        assert!(merge_into_last(&last, "bbbbb").is_some());
        assert!(merge_into_last(&last, &"b".repeat(20)).is_none());
    }
}
