//! Transcript discovery and incremental tailing.
//!
//! The tool writes its transcript on its own schedule; the wrapper waits
//! for the file to appear, then reads appended bytes on watcher events
//! with a 2 s fallback poll. Truncation resets cleanly. Claude rolls over
//! to a fresh file mid-session; when a newer file's head carries the
//! active session id the tailer switches to it.

use std::collections::HashSet;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use tg_transcript::discover::Discovery;
use tg_transcript::tool::Tool;
use tg_transcript::{ParsedLine, Parser};

/// How long the wrapper waits for a transcript to appear after spawn.
pub const DISCOVERY_WINDOW: Duration = Duration::from_secs(30);
/// Poll cadence during discovery.
pub const DISCOVERY_POLL: Duration = Duration::from_millis(500);
/// Fallback poll cadence while tailing.
pub const TAIL_FALLBACK_POLL: Duration = Duration::from_secs(2);
/// Lines of a new file inspected for the rollover session id.
const ROLLOVER_HEAD_LINES: usize = 80;

/// Incremental reader over one transcript file.
pub struct Tailer {
    path: PathBuf,
    offset: u64,
    partial: String,
    parser: Parser,
    /// The tool's own session id, learned from parsed lines.
    pub active_session_id: Option<String>,
}

impl Tailer {
    pub fn new(tool: Tool, path: PathBuf) -> Self {
        Self {
            path,
            offset: 0,
            partial: String::new(),
            parser: Parser::new(tool),
            active_session_id: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Switch to a rollover file, keeping parser state.
    pub fn switch_to(&mut self, path: PathBuf) {
        info!(from = %self.path.display(), to = %path.display(), "transcript rollover");
        self.path = path;
        self.offset = 0;
        self.partial.clear();
    }

    /// Read `[offset, len)`, split on newlines, parse complete lines. The
    /// trailing partial line waits for the next tick. A shrunken file
    /// resets the offset and drops the partial buffer.
    pub fn drain(&mut self) -> Vec<ParsedLine> {
        let Ok(metadata) = fs::metadata(&self.path) else {
            return Vec::new();
        };
        let len = metadata.len();
        if len < self.offset {
            debug!(path = %self.path.display(), "transcript truncated, resetting");
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Vec::new();
        }

        let Ok(mut file) = fs::File::open(&self.path) else {
            return Vec::new();
        };
        if file.seek(SeekFrom::Start(self.offset)).is_err() {
            return Vec::new();
        }
        let mut chunk = Vec::with_capacity((len - self.offset) as usize);
        if file.take(len - self.offset).read_to_end(&mut chunk).is_err() {
            return Vec::new();
        }
        self.offset = len;

        let text = format!("{}{}", self.partial, String::from_utf8_lossy(&chunk));
        let mut lines: Vec<&str> = text.split('\n').collect();
        self.partial = lines.pop().unwrap_or_default().to_string();

        let mut out = Vec::new();
        for line in lines {
            if let Some(parsed) = self.parser.parse_line(line) {
                if let Some(ref sid) = parsed.session_id {
                    self.active_session_id = Some(sid.clone());
                }
                out.push(parsed);
            }
        }
        out
    }
}

/// Snapshot the transcript files that already exist before spawn.
pub fn snapshot_existing(discovery: &Discovery, tool: Tool, cwd: &str) -> HashSet<PathBuf> {
    discovery.list_transcripts(tool, cwd).into_iter().collect()
}

/// Wait for a transcript that was not in `preexisting` to appear. On
/// resume the matching existing file is pre-selected by the caller, which
/// skips this wait entirely.
pub async fn await_new_transcript(
    discovery: &Discovery,
    tool: Tool,
    cwd: &str,
    preexisting: &HashSet<PathBuf>,
) -> Option<PathBuf> {
    let deadline = tokio::time::Instant::now() + DISCOVERY_WINDOW;
    loop {
        for path in discovery.list_transcripts(tool, cwd) {
            if !preexisting.contains(&path) {
                info!(path = %path.display(), "transcript found");
                return Some(path);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(DISCOVERY_POLL).await;
    }
}

/// Pre-select the existing transcript matching a resume ref.
pub fn transcript_for_resume(
    discovery: &Discovery,
    tool: Tool,
    cwd: &str,
    resume_ref: &str,
) -> Option<PathBuf> {
    if tool == Tool::Codex {
        return discovery.find_codex_transcript(Some(resume_ref));
    }
    discovery
        .list_transcripts(tool, cwd)
        .into_iter()
        .find(|p| p.to_string_lossy().contains(resume_ref))
}

/// Look for a rollover file: newer than the current one, head mentions the
/// active session id. `known` accumulates files already checked.
pub fn find_rollover(
    discovery: &Discovery,
    tool: Tool,
    cwd: &str,
    current: &Path,
    session_id: &str,
    known: &mut HashSet<PathBuf>,
) -> Option<PathBuf> {
    for path in discovery.list_transcripts(tool, cwd) {
        if path == current || known.contains(&path) {
            continue;
        }
        known.insert(path.clone());
        if head_contains(&path, session_id) {
            return Some(path);
        }
    }
    None
}

fn head_contains(path: &Path, needle: &str) -> bool {
    let Ok(file) = fs::File::open(path) else {
        return false;
    };
    let reader = std::io::BufReader::new(file);
    use std::io::BufRead;
    for line in reader.lines().map_while(Result::ok).take(ROLLOVER_HEAD_LINES) {
        if line.contains(needle) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_line(path: &Path, line: &str) {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        writeln!(f, "{line}").unwrap();
    }

    #[test]
    fn drains_complete_lines_and_buffers_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        let mut tailer = Tailer::new(Tool::Claude, path.clone());

        write_line(
            &path,
            r#"{"type":"assistant","sessionId":"s1","message":{"content":[{"type":"text","text":"one"}]}}"#,
        );
        // A partial line without trailing newline stays buffered.
        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(f, r#"{{"type":"assistant","mes"#).unwrap();
        drop(f);

        let events = tailer.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].assistant_text.as_deref(), Some("one"));
        assert_eq!(tailer.active_session_id.as_deref(), Some("s1"));

        // Completing the partial line yields exactly one more event.
        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(
            f,
            r#"sage":{{"content":[{{"type":"text","text":"two"}}]}}}}"#
        )
        .unwrap();
        drop(f);
        let events = tailer.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].assistant_text.as_deref(), Some("two"));
    }

    #[test]
    fn truncation_resets_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        let mut tailer = Tailer::new(Tool::Claude, path.clone());

        write_line(
            &path,
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"before"}]}}"#,
        );
        assert_eq!(tailer.drain().len(), 1);

        // Truncate and write fresh content.
        fs::write(&path, "").unwrap();
        write_line(
            &path,
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"after"}]}}"#,
        );
        let events = tailer.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].assistant_text.as_deref(), Some("after"));
    }

    #[test]
    fn rollover_detection_by_head() {
        let home = tempfile::tempdir().unwrap();
        let discovery = Discovery::with_home(home.path());
        let dir = discovery.transcript_dir(Tool::Claude, "/work/repo");
        fs::create_dir_all(&dir).unwrap();

        let first = dir.join("a.jsonl");
        write_line(&first, r#"{"type":"assistant","sessionId":"sess-1","message":{}}"#);
        let second = dir.join("b.jsonl");
        write_line(&second, r#"{"type":"assistant","sessionId":"sess-1","message":{}}"#);
        let unrelated = dir.join("c.jsonl");
        write_line(&unrelated, r#"{"type":"assistant","sessionId":"other","message":{}}"#);

        let mut known = HashSet::new();
        let found = find_rollover(&discovery, Tool::Claude, "/work/repo", &first, "sess-1", &mut known);
        assert_eq!(found, Some(second));

        // Already-checked files are not re-read.
        let again = find_rollover(&discovery, Tool::Claude, "/work/repo", &first, "sess-1", &mut known);
        assert_eq!(again, None);
    }
}
