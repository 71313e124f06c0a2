//! Transcript discovery.
//!
//! Each tool writes transcripts under its own home-relative tree with its
//! own per-cwd encoding. These are read-only paths — the tool owns them.
//!
//! | Tool | Location |
//! |------|----------|
//! | Claude | `~/.claude/projects/<cwd with / → ->/…*.jsonl` |
//! | PI | `~/.pi/agent/sessions/--<cwd minus leading /, / → ->--/…*.jsonl` |
//! | Kimi | `~/.kimi/sessions/<md5(cwd)>/<session-id>/wire.jsonl` |
//! | Codex | `~/.codex/sessions/YYYY/MM/DD/…*.jsonl`, dated walk |

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::tool::Tool;

/// Locates transcript files. Rooted at the user's home directory; tests
/// point it at a tempdir.
#[derive(Debug, Clone)]
pub struct Discovery {
    home: PathBuf,
}

impl Discovery {
    pub fn new() -> Option<Self> {
        dirs::home_dir().map(|home| Self { home })
    }

    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// The directory the tool writes transcripts for `cwd` into. For Codex
    /// this is the sessions root — Codex organizes by date, not by cwd.
    pub fn transcript_dir(&self, tool: Tool, cwd: &str) -> PathBuf {
        match tool {
            Tool::Claude => self
                .home
                .join(".claude")
                .join("projects")
                .join(encode_claude_cwd(cwd)),
            Tool::Pi => self
                .home
                .join(".pi")
                .join("agent")
                .join("sessions")
                .join(encode_pi_cwd(cwd)),
            Tool::Kimi => self
                .home
                .join(".kimi")
                .join("sessions")
                .join(format!("{:x}", md5::compute(cwd.as_bytes()))),
            Tool::Codex => self.home.join(".codex").join("sessions"),
        }
    }

    /// All transcript files for `(tool, cwd)`, newest mtime first.
    /// Mtime ties keep the walk order.
    pub fn list_transcripts(&self, tool: Tool, cwd: &str) -> Vec<PathBuf> {
        let mut found: Vec<(PathBuf, SystemTime)> = match tool {
            Tool::Claude | Tool::Pi => jsonl_files_in(&self.transcript_dir(tool, cwd)),
            Tool::Kimi => {
                // One wire.jsonl per session subdirectory.
                let root = self.transcript_dir(tool, cwd);
                let mut out = Vec::new();
                if let Ok(entries) = fs::read_dir(&root) {
                    for entry in entries.flatten() {
                        let wire = entry.path().join("wire.jsonl");
                        if let Ok(meta) = fs::metadata(&wire) {
                            if let Ok(mtime) = meta.modified() {
                                out.push((wire, mtime));
                            }
                        }
                    }
                }
                out
            }
            Tool::Codex => {
                let mut out = Vec::new();
                walk_codex_dated(&self.transcript_dir(tool, cwd), &mut |file, mtime| {
                    out.push((file, mtime));
                    true
                });
                out
            }
        };

        found.sort_by(|a, b| b.1.cmp(&a.1));
        found.into_iter().map(|(p, _)| p).collect()
    }

    /// Resolve a Codex transcript: newest file whose name contains
    /// `id_substring`, or the newest overall when no substring is given.
    /// The walk visits date directories lexicographically descending so the
    /// first hit is the most recent.
    pub fn find_codex_transcript(&self, id_substring: Option<&str>) -> Option<PathBuf> {
        let root = self.home.join(".codex").join("sessions");
        let mut hit = None;
        walk_codex_dated(&root, &mut |file, _| {
            let matches = match id_substring {
                Some(id) => file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.contains(id))
                    .unwrap_or(false),
                None => true,
            };
            if matches {
                hit = Some(file);
                false // stop the walk
            } else {
                true
            }
        });
        hit
    }
}

/// Claude encodes the cwd by replacing every `/` with `-`.
pub fn encode_claude_cwd(cwd: &str) -> String {
    cwd.replace('/', "-")
}

/// PI wraps the cwd (minus its leading slash, `/` → `-`) in double dashes.
pub fn encode_pi_cwd(cwd: &str) -> String {
    let body = cwd.strip_prefix('/').unwrap_or(cwd).replace('/', "-");
    format!("--{body}--")
}

fn jsonl_files_in(dir: &Path) -> Vec<(PathBuf, SystemTime)> {
    let mut out = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return out;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            if let Ok(mtime) = meta.modified() {
                out.push((path, mtime));
            }
        }
    }
    out
}

/// Visit `root/YYYY/MM/DD/*.jsonl` with years, months, days, and filenames
/// each in descending lexicographic order. The visitor returns `false` to
/// stop early.
fn walk_codex_dated(root: &Path, visit: &mut dyn FnMut(PathBuf, SystemTime) -> bool) {
    let mut years = dirs_sorted_desc(root);
    for year in years.drain(..) {
        let mut months = dirs_sorted_desc(&year);
        for month in months.drain(..) {
            let mut days = dirs_sorted_desc(&month);
            for day in days.drain(..) {
                let mut files = jsonl_files_in(&day);
                files.sort_by(|a, b| b.0.cmp(&a.0));
                for (file, mtime) in files {
                    if !visit(file, mtime) {
                        return;
                    }
                }
            }
        }
    }
}

fn dirs_sorted_desc(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect()
        })
        .unwrap_or_default();
    out.sort_by(|a, b| b.cmp(a));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_cwd_encoding() {
        assert_eq!(encode_claude_cwd("/work/repo"), "-work-repo");
    }

    #[test]
    fn pi_cwd_encoding() {
        assert_eq!(encode_pi_cwd("/work/repo"), "--work-repo--");
    }

    #[test]
    fn claude_listing_sorted_by_mtime() {
        let home = tempfile::tempdir().unwrap();
        let d = Discovery::with_home(home.path());
        let dir = d.transcript_dir(Tool::Claude, "/work/repo");
        fs::create_dir_all(&dir).unwrap();

        fs::write(dir.join("old.jsonl"), "{}\n").unwrap();
        let old_time = fs::FileTimes::new()
            .set_modified(SystemTime::now() - std::time::Duration::from_secs(600));
        fs::File::options()
            .write(true)
            .open(dir.join("old.jsonl"))
            .unwrap()
            .set_times(old_time)
            .unwrap();
        fs::write(dir.join("new.jsonl"), "{}\n").unwrap();
        fs::write(dir.join("ignored.txt"), "x").unwrap();

        let files = d.list_transcripts(Tool::Claude, "/work/repo");
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("new.jsonl"));
    }

    #[test]
    fn kimi_wire_files() {
        let home = tempfile::tempdir().unwrap();
        let d = Discovery::with_home(home.path());
        let root = d.transcript_dir(Tool::Kimi, "/work/repo");
        let session = root.join("abc-123");
        fs::create_dir_all(&session).unwrap();
        fs::write(session.join("wire.jsonl"), "{}\n").unwrap();

        let files = d.list_transcripts(Tool::Kimi, "/work/repo");
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("abc-123/wire.jsonl"));
    }

    #[test]
    fn codex_dated_walk_prefers_newest_date() {
        let home = tempfile::tempdir().unwrap();
        let d = Discovery::with_home(home.path());
        let root = home.path().join(".codex/sessions");
        for (date, name) in [
            ("2026/07/30", "rollout-aaa.jsonl"),
            ("2026/07/31", "rollout-bbb.jsonl"),
        ] {
            let dir = root.join(date);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(name), "{}\n").unwrap();
        }

        let newest = d.find_codex_transcript(None).unwrap();
        assert!(newest.ends_with("2026/07/31/rollout-bbb.jsonl"));

        let by_id = d.find_codex_transcript(Some("aaa")).unwrap();
        assert!(by_id.ends_with("2026/07/30/rollout-aaa.jsonl"));

        assert!(d.find_codex_transcript(Some("zzz")).is_none());
    }
}
