//! Picker construction: file mentions, resume candidates, pagination.
//!
//! Pickers are polls with at most one page of options plus a `More ▸`
//! navigation entry; answers are interpreted by the router against the
//! pending flow.

use std::path::{Path, PathBuf};

use tg_transcript::tool::Tool;

/// Options shown per picker page (Telegram polls allow 10; one slot is
/// reserved for navigation).
pub const PAGE_SIZE: usize = 8;

/// Label of the pagination entry.
pub const MORE_LABEL: &str = "More ▸";

/// Rank repo files against a query.
///
/// Matching is case-insensitive substring over the whole path. Exact
/// basename matches rank first, then basename prefixes, then basename
/// substrings, then path-only matches; ties break shallow-first,
/// shorter-first, lexicographic. An empty query yields the deterministic
/// shallow-first ordering over everything.
pub fn rank_files(files: &[String], query: &str) -> Vec<String> {
    let query = query.trim().to_ascii_lowercase();

    let mut scored: Vec<(u8, usize, usize, &String)> = files
        .iter()
        .filter_map(|path| {
            let lower = path.to_ascii_lowercase();
            let basename = lower.rsplit('/').next().unwrap_or(&lower);
            let score = if query.is_empty() {
                0
            } else if basename == query {
                0
            } else if basename.starts_with(&query) {
                1
            } else if basename.contains(&query) {
                2
            } else if lower.contains(&query) {
                3
            } else {
                return None;
            };
            let depth = path.matches('/').count();
            Some((score, depth, path.len(), path))
        })
        .collect();

    scored.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
            .then(a.3.cmp(b.3))
    });
    scored.into_iter().map(|(_, _, _, p)| p.clone()).collect()
}

/// Walk the repo under `cwd`, returning relative paths. Hidden entries and
/// the usual dependency/build directories are skipped; the walk stops at
/// `cap` files.
pub fn list_repo_files(cwd: &Path, cap: usize) -> Vec<String> {
    const SKIP_DIRS: &[&str] = &["node_modules", "target", "dist", "build", "__pycache__"];

    let mut out = Vec::new();
    let mut stack = vec![PathBuf::new()];
    while let Some(rel_dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(cwd.join(&rel_dir)) else {
            continue;
        };
        let mut entries: Vec<_> = entries.flatten().collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            if out.len() >= cap {
                return out;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let rel = if rel_dir.as_os_str().is_empty() {
                PathBuf::from(&name)
            } else {
                rel_dir.join(&name)
            };
            let Ok(file_type) = entry.file_type() else { continue };
            if file_type.is_dir() {
                if !SKIP_DIRS.contains(&name.as_str()) {
                    stack.push(rel);
                }
            } else if file_type.is_file() {
                out.push(rel.to_string_lossy().into_owned());
            }
        }
    }
    out
}

/// One page of picker options: up to [`PAGE_SIZE`] items plus `More ▸`
/// when further pages exist.
pub fn page_options(items: &[String], page: usize) -> (Vec<String>, bool) {
    let start = page * PAGE_SIZE;
    let slice: Vec<String> = items.iter().skip(start).take(PAGE_SIZE).cloned().collect();
    let has_more = items.len() > start + PAGE_SIZE;
    let mut options = slice;
    if has_more {
        options.push(MORE_LABEL.to_string());
    }
    (options, has_more)
}

/// Map answered option indices on a page back to item indices; returns
/// `(item_indices, wants_more)`.
pub fn resolve_page_answer(
    items_len: usize,
    page: usize,
    option_ids: &[usize],
) -> (Vec<usize>, bool) {
    let start = page * PAGE_SIZE;
    let on_page = (items_len - start.min(items_len)).min(PAGE_SIZE);
    let mut selected = Vec::new();
    let mut wants_more = false;
    for &id in option_ids {
        if id < on_page {
            selected.push(start + id);
        } else {
            wants_more = true;
        }
    }
    (selected, wants_more)
}

/// The ref a tool needs to resume the session a transcript file belongs to.
///
/// Claude/PI/Codex encode the session id in the file name; Kimi in the
/// session directory containing `wire.jsonl`.
pub fn resume_ref_for(tool: Tool, transcript: &Path) -> Option<String> {
    match tool {
        Tool::Kimi => transcript
            .parent()
            .and_then(|dir| dir.file_name())
            .and_then(|n| n.to_str())
            .map(str::to_string),
        Tool::Codex => {
            // rollout-2026-07-31T10-00-00-<uuid>.jsonl → the uuid tail.
            let stem = transcript.file_stem()?.to_str()?;
            let tail = stem.rsplit('-').take(5).collect::<Vec<_>>();
            if tail.len() == 5 {
                let mut parts: Vec<&str> = tail.into_iter().collect();
                parts.reverse();
                Some(parts.join("-"))
            } else {
                Some(stem.to_string())
            }
        }
        Tool::Claude | Tool::Pi => transcript
            .file_stem()
            .and_then(|n| n.to_str())
            .map(str::to_string),
    }
}

/// Human label for a resume candidate: file stem plus age.
pub fn resume_label(transcript: &Path) -> String {
    let stem = transcript
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("session");
    let age = std::fs::metadata(transcript)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.elapsed().ok())
        .map(|d| {
            let secs = d.as_secs();
            if secs < 3600 {
                format!("{}m ago", secs / 60)
            } else if secs < 86_400 {
                format!("{}h ago", secs / 3600)
            } else {
                format!("{}d ago", secs / 86_400)
            }
        })
        .unwrap_or_default();
    if age.is_empty() {
        stem.to_string()
    } else {
        format!("{stem} · {age}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files() -> Vec<String> {
        [
            "src/deep/path/auth-provider.ts",
            "auth.ts",
            "src/auth/index.ts",
            "README.md",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[test]
    fn auth_query_ranking() {
        let ranked = rank_files(&files(), "auth");
        assert_eq!(ranked[0], "auth.ts");
        assert!(ranked.contains(&"src/auth/index.ts".to_string()));
        assert!(!ranked.contains(&"README.md".to_string()));
    }

    #[test]
    fn empty_query_is_shallow_first() {
        let ranked = rank_files(&files(), "");
        assert_eq!(ranked[0], "auth.ts");
        assert_eq!(ranked[1], "README.md");
        assert_eq!(ranked.last().unwrap(), "src/deep/path/auth-provider.ts");
        // Deterministic: same input, same order.
        assert_eq!(ranked, rank_files(&files(), ""));
    }

    #[test]
    fn pagination_adds_more_marker() {
        let items: Vec<String> = (0..20).map(|i| format!("f{i}")).collect();
        let (page0, more) = page_options(&items, 0);
        assert_eq!(page0.len(), PAGE_SIZE + 1);
        assert!(more);
        assert_eq!(page0.last().unwrap(), MORE_LABEL);

        let (page2, more) = page_options(&items, 2);
        assert_eq!(page2.len(), 4);
        assert!(!more);
    }

    #[test]
    fn page_answer_resolution() {
        // 20 items, page 1: option 2 → item 10; the More slot → wants_more.
        let (selected, more) = resolve_page_answer(20, 1, &[2, PAGE_SIZE]);
        assert_eq!(selected, vec![10]);
        assert!(more);
    }

    #[test]
    fn resume_refs_per_tool() {
        assert_eq!(
            resume_ref_for(Tool::Claude, Path::new("/x/abc-123.jsonl")),
            Some("abc-123".into())
        );
        assert_eq!(
            resume_ref_for(Tool::Kimi, Path::new("/x/sessions/md5/sess-9/wire.jsonl")),
            Some("sess-9".into())
        );
        assert_eq!(
            resume_ref_for(
                Tool::Codex,
                Path::new("/x/rollout-019c56ac-417b-7180-bd3f-2ed6e25885e3.jsonl")
            ),
            Some("019c56ac-417b-7180-bd3f-2ed6e25885e3".into())
        );
    }

    #[test]
    fn repo_walk_skips_hidden_and_deps() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/x")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "").unwrap();
        std::fs::write(dir.path().join("node_modules/x/index.js"), "").unwrap();
        std::fs::write(dir.path().join(".git/config"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();

        let files = list_repo_files(dir.path(), 100);
        assert!(files.contains(&"README.md".to_string()));
        assert!(files.contains(&"src/main.rs".to_string()));
        assert_eq!(files.len(), 2);
    }
}
