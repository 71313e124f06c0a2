//! Per-session manifest: `sessions/<id>.json`, 0600.
//!
//! Records enough for `tg peek`, crash diagnosis, and the daemon's
//! recent-messages replay (`jsonlFile`).

use std::path::Path;

use serde::{Deserialize, Serialize};

use tg_core::paths::{write_private, Paths};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub id: String,
    pub command: Vec<String>,
    pub cwd: String,
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonl_file: Option<String>,
    pub started_at: String,
}

impl Manifest {
    pub fn write(&self, paths: &Paths) -> tg_core::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_private(&paths.session_manifest(&self.id), json.as_bytes())
    }

    pub fn remove(paths: &Paths, session_id: &str) {
        let _ = std::fs::remove_file(paths.session_manifest(session_id));
    }

    /// Record the transcript path once discovery finds it.
    pub fn set_transcript(&mut self, paths: &Paths, transcript: &Path) -> tg_core::Result<()> {
        self.jsonl_file = Some(transcript.to_string_lossy().into_owned());
        self.write(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_update_remove() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());
        let mut manifest = Manifest {
            id: "r-0123456789abcdef".into(),
            command: vec!["claude".into(), "--continue".into()],
            cwd: "/work/repo".into(),
            pid: 4242,
            jsonl_file: None,
            started_at: "2026-08-01T09:00:00Z".into(),
        };
        manifest.write(&paths).unwrap();

        let on_disk = std::fs::read_to_string(paths.session_manifest(&manifest.id)).unwrap();
        assert!(on_disk.contains("\"jsonlFile\"") == false);
        assert!(on_disk.contains("\"startedAt\""));

        manifest
            .set_transcript(&paths, Path::new("/home/u/.claude/projects/-work-repo/s.jsonl"))
            .unwrap();
        let on_disk = std::fs::read_to_string(paths.session_manifest(&manifest.id)).unwrap();
        assert!(on_disk.contains("s.jsonl"));

        Manifest::remove(&paths, &manifest.id);
        assert!(!paths.session_manifest(&manifest.id).exists());
    }
}
