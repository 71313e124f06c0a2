//! The `TOUCHGRASS_HOME` filesystem bundle.
//!
//! Everything the daemon and wrapper persist lives under one directory,
//! `~/.touchgrass` by default, overridable with the `TOUCHGRASS_HOME` env
//! var. Secret-bearing files are written 0600; the hook script is 0755.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// How long downloaded chat attachments are kept before the sweeper deletes
/// them.
pub const UPLOADS_TTL_SECS: u64 = 24 * 60 * 60;

/// Resolved locations of every file touchgrass owns on disk.
#[derive(Debug, Clone)]
pub struct Paths {
    home: PathBuf,
}

impl Paths {
    /// Resolve from `TOUCHGRASS_HOME`, falling back to `~/.touchgrass`.
    pub fn resolve() -> Result<Self> {
        if let Ok(dir) = std::env::var("TOUCHGRASS_HOME") {
            if !dir.is_empty() {
                return Ok(Self { home: PathBuf::from(dir) });
            }
        }
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))?;
        Ok(Self {
            home: home.join(".touchgrass"),
        })
    }

    /// Use an explicit root — tests point this at a tempdir.
    pub fn at(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn config_file(&self) -> PathBuf {
        self.home.join("config.json")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.home.join("daemon.pid")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.home.join("daemon.lock")
    }

    pub fn port_file(&self) -> PathBuf {
        self.home.join("daemon.port")
    }

    pub fn auth_file(&self) -> PathBuf {
        self.home.join("daemon.auth")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir().join("daemon.log")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.home.join("sessions")
    }

    /// Per-session wrapper manifest: `sessions/<id>.json`.
    pub fn session_manifest(&self, session_id: &str) -> PathBuf {
        self.sessions_dir().join(format!("{session_id}.json"))
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.home.join("uploads")
    }

    pub fn hooks_dir(&self) -> PathBuf {
        self.home.join("hooks")
    }

    pub fn claude_hook_script(&self) -> PathBuf {
        self.hooks_dir().join("claude-hooks.sh")
    }

    pub fn status_boards_file(&self) -> PathBuf {
        self.home.join("status-boards.json")
    }

    /// Poller lock for a channel token: `poller-<fingerprint>.lock`.
    pub fn poller_lock_file(&self, token_fingerprint: &str) -> PathBuf {
        self.home.join(format!("poller-{token_fingerprint}.lock"))
    }

    /// Create the directory tree with the right modes.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.home.clone(),
            self.log_dir(),
            self.sessions_dir(),
            self.uploads_dir(),
            self.hooks_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.home, fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }
}

/// Write `contents` to `path` with 0600 permissions, atomically: the bytes
/// land in a sibling temp file first and are renamed into place so readers
/// never observe a torn write.
pub fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Internal(format!("no parent dir for {}", path.display())))?;
    fs::create_dir_all(parent)?;

    let tmp = parent.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file")
    ));
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(contents)?;
        f.sync_all()?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Write an executable script (0755).
pub fn write_executable(path: &Path, contents: &[u8]) -> Result<()> {
    write_private(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Delete files under `uploads/` older than [`UPLOADS_TTL_SECS`].
pub fn sweep_uploads(paths: &Paths) -> Result<usize> {
    let dir = paths.uploads_dir();
    if !dir.exists() {
        return Ok(0);
    }
    let cutoff = std::time::SystemTime::now()
        .checked_sub(std::time::Duration::from_secs(UPLOADS_TTL_SECS));
    let Some(cutoff) = cutoff else { return Ok(0) };

    let mut removed = 0;
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        if let Ok(modified) = meta.modified() {
            if modified < cutoff && fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_under_home() {
        let p = Paths::at("/tmp/tg-test-home");
        assert_eq!(p.config_file(), PathBuf::from("/tmp/tg-test-home/config.json"));
        assert_eq!(
            p.session_manifest("r-0011223344556677"),
            PathBuf::from("/tmp/tg-test-home/sessions/r-0011223344556677.json")
        );
        assert_eq!(p.log_file(), PathBuf::from("/tmp/tg-test-home/logs/daemon.log"));
    }

    #[test]
    fn write_private_is_atomic_and_0600() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("daemon.auth");
        write_private(&target, b"secret").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"secret");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&target).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        // Overwrite goes through the same temp-rename path.
        write_private(&target, b"rotated").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"rotated");
    }

    #[test]
    fn sweep_ignores_missing_dir() {
        let p = Paths::at("/tmp/tg-does-not-exist-anywhere");
        assert_eq!(sweep_uploads(&p).unwrap(), 0);
    }
}
