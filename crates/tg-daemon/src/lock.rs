//! Single-daemon enforcement.
//!
//! One daemon per `TOUCHGRASS_HOME`: a pid file plus a lock file, and a
//! startup sweep that terminates any duplicate daemon processes sharing
//! this home (SIGTERM, then SIGKILL 200 ms later).

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use tg_core::paths::{write_private, Paths};
use tg_core::{Error, Result};

/// Held for the daemon's lifetime.
pub struct DaemonLock {
    pid_file: PathBuf,
    lock_file: PathBuf,
}

impl DaemonLock {
    /// Take the daemon lock, failing when another live daemon holds it.
    pub fn acquire(paths: &Paths) -> Result<Self> {
        let lock_file = paths.lock_file();
        let pid_file = paths.pid_file();

        if let Ok(raw) = fs::read_to_string(&lock_file) {
            if let Ok(holder) = raw.trim().parse::<i32>() {
                if holder != std::process::id() as i32 && pid_alive(holder) {
                    return Err(Error::Config(format!(
                        "another daemon (pid {holder}) owns {}",
                        lock_file.display()
                    )));
                }
            }
        }

        let pid = std::process::id().to_string();
        write_private(&lock_file, pid.as_bytes())?;
        write_private(&pid_file, pid.as_bytes())?;
        Ok(Self {
            pid_file,
            lock_file,
        })
    }
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.pid_file);
        let _ = fs::remove_file(&self.lock_file);
    }
}

fn pid_alive(pid: i32) -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::kill(pid, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Enumerate processes whose command line looks like a touchgrass daemon
/// for the same home, and terminate duplicates: SIGTERM first, SIGKILL for
/// survivors 200 ms later. Best effort — /proc may be absent.
pub async fn sweep_duplicate_daemons(paths: &Paths) {
    let home = paths.home().to_string_lossy().into_owned();
    let own_pid = std::process::id() as i32;
    let mut targets = Vec::new();

    let Ok(entries) = fs::read_dir("/proc") else {
        return;
    };
    for entry in entries.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|n| n.parse::<i32>().ok())
        else {
            continue;
        };
        if pid == own_pid {
            continue;
        }
        let Ok(cmdline) = fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        let cmdline = String::from_utf8_lossy(&cmdline).replace('\0', " ");
        if !cmdline.contains("tg-daemon") {
            continue;
        }
        // Same home: either via env-provided path in argv or the default.
        let Ok(environ) = fs::read(entry.path().join("environ")) else {
            continue;
        };
        let environ = String::from_utf8_lossy(&environ);
        let same_home = environ
            .split('\0')
            .any(|kv| kv == format!("TOUCHGRASS_HOME={home}"))
            || (!environ.contains("TOUCHGRASS_HOME=") && home.ends_with(".touchgrass"));
        if same_home {
            targets.push(pid);
        }
    }

    if targets.is_empty() {
        return;
    }

    info!(?targets, "terminating duplicate daemons");
    #[cfg(unix)]
    {
        for &pid in &targets {
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        for &pid in &targets {
            if pid_alive(pid) {
                warn!(pid, "duplicate daemon ignored SIGTERM, killing");
                unsafe {
                    libc::kill(pid, libc::SIGKILL);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());
        let lock = DaemonLock::acquire(&paths).unwrap();
        assert!(paths.pid_file().exists());
        assert!(paths.lock_file().exists());
        drop(lock);
        assert!(!paths.pid_file().exists());
        assert!(!paths.lock_file().exists());
    }

    #[test]
    fn stale_lock_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());
        write_private(&paths.lock_file(), b"999999999").unwrap();
        assert!(DaemonLock::acquire(&paths).is_ok());
    }
}
