//! Single-poller lock.
//!
//! Telegram allows exactly one getUpdates consumer per token. Before the
//! poller starts, the adapter takes a filesystem lock named by a short
//! SHA-256 fingerprint of the token. The lock file holds the owner's pid;
//! a lock whose holder is no longer alive is stolen.

use std::fs;
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use tg_core::paths::{write_private, Paths};

use tg_channels::error::ChannelError;

/// Short fingerprint of a bot token, safe to embed in a filename.
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}

/// A held poller lock. Dropping it removes the lock file.
pub struct PollerLock {
    path: PathBuf,
}

impl PollerLock {
    /// Acquire the lock for `token`, stealing it from dead holders.
    pub fn acquire(paths: &Paths, token: &str) -> Result<Self, ChannelError> {
        let path = paths.poller_lock_file(&token_fingerprint(token));

        if let Ok(contents) = fs::read_to_string(&path) {
            if let Ok(holder) = contents.trim().parse::<i32>() {
                if holder != std::process::id() as i32 && pid_alive(holder) {
                    return Err(ChannelError::Conflict(format!(
                        "poller lock {} held by live pid {holder}",
                        path.display()
                    )));
                }
                warn!(pid = holder, lock = %path.display(), "stealing stale poller lock");
            }
        }

        write_private(&path, std::process::id().to_string().as_bytes())
            .map_err(|e| ChannelError::ConnectionFailed(format!("poller lock: {e}")))?;
        debug!(lock = %path.display(), "acquired poller lock");
        Ok(Self { path })
    }
}

impl Drop for PollerLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Probe liveness with a null signal.
pub(crate) fn pid_alive(pid: i32) -> bool {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_short_and_stable() {
        let a = token_fingerprint("123:abc");
        assert_eq!(a.len(), 12);
        assert_eq!(a, token_fingerprint("123:abc"));
        assert_ne!(a, token_fingerprint("123:abd"));
    }

    #[test]
    fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());
        let lock_path = paths.poller_lock_file(&token_fingerprint("t"));

        let lock = PollerLock::acquire(&paths, "t").unwrap();
        assert!(lock_path.exists());
        drop(lock);
        assert!(!lock_path.exists());
    }

    #[test]
    fn own_pid_lock_is_reentrant() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());
        let _first = PollerLock::acquire(&paths, "t").unwrap();
        // Same process re-acquiring (e.g. after a restart race) succeeds.
        let _second = PollerLock::acquire(&paths, "t").unwrap();
    }

    #[test]
    fn dead_holder_is_stolen() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());
        let path = paths.poller_lock_file(&token_fingerprint("t"));
        // Pid 1 is init and alive but we cannot signal it as a normal
        // user... use an absurdly high pid that cannot exist instead.
        write_private(&path, b"999999999").unwrap();
        let lock = PollerLock::acquire(&paths, "t");
        assert!(lock.is_ok());
    }
}
