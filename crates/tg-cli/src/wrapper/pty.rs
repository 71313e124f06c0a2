//! PTY plumbing: spawn the tool, forward stdin/stdout verbatim, keep a
//! rolling ANSI-stripped tail for prompt scanning, resize on SIGWINCH.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::prompt::push_scan_buffer;

/// A live PTY session around the tool process.
pub struct PtyHandle {
    /// Write half — queued input and forwarded stdin both land here.
    pub writer: Arc<Mutex<Box<dyn Write + Send>>>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    /// Captured at spawn so signal delivery never contends with the
    /// blocking `wait()` for the child mutex.
    pid: Option<u32>,
    /// Rolling ANSI-stripped tail of PTY output for the prompt scanner.
    pub scan_buffer: Arc<Mutex<String>>,
    /// Raw output chunks for the passthrough task.
    pub output_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl PtyHandle {
    /// Spawn `program args` in a fresh PTY sized like the local terminal.
    pub fn spawn(program: &str, args: &[String], cwd: &str) -> anyhow::Result<Self> {
        let (cols, rows) = local_winsize();
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| anyhow::anyhow!("openpty failed: {e}"))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        cmd.cwd(cwd);
        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| anyhow::anyhow!("spawn {program} failed: {e}"))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| anyhow::anyhow!("pty writer: {e}"))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| anyhow::anyhow!("pty reader: {e}"))?;

        let scan_buffer: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
        let (tx, rx) = mpsc::unbounded_channel();

        // Blocking reads run on a dedicated OS thread.
        let scan = Arc::clone(&scan_buffer);
        std::thread::spawn(move || {
            let mut raw = [0u8; 8192];
            loop {
                match reader.read(&mut raw) {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = raw[..n].to_vec();
                        let stripped = strip_ansi_escapes::strip(&chunk);
                        {
                            let mut guard = scan.lock().unwrap();
                            push_scan_buffer(
                                &mut guard,
                                &String::from_utf8_lossy(&stripped),
                            );
                        }
                        if tx.send(chunk).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "pty reader ended");
                        break;
                    }
                }
            }
        });

        let pid = child.process_id();
        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            master: Mutex::new(pair.master),
            child: Mutex::new(child),
            pid,
            scan_buffer,
            output_rx: Mutex::new(Some(rx)),
        })
    }

    /// The tool's pid, for signals and caffeinate.
    pub fn child_pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn write_bytes(&self, bytes: &[u8]) -> anyhow::Result<()> {
        let mut guard = self.writer.lock().unwrap();
        guard.write_all(bytes)?;
        guard.flush()?;
        Ok(())
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        let guard = self.master.lock().unwrap();
        if let Err(e) = guard.resize(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }) {
            warn!(error = %e, "pty resize failed");
        }
    }

    /// Block until the tool exits; call from `spawn_blocking`.
    pub fn wait(&self) -> i32 {
        let mut guard = self.child.lock().unwrap();
        match guard.wait() {
            Ok(status) => status.exit_code() as i32,
            Err(_) => 1,
        }
    }

    pub fn send_sigint(&self) {
        if let Some(pid) = self.child_pid() {
            #[cfg(unix)]
            unsafe {
                libc::kill(pid as i32, libc::SIGINT);
            }
        }
    }

    pub fn send_sigkill(&self) {
        if let Some(pid) = self.child_pid() {
            #[cfg(unix)]
            unsafe {
                libc::kill(pid as i32, libc::SIGKILL);
            }
        }
    }
}

/// Current terminal dimensions, with an 80x24 fallback for non-TTY runs.
pub fn local_winsize() -> (u16, u16) {
    #[cfg(unix)]
    unsafe {
        let mut ws: libc::winsize = std::mem::zeroed();
        if libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut ws) == 0
            && ws.ws_col > 0
            && ws.ws_row > 0
        {
            return (ws.ws_col, ws.ws_row);
        }
    }
    (80, 24)
}

/// Put the local terminal into raw mode for the wrapper's lifetime;
/// restores the original settings on drop.
pub struct RawModeGuard {
    #[cfg(unix)]
    original: Option<libc::termios>,
}

impl RawModeGuard {
    pub fn enable() -> Self {
        #[cfg(unix)]
        {
            unsafe {
                if libc::isatty(libc::STDIN_FILENO) != 1 {
                    return Self { original: None };
                }
                let mut original: libc::termios = std::mem::zeroed();
                if libc::tcgetattr(libc::STDIN_FILENO, &mut original) != 0 {
                    return Self { original: None };
                }
                let mut raw = original;
                libc::cfmakeraw(&mut raw);
                libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &raw);
                Self {
                    original: Some(original),
                }
            }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(original) = self.original.take() {
            unsafe {
                libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &original);
            }
        }
    }
}

/// Forward local stdin to the PTY on a blocking thread.
pub fn spawn_stdin_forwarder(writer: Arc<Mutex<Box<dyn Write + Send>>>) {
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut guard = writer.lock().unwrap();
                    if guard.write_all(&buf[..n]).and_then(|_| guard.flush()).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Keep macOS awake while the tool runs.
#[cfg(target_os = "macos")]
pub fn spawn_caffeinate(pid: u32) {
    let _ = std::process::Command::new("caffeinate")
        .args(["-dims", "-w", &pid.to_string()])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();
}

#[cfg(not(target_os = "macos"))]
pub fn spawn_caffeinate(_pid: u32) {}
