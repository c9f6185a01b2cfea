//! Low-level PTY + child-process plumbing shared by every `Session`.
//!
//! A reusable handle that spawns an arbitrary argv with an environment
//! overlay and a given size, and bridges PTY output into async-land through
//! a bounded channel fed by a dedicated reader thread (reading a PTY is a
//! blocking syscall; there is no portable async PTY read).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc, Notify};

#[cfg(unix)]
use libc;

use crate::error::PtyError;

const READ_BUF_SIZE: usize = 32 * 1024;
const READER_CHANNEL_DEPTH: usize = 256;

/// A spawned PTY + child process, plus the plumbing needed to read its
/// output asynchronously and tear it down.
pub struct PtyHandle {
    writer: Mutex<Box<dyn Write + Send>>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    pub child_pid: i32,
    #[cfg(unix)]
    pgid: i32,
    shutdown: Arc<Notify>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PtyHandle {
    /// Opens a PTY of `(rows, cols)`, spawns `argv[0] argv[1..]` inside it
    /// with `cwd` and `env` applied on top of the current process
    /// environment, and starts a dedicated OS thread reading raw output into
    /// the returned channel.
    pub fn spawn(
        argv: &[String],
        cwd: Option<&str>,
        env: &HashMap<String, String>,
        rows: u16,
        cols: u16,
    ) -> Result<(Self, mpsc::Receiver<Vec<u8>>), PtyError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::OpenFailed(e.to_string()))?;

        let program = argv.first().ok_or_else(|| {
            PtyError::SpawnFailed("empty argv".to_string())
        })?;
        let mut cmd = CommandBuilder::new(program);
        for arg in &argv[1..] {
            cmd.arg(arg);
        }
        cmd.env("TERM", "xterm-256color");
        for (key, value) in env {
            cmd.env(key, value);
        }
        if let Some(dir) = cwd {
            cmd.cwd(dir);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        let child_pid = child
            .process_id()
            .map(|pid| pid as i32)
            .ok_or_else(|| PtyError::SpawnFailed("could not obtain child pid".to_string()))?;

        #[cfg(unix)]
        let pgid = pair.master.process_group_leader().unwrap_or(child_pid);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        drop(pair.slave);

        let shutdown = Arc::new(Notify::new());
        let (tx, rx) = mpsc::channel::<Vec<u8>>(READER_CHANNEL_DEPTH);

        let reader_handle = std::thread::Builder::new()
            .name(format!("pty-reader-{child_pid}"))
            .spawn(move || {
                let mut buf = [0u8; READ_BUF_SIZE];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.blocking_send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            #[cfg(unix)]
                            {
                                let raw = e.raw_os_error().unwrap_or(0);
                                if raw == libc::EAGAIN || raw == libc::EINTR {
                                    continue;
                                }
                            }
                            log::debug!("pty reader for pid {child_pid} error: {e}");
                            break;
                        }
                    }
                }
                log::debug!("pty reader for pid {child_pid} exited");
            })
            .map_err(|e| PtyError::SpawnFailed(format!("failed to spawn reader thread: {e}")))?;

        Ok((
            Self {
                writer: Mutex::new(writer),
                master: Mutex::new(pair.master),
                child: Mutex::new(child),
                child_pid,
                #[cfg(unix)]
                pgid,
                shutdown,
                reader_handle: Mutex::new(Some(reader_handle)),
            },
            rx,
        ))
    }

    pub fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| PtyError::WriteFailed(format!("writer lock poisoned: {e}")))?;
        writer
            .write_all(data)
            .map_err(|e| PtyError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| PtyError::WriteFailed(e.to_string()))
    }

    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), PtyError> {
        let master = self
            .master
            .lock()
            .map_err(|e| PtyError::ResizeFailed(format!("master lock poisoned: {e}")))?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed(e.to_string()))
    }

    /// Blocks the calling (async, `spawn_blocking`-wrapped) context until
    /// the child exits, returning the wait-status description.
    pub fn wait(&self) -> Option<String> {
        let mut child = self.child.lock().ok()?;
        match child.wait() {
            Ok(status) => {
                if status.success() {
                    None
                } else {
                    Some(format!("exited with {status:?}"))
                }
            }
            Err(e) => Some(format!("wait failed: {e}")),
        }
    }

    /// Graceful-then-forceful shutdown: SIGTERM the process group, wait up
    /// to `grace`, SIGKILL if still alive, then close the PTY file
    /// descriptors (which EOFs the reader thread) and join it off the
    /// caller's thread.
    pub async fn kill(&self, grace: std::time::Duration) {
        #[cfg(unix)]
        {
            let pgid = self.pgid;
            let term = unsafe { libc::kill(-pgid, libc::SIGTERM) };
            if term != 0 {
                log::warn!(
                    "failed to SIGTERM pgid {pgid}: {}",
                    std::io::Error::last_os_error()
                );
            }

            let pid = self.child_pid;
            let exited = tokio::time::timeout(grace, async {
                loop {
                    if unsafe { libc::kill(pid, 0) } != 0 {
                        return;
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            })
            .await;

            if exited.is_err() {
                let kill = unsafe { libc::kill(-pgid, libc::SIGKILL) };
                if kill != 0 {
                    log::warn!(
                        "failed to SIGKILL pgid {pgid}: {}",
                        std::io::Error::last_os_error()
                    );
                }
            }
        }

        #[cfg(windows)]
        {
            use std::process::Command;
            let _ = Command::new("taskkill")
                .args(["/PID", &self.child_pid.to_string(), "/T", "/F"])
                .output();
        }

        self.shutdown.notify_waiters();

        let reader_handle = self
            .reader_handle
            .lock()
            .ok()
            .and_then(|mut h| h.take());
        if let Some(handle) = reader_handle {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
    }
}
