//! `Session`: an owning handle to one PTY + child process, and the
//! orchestrator of the per-session data path described in the data model —
//! PTY read loop, encoding transcode, scrollback, subscriber fan-out, and
//! status tracking.
//!
//! PTY bring-up and the reader-thread shape follow `pty::PtyHandle::spawn`;
//! the metadata ticker follows the same spawn-plus-running-flag polling
//! task shape as `status_tracker::StatusTracker`. Generalized from a single
//! global PTY table into one struct per session with its own scrollback,
//! subscriber hub, and assistant status tracker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::assistant::{self, AssistantState, AssistantType};
use crate::encoding::{self, Charset, Decoder};
use crate::error::{PtyError, SessionError};
use crate::proc_info::{self, ForegroundChild};
use crate::pty::PtyHandle;
use crate::scrollback::{Scrollback, ScrollbackChunk};
use crate::status_tracker::StatusTracker;
use crate::subscriber::{Hub, StreamEvent, Subscription};

const DEFAULT_ROWS: u16 = 24;
const DEFAULT_COLS: u16 = 80;
const METADATA_TICK: Duration = Duration::from_secs(2);
const KILL_GRACE: Duration = Duration::from_secs(3);
pub const TITLE_MAX_SCALARS: usize = 64;

/// Lifecycle status. Monotonic except `Starting -> {Running, Error}` and any
/// state `-> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Running,
    Closed,
    Error,
}

/// Coarse process activity, derived from whether the shell currently has a
/// live foreground child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessActivity {
    Idle,
    Busy,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIAssistantInfo {
    #[serde(rename = "type")]
    pub kind: AssistantType,
    pub display_name: String,
    pub command: Vec<String>,
    pub detected: bool,
    pub state: AssistantState,
    pub state_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub pid: i32,
    pub status: ProcessActivity,
    pub has_live_children: bool,
    pub foreground_command: Option<Vec<String>>,
    pub ai_assistant: AIAssistantInfo,
}

/// A point-in-time, externally safe copy of a session's mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub project_id: String,
    pub worktree_id: String,
    pub task_id: Option<String>,
    pub title: String,
    pub status: SessionStatus,
    pub cwd: Option<String>,
    pub command: Vec<String>,
    pub rows: u16,
    pub cols: u16,
    pub charset: String,
    pub last_active: DateTime<Utc>,
    pub last_error: Option<String>,
    pub metadata: Option<SessionMetadata>,
}

/// Construction parameters for a new `Session`. Admission and shell-command
/// resolution happen in `Manager::create_session`; by the time this struct
/// is built, every field is known-valid.
pub struct SessionParams {
    pub id: String,
    pub project_id: String,
    pub worktree_id: String,
    pub task_id: Option<String>,
    pub cwd: Option<String>,
    pub command: Vec<String>,
    pub env: HashMap<String, String>,
    pub rows: u16,
    pub cols: u16,
    pub charset: Charset,
    pub charset_name: String,
    pub ai_assistant_status: HashMap<AssistantType, bool>,
    pub scrollback_bytes: usize,
}

/// One PTY, one child process, and the state orchestrating them: title,
/// lifecycle status, scrollback, subscribers, and AI-assistant status.
///
/// Exclusively owns its PTY, child process, scrollback, and subscriber set
/// (see the data model's ownership section); the `Manager` holds it behind
/// an `Arc` but never reaches into its internals.
pub struct Session {
    id: String,
    project_id: String,
    worktree_id: String,
    task_id: RwLock<Option<String>>,
    cwd: Option<String>,
    command: Vec<String>,
    env: HashMap<String, String>,
    charset: Charset,
    charset_name: String,

    title: RwLock<String>,
    status: RwLock<SessionStatus>,
    last_active_instant: RwLock<Instant>,
    last_active_wall: RwLock<DateTime<Utc>>,
    last_error: RwLock<Option<String>>,
    size: RwLock<(u16, u16)>,

    pty: RwLock<Option<Arc<PtyHandle>>>,
    child_pid: AtomicI32,
    decoder: Mutex<Decoder>,
    scrollback: Mutex<Scrollback>,
    hub: Arc<Hub>,
    status_tracker: Arc<StatusTracker>,

    ai_assistant_status: RwLock<HashMap<AssistantType, bool>>,
    last_foreground: Mutex<Option<ForegroundChild>>,
    last_state_change: Mutex<DateTime<Utc>>,
    last_metadata: Mutex<Option<SessionMetadata>>,

    closing: AtomicBool,
    shutdown: Arc<Notify>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Session {
    /// Builds a not-yet-started session in `Starting` status. Call
    /// `start()` before publishing it to subscribers or the registry.
    ///
    /// Charset resolution happens in the caller (`Manager::create_session`)
    /// before this is reached, since an unrecognized charset name must fail
    /// admission with `InvalidEncoding` rather than leave a half-registered
    /// session behind.
    pub fn new(params: SessionParams) -> Arc<Self> {
        let rows = if params.rows == 0 { DEFAULT_ROWS } else { params.rows };
        let cols = if params.cols == 0 { DEFAULT_COLS } else { params.cols };
        let now_wall = Utc::now();
        let hub = Hub::new(params.id.clone());
        let title = default_title(&params.command);

        let session = Arc::new_cyclic(|weak| {
            let weak_for_tracker = weak.clone();
            Self {
                id: params.id,
                project_id: params.project_id,
                worktree_id: params.worktree_id,
                task_id: RwLock::new(params.task_id),
                cwd: params.cwd,
                command: params.command,
                env: params.env,
                charset: params.charset,
                charset_name: params.charset_name,
                title: RwLock::new(title),
                status: RwLock::new(SessionStatus::Starting),
                last_active_instant: RwLock::new(Instant::now()),
                last_active_wall: RwLock::new(now_wall),
                last_error: RwLock::new(None),
                size: RwLock::new((rows, cols)),
                pty: RwLock::new(None),
                child_pid: AtomicI32::new(0),
                decoder: Mutex::new(Decoder::new(params.charset)),
                scrollback: Mutex::new(Scrollback::new(params.scrollback_bytes)),
                hub,
                status_tracker: StatusTracker::new(move |state| {
                    if let Some(session) = weak_for_tracker.upgrade() {
                        session.on_assistant_state_change(state);
                    }
                }),
                ai_assistant_status: RwLock::new(params.ai_assistant_status),
                last_foreground: Mutex::new(None),
                last_state_change: Mutex::new(now_wall),
                last_metadata: Mutex::new(None),
                closing: AtomicBool::new(false),
                shutdown: Arc::new(Notify::new()),
                tasks: Mutex::new(Vec::new()),
            }
        });

        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn worktree_id(&self) -> &str {
        &self.worktree_id
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.read()
    }

    pub fn last_active(&self) -> Instant {
        *self.last_active_instant.read()
    }

    /// Opens the PTY, spawns the child, and starts the three long-running
    /// tasks (wait-for-exit, PTY read loop, metadata ticker). On spawn
    /// failure the session transitions to `Error` and is never `Running`.
    pub async fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        let (rows, cols) = *self.size.read();
        let argv = self.command.clone();
        let cwd = self.cwd.clone();
        let env = self.env.clone();

        let spawned = tokio::task::spawn_blocking(move || {
            PtyHandle::spawn(&argv, cwd.as_deref(), &env, rows, cols)
        })
        .await
        .unwrap_or_else(|e| Err(PtyError::SpawnFailed(format!("spawn task panicked: {e}"))));

        let (pty, rx) = match spawned {
            Ok(pair) => pair,
            Err(e) => {
                *self.status.write() = SessionStatus::Error;
                *self.last_error.write() = Some(e.to_string());
                return Err(SessionError::Pty(e));
            }
        };

        let pid = pty.child_pid;
        let pty = Arc::new(pty);
        *self.pty.write() = Some(pty.clone());
        self.child_pid.store(pid, Ordering::Release);
        *self.status.write() = SessionStatus::Running;

        log::info!("session {}: started (pid={})", self.id, pid);

        let mut tasks = Vec::with_capacity(3);
        tasks.push(self.spawn_wait_task(pty.clone()));
        tasks.push(self.spawn_read_loop(pty, rx));
        tasks.push(self.spawn_metadata_ticker());
        *self.tasks.lock() = tasks;

        Ok(())
    }

    fn spawn_wait_task(self: &Arc<Self>, pty: Arc<PtyHandle>) -> tokio::task::JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            let reason = tokio::task::spawn_blocking(move || pty.wait())
                .await
                .unwrap_or_else(|e| Some(format!("wait task panicked: {e}")));
            session.teardown(reason, false).await;
        })
    }

    fn spawn_read_loop(
        self: &Arc<Self>,
        _pty: Arc<PtyHandle>,
        mut rx: tokio::sync::mpsc::Receiver<Vec<u8>>,
    ) -> tokio::task::JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if chunk.is_empty() {
                    continue;
                }
                session.touch();
                let decoded = {
                    let mut decoder = session.decoder.lock();
                    decoder.decode(&chunk)
                };
                if decoded.is_empty() {
                    continue;
                }
                let bytes = decoded.into_bytes();
                session.scrollback.lock().append(&bytes);
                session.hub.broadcast(StreamEvent::Data(bytes.clone()));
                session.status_tracker.process_chunk(&bytes);
            }
            log::debug!("session {}: read loop ended", session.id);
            session.teardown(None, false).await;
        })
    }

    fn spawn_metadata_ticker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(METADATA_TICK);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if session.status() != SessionStatus::Running {
                            break;
                        }
                        session.run_metadata_tick();
                    }
                    _ = session.shutdown.notified() => break,
                }
            }
        })
    }

    /// Re-derives foreground-child/process-activity facts, (de)activates the
    /// status tracker for the currently-detected assistant, and broadcasts a
    /// fresh metadata snapshot regardless of whether anything changed.
    fn run_metadata_tick(self: &Arc<Self>) {
        let pid = self.child_pid.load(Ordering::Acquire);
        let fg = proc_info::foreground_child(pid);

        let kind = fg
            .as_ref()
            .map(|f| assistant::DETECTOR.detect(&f.command.join(" ")))
            .unwrap_or(AssistantType::Unknown);
        let enabled = self.ai_assistant_status.read().get(&kind).copied().unwrap_or(true);
        let (rows, cols) = *self.size.read();

        if enabled && kind != AssistantType::Unknown {
            self.status_tracker.activate(kind, rows, cols);
        } else {
            self.status_tracker.deactivate();
        }

        *self.last_foreground.lock() = fg;
        self.build_and_broadcast_metadata();
    }

    fn on_assistant_state_change(self: &Arc<Self>, _state: AssistantState) {
        *self.last_state_change.lock() = Utc::now();
        self.build_and_broadcast_metadata();
    }

    fn build_and_broadcast_metadata(self: &Arc<Self>) {
        let metadata = self.build_metadata();
        *self.last_metadata.lock() = Some(metadata.clone());
        self.hub.broadcast(StreamEvent::Metadata(Box::new(metadata)));
    }

    fn build_metadata(&self) -> SessionMetadata {
        let pid = self.child_pid.load(Ordering::Acquire);
        let fg = self.last_foreground.lock().clone();
        let has_live_children = fg.is_some();
        let activity = if pid <= 0 {
            ProcessActivity::Unknown
        } else if has_live_children {
            ProcessActivity::Busy
        } else {
            ProcessActivity::Idle
        };

        let kind = self.status_tracker.assistant_type();
        SessionMetadata {
            pid,
            status: activity,
            has_live_children,
            foreground_command: fg.as_ref().map(|f| f.command.clone()),
            ai_assistant: AIAssistantInfo {
                kind,
                display_name: kind.display_name().to_string(),
                command: fg.map(|f| f.command).unwrap_or_default(),
                detected: self.status_tracker.is_active(),
                state: self.status_tracker.state(),
                state_updated_at: *self.last_state_change.lock(),
            },
        }
    }

    pub fn metadata(&self) -> Option<SessionMetadata> {
        self.last_metadata.lock().clone()
    }

    /// The most recent text the status tracker captured from the
    /// assistant's own input region, if any.
    pub fn last_input_capture(&self) -> Option<String> {
        self.status_tracker.last_input_capture()
    }

    /// Encodes `data` into the session's charset (a no-op for UTF-8) and
    /// writes it to the PTY. Empty input is a no-op returning `Ok(0)`.
    pub fn write(&self, data: &[u8]) -> Result<usize, SessionError> {
        if data.is_empty() {
            return Ok(0);
        }
        let pty = self.pty.read().clone().ok_or(SessionError::Closed)?;
        let bytes = if self.charset.is_utf8() {
            data.to_vec()
        } else {
            let text = String::from_utf8_lossy(data);
            encoding::encode(self.charset, &text)
        };
        pty.write(&bytes)?;
        self.touch();
        Ok(data.len())
    }

    /// Non-positive dimensions are silently rejected. Otherwise resizes the
    /// PTY and the status tracker's internal screen.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), SessionError> {
        if rows == 0 || cols == 0 {
            return Ok(());
        }
        if let Some(pty) = self.pty.read().clone() {
            pty.resize(rows, cols)?;
        }
        *self.size.write() = (rows, cols);
        self.status_tracker.resize(rows, cols);
        self.touch();
        Ok(())
    }

    /// Deep copy of the retained scrollback chunks, oldest first, safe to
    /// hand to external callers without holding the session lock.
    pub fn scrollback_snapshot(&self) -> Vec<ScrollbackChunk> {
        self.scrollback.lock().snapshot()
    }

    /// Subscribes and replays the current scrollback backlog into the new
    /// subscriber's mailbox before any live events, so a late attacher still
    /// sees the session's recent output.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let backlog = self
            .scrollback_snapshot()
            .into_iter()
            .map(|chunk| chunk.data)
            .collect();
        let last_exit = if self.hub.has_exited() {
            Some(self.last_error.read().clone())
        } else {
            None
        };
        self.hub.subscribe(last_exit, backlog)
    }

    /// Subscribes, triggers a no-op resize to provoke a redraw, then waits
    /// up to `timeout` for the first non-empty `Data` event.
    pub async fn capture_next_chunk(self: &Arc<Self>, timeout: Duration) -> Result<Vec<u8>, SessionError> {
        let mut sub = self.subscribe();
        let (rows, cols) = *self.size.read();
        self.resize(rows, cols)?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(SessionError::CaptureTimeout);
            }
            match tokio::time::timeout(remaining, sub.recv()).await {
                Ok(Some(StreamEvent::Data(bytes))) if !bytes.is_empty() => return Ok(bytes),
                Ok(Some(_)) => continue,
                Ok(None) => return Err(SessionError::Closed),
                Err(_) => return Err(SessionError::CaptureTimeout),
            }
        }
    }

    /// Applies a new title under the session lock. Validation (trimming,
    /// length, project match) is the caller's (`Manager`'s) responsibility —
    /// the core only exposes the mutation.
    pub fn update_title(&self, title: String) {
        *self.title.write() = title;
    }

    pub fn title(&self) -> String {
        self.title.read().clone()
    }

    pub fn link_task(&self, task_id: String) {
        *self.task_id.write() = Some(task_id);
    }

    pub fn unlink_task(&self) {
        *self.task_id.write() = None;
    }

    pub fn set_scrollback_bytes(&self, bytes: usize) {
        self.scrollback.lock().set_limit(bytes);
    }

    pub fn set_ai_assistant_status(&self, cfg: HashMap<AssistantType, bool>) {
        *self.ai_assistant_status.write() = cfg;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (rows, cols) = *self.size.read();
        SessionSnapshot {
            id: self.id.clone(),
            project_id: self.project_id.clone(),
            worktree_id: self.worktree_id.clone(),
            task_id: self.task_id.read().clone(),
            title: self.title.read().clone(),
            status: self.status(),
            cwd: self.cwd.clone(),
            command: self.command.clone(),
            rows,
            cols,
            charset: self.charset_name.clone(),
            last_active: *self.last_active_wall.read(),
            last_error: self.last_error.read().clone(),
            metadata: self.metadata(),
        }
    }

    fn touch(&self) {
        *self.last_active_instant.write() = Instant::now();
        *self.last_active_wall.write() = Utc::now();
    }

    /// Idempotent explicit close: escalating SIGTERM/SIGKILL of the child
    /// process group, then teardown. Safe to call any number of times and
    /// from any lifecycle state.
    pub fn close(self: &Arc<Self>) {
        let session = self.clone();
        tokio::spawn(async move {
            session.teardown(None, true).await;
        });
    }

    /// Single-shot teardown, gated by `closing` so the PTY kill sequence
    /// and scrollback/status cleanup run exactly once regardless of which
    /// caller (explicit close, wait task, read-loop EOF) gets there first.
    async fn teardown(self: &Arc<Self>, reason: Option<String>, kill: bool) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.notify_waiters();
        if kill {
            if let Some(pty) = self.pty.read().clone() {
                pty.kill(KILL_GRACE).await;
            }
        }
        *self.last_error.write() = reason.clone();
        *self.status.write() = if reason.is_some() {
            SessionStatus::Error
        } else {
            SessionStatus::Closed
        };
        self.status_tracker.deactivate();
        self.hub.notify_exit(reason);
        log::info!("session {}: closed", self.id);
    }
}

/// Best-effort default title: the final path component of the launch
/// command's first argument, or `"shell"` if the command is empty.
fn default_title(command: &[String]) -> String {
    command
        .first()
        .and_then(|c| c.rsplit(['/', '\\']).next())
        .filter(|s| !s.is_empty())
        .unwrap_or("shell")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn echo_params(id: &str) -> SessionParams {
        SessionParams {
            id: id.to_string(),
            project_id: "p1".to_string(),
            worktree_id: "w1".to_string(),
            task_id: None,
            cwd: None,
            command: vec!["/bin/sh".to_string(), "-c".to_string(), "cat".to_string()],
            env: Map::new(),
            rows: 24,
            cols: 80,
            charset: Charset::Utf8,
            charset_name: "utf-8".to_string(),
            ai_assistant_status: Map::new(),
            scrollback_bytes: 64 * 1024,
        }
    }

    #[tokio::test]
    async fn write_then_capture_round_trips_through_the_pty() {
        let session = Session::new(echo_params("s1"));
        session.start().await.unwrap();
        assert_eq!(session.status(), SessionStatus::Running);

        let session2 = session.clone();
        let capture = tokio::spawn(async move {
            session2.capture_next_chunk(Duration::from_secs(2)).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.write(b"hi\n").unwrap();

        let chunk = capture.await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&chunk).contains("hi"));

        session.close();
    }

    #[tokio::test]
    async fn empty_write_is_a_no_op() {
        let session = Session::new(echo_params("s2"));
        session.start().await.unwrap();
        assert_eq!(session.write(&[]).unwrap(), 0);
        session.close();
    }

    #[tokio::test]
    async fn resize_with_non_positive_dimension_is_a_no_op() {
        let session = Session::new(echo_params("s3"));
        session.start().await.unwrap();
        assert!(session.resize(0, 80).is_ok());
        assert!(session.resize(24, 0).is_ok());
        session.close();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_exit_fires_exactly_once() {
        let session = Session::new(echo_params("s4"));
        session.start().await.unwrap();
        let mut sub = session.subscribe();

        session.close();
        session.close();

        let mut exits = 0;
        while let Some(event) = sub.recv().await {
            if let StreamEvent::Exit(_) = event {
                exits += 1;
            }
        }
        assert_eq!(exits, 1);
        assert_eq!(session.status(), SessionStatus::Closed);
    }

    #[tokio::test]
    async fn late_subscriber_is_replayed_prior_scrollback() {
        let session = Session::new(echo_params("s5"));
        session.start().await.unwrap();

        let warmup = session.clone();
        let warmup = tokio::spawn(async move {
            warmup.capture_next_chunk(Duration::from_secs(2)).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.write(b"hello\n").unwrap();
        warmup.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!session.scrollback_snapshot().is_empty());

        let mut late = session.subscribe();
        let mut seen = Vec::new();
        while seen.len() < 20 {
            match tokio::time::timeout(Duration::from_millis(200), late.recv()).await {
                Ok(Some(StreamEvent::Data(bytes))) => seen.extend_from_slice(&bytes),
                _ => break,
            }
        }
        assert!(String::from_utf8_lossy(&seen).contains("hello"));

        session.close();
    }
}
