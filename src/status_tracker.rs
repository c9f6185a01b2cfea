//! Converts a session's raw byte stream into an authoritative, debounced
//! `AssistantState` for whichever AI coding assistant is detected in its
//! shell, resilient to redraw flicker and intermittent output.
//!
//! Runs as a `tokio::spawn`'d loop gated by a running flag, polling the
//! in-process virtual terminal on an interval rather than watching for
//! file or process changes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::assistant::{detector_for, AssistantState, AssistantType, StatusDetector};
use crate::vt::VirtualTerminal;

const PROCESS_THROTTLE: Duration = Duration::from_millis(100);
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(500);

struct Inner {
    active: bool,
    assistant_type: AssistantType,
    vt: Option<VirtualTerminal>,
    detector: Option<Box<dyn StatusDetector>>,
    rows: u16,
    cols: u16,
    state: AssistantState,
    changed_at: Instant,
    recent_detected_at: Option<Instant>,
    last_process_time: Option<Instant>,
    /// Most recent distinct non-empty captures last, i.e. `.last()` is the
    /// newest. Capped at 2 entries.
    recent_input_captures: Vec<String>,
    poll_handle: Option<JoinHandle<()>>,
}

impl Inner {
    fn idle(now: Instant) -> Self {
        Self {
            active: false,
            assistant_type: AssistantType::Unknown,
            vt: None,
            detector: None,
            rows: 24,
            cols: 80,
            state: AssistantState::Unknown,
            changed_at: now,
            recent_detected_at: None,
            last_process_time: None,
            recent_input_captures: Vec::new(),
            poll_handle: None,
        }
    }

    /// Records a freshly captured input string, keeping only the last two
    /// *distinct* non-empty captures (back-to-back repeats of the same
    /// in-progress capture don't count as a new one).
    fn push_input_capture(&mut self, captured: String) {
        if captured.is_empty() {
            return;
        }
        if self.recent_input_captures.last() == Some(&captured) {
            return;
        }
        self.recent_input_captures.push(captured);
        if self.recent_input_captures.len() > 2 {
            self.recent_input_captures.remove(0);
        }
    }
}

/// Owns the per-session VT, the assistant-specific detector, and the
/// debounced state machine over their output. `process_chunk` and the
/// internal idle poller both funnel through `evaluate`, which drops the
/// lock before invoking the state-change callback.
pub struct StatusTracker {
    inner: Mutex<Inner>,
    on_change: Box<dyn Fn(AssistantState) + Send + Sync>,
}

impl StatusTracker {
    pub fn new(on_change: impl Fn(AssistantState) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::idle(Instant::now())),
            on_change: Box::new(on_change),
        })
    }

    /// Idempotent on an unchanged assistant type (only resizes if needed).
    /// On a type change, tears down the old poller, builds a fresh VT and
    /// detector, and starts the idle poller if the type has a detector at
    /// all (unsupported types simply stay inactive).
    pub fn activate(self: &Arc<Self>, kind: AssistantType, rows: u16, cols: u16) {
        let mut should_spawn_poller = false;
        {
            let mut inner = self.inner.lock();
            if inner.active && inner.assistant_type == kind {
                if inner.rows != rows || inner.cols != cols {
                    if let Some(vt) = inner.vt.as_mut() {
                        vt.resize(rows, cols);
                    }
                    inner.rows = rows;
                    inner.cols = cols;
                }
                return;
            }

            if let Some(handle) = inner.poll_handle.take() {
                handle.abort();
            }

            let detector = detector_for(kind);
            let active = detector.is_some();
            let now = Instant::now();
            *inner = Inner {
                active,
                assistant_type: kind,
                vt: if active {
                    Some(VirtualTerminal::new(rows, cols))
                } else {
                    None
                },
                detector,
                rows,
                cols,
                state: AssistantState::WaitingInput,
                changed_at: now,
                recent_detected_at: None,
                last_process_time: None,
                recent_input_captures: Vec::new(),
                poll_handle: None,
            };
            should_spawn_poller = active;
        }
        if should_spawn_poller {
            self.spawn_idle_poller();
        }
    }

    pub fn deactivate(&self) {
        let mut inner = self.inner.lock();
        if let Some(handle) = inner.poll_handle.take() {
            handle.abort();
        }
        *inner = Inner::idle(Instant::now());
    }

    pub fn resize(&self, rows: u16, cols: u16) {
        let mut inner = self.inner.lock();
        if let Some(vt) = inner.vt.as_mut() {
            vt.resize(rows, cols);
        }
        inner.rows = rows;
        inner.cols = cols;
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    pub fn assistant_type(&self) -> AssistantType {
        self.inner.lock().assistant_type
    }

    pub fn state(&self) -> AssistantState {
        self.inner.lock().state
    }

    pub fn last_input_capture(&self) -> Option<String> {
        self.inner.lock().recent_input_captures.last().cloned()
    }

    /// The last two distinct non-empty input captures, oldest first.
    pub fn last_input_captures(&self) -> Vec<String> {
        self.inner.lock().recent_input_captures.clone()
    }

    /// Step 1-6 of chunk processing: unconditionally advances the VT, then
    /// (throttled to once per 100ms) re-derives the state from the
    /// currently-visible screen.
    pub fn process_chunk(&self, chunk: &[u8]) {
        let now = Instant::now();
        let transition = {
            let mut inner = self.inner.lock();
            if !inner.active {
                return;
            }
            if let Some(vt) = inner.vt.as_mut() {
                vt.write(chunk);
            }
            if let Some(last) = inner.last_process_time {
                if now.duration_since(last) < PROCESS_THROTTLE {
                    return;
                }
            }
            inner.last_process_time = Some(now);
            self.evaluate(&mut inner, now)
        };
        if let Some(state) = transition {
            (self.on_change)(state);
        }
    }

    fn spawn_idle_poller(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(IDLE_POLL_INTERVAL);
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                let tracker = match weak.upgrade() {
                    Some(t) => t,
                    None => break,
                };
                if !tracker.is_active() {
                    break;
                }
                tracker.poll_idle();
            }
        });
        self.inner.lock().poll_handle = Some(handle);
    }

    fn poll_idle(&self) {
        let now = Instant::now();
        let transition = {
            let mut inner = self.inner.lock();
            if !inner.active {
                return;
            }
            let due = inner
                .last_process_time
                .map(|t| now.duration_since(t) >= IDLE_POLL_INTERVAL)
                .unwrap_or(true);
            if !due {
                return;
            }
            self.evaluate(&mut inner, now)
        };
        if let Some(state) = transition {
            (self.on_change)(state);
        }
    }

    /// Re-derives state from the current VT screen. Returns `Some(state)`
    /// only when the tracker's externally-visible state actually changed,
    /// so callers can invoke the callback after releasing the lock.
    fn evaluate(&self, inner: &mut Inner, now: Instant) -> Option<AssistantState> {
        let detector = inner.detector.as_ref()?;
        let vt = inner.vt.as_ref()?;
        let lines = vt.visible_lines();
        let cols = inner.cols;

        let (state, detected) =
            detector.detect_state_from_lines(&lines, cols, now, inner.state, inner.recent_detected_at);

        if detected {
            inner.recent_detected_at = Some(now);
        }

        let captured = detector.capture_input(&lines, &|row, col| {
            vt.is_faint_at(row as u16, col as u16)
        });
        if let Some(captured) = captured {
            inner.push_input_capture(captured);
        }

        if state != inner.state && state != AssistantState::Unknown {
            inner.state = state;
            inner.changed_at = now;
            return Some(state);
        }
        None
    }
}
