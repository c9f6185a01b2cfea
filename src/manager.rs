//! `Manager`: the session registry, admission control, configuration
//! surface, and the glue between a session's metadata stream and the
//! completion/approval record store.
//!
//! Registry shape follows a project/worktree-scoped `DashMap`, with
//! config mutation pushed down to sessions the same way `ManagerConfig`'s
//! fields flow through `update_ai_assistant_status_config` and friends.
//! Extended with the status-driven completion/approval record wiring that
//! a plain session registry doesn't need on its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::assistant::{AssistantState, AssistantType};
use crate::config::ManagerConfig;
use crate::encoding::Charset;
use crate::error::ManagerError;
use crate::records::{CompletionState, NewApproval, NewCompletion, RecordManager};
use crate::session::{Session, SessionParams, TITLE_MAX_SCALARS};
use crate::subscriber::StreamEvent;

const REAP_TICK: Duration = Duration::from_secs(60);

/// Parameters for `Manager::create_session`. `id` is generated when absent;
/// `command` overrides the configured shell when present and non-empty.
pub struct CreateSessionParams {
    pub id: Option<String>,
    pub project_id: String,
    pub worktree_id: String,
    pub task_id: Option<String>,
    pub cwd: Option<String>,
    pub command: Option<Vec<String>>,
    pub env: HashMap<String, String>,
    pub rows: u16,
    pub cols: u16,
    pub charset: Option<String>,
}

/// Owns every live session, the process-wide configuration, and the
/// completion/approval record store. Cheap to clone (an `Arc` wrapper is the
/// expected way to share it); the registry itself is a lock-free map so
/// reads never contend with the admission path.
pub struct Manager {
    sessions: DashMap<String, Arc<Session>>,
    config: RwLock<ManagerConfig>,
    admission: Mutex<()>,
    records: Arc<RecordManager>,
    reaper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Manager {
    pub fn new(config: ManagerConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            sessions: DashMap::new(),
            config: RwLock::new(config),
            admission: Mutex::new(()),
            records: Arc::new(RecordManager::new()),
            reaper: Mutex::new(None),
        });
        let handle = manager.spawn_reaper();
        *manager.reaper.lock() = Some(handle);
        manager
    }

    pub fn record_manager(&self) -> Arc<RecordManager> {
        self.records.clone()
    }

    pub fn config_snapshot(&self) -> ManagerConfig {
        self.config.read().clone()
    }

    pub fn ai_assistant_status_config(&self) -> HashMap<AssistantType, bool> {
        self.config.read().ai_assistant_status.clone()
    }

    /// Validates project/worktree identity, resolves the launch command,
    /// checks the per-project admission limit, and starts the session.
    /// The session is reserved in the registry (under the admission lock)
    /// before its PTY is spawned, and removed again if the spawn fails, so a
    /// failed admission never leaves a half-registered session behind.
    pub async fn create_session(
        self: &Arc<Self>,
        params: CreateSessionParams,
    ) -> Result<Arc<Session>, ManagerError> {
        if params.project_id.trim().is_empty() || params.worktree_id.trim().is_empty() {
            return Err(ManagerError::InvalidArgs(
                "project_id and worktree_id must be non-empty".to_string(),
            ));
        }

        let command = self.resolve_command(params.command)?;

        let cfg = self.config_snapshot();
        let charset_name = params
            .charset
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| cfg.encoding.clone());
        let charset = Charset::parse(&charset_name)?;

        let id = params.id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let session_params = SessionParams {
            id: id.clone(),
            project_id: params.project_id.clone(),
            worktree_id: params.worktree_id,
            task_id: params.task_id,
            cwd: params.cwd,
            command,
            env: params.env,
            rows: params.rows,
            cols: params.cols,
            charset,
            charset_name,
            ai_assistant_status: cfg.ai_assistant_status.clone(),
            scrollback_bytes: cfg.effective_scrollback_bytes(),
        };
        let session = Session::new(session_params);

        {
            let _guard = self.admission.lock();
            if cfg.max_sessions_per_project > 0
                && self.count_by_project(&params.project_id) as i64 >= cfg.max_sessions_per_project
            {
                return Err(ManagerError::SessionLimitReached(params.project_id));
            }
            self.sessions.insert(id.clone(), session.clone());
        }

        if let Err(e) = session.start().await {
            self.sessions.remove(&id);
            return Err(e.into());
        }

        log::info!(
            "manager: created session {} for project {}",
            id,
            session.project_id()
        );

        self.spawn_session_watcher(session.clone());

        Ok(session)
    }

    pub fn get_session(&self, id: &str) -> Result<Arc<Session>, ManagerError> {
        self.sessions
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| ManagerError::SessionNotFound(id.to_string()))
    }

    pub fn list_sessions(&self, project_id: Option<&str>) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|e| project_id.map(|p| e.value().project_id() == p).unwrap_or(true))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Trims and validates a new title (non-empty, at most
    /// `TITLE_MAX_SCALARS` unicode scalars) and, if `project_id` is
    /// non-empty, requires it to match the session's own project.
    pub fn rename_session(&self, project_id: &str, id: &str, title: &str) -> Result<(), ManagerError> {
        let session = self.get_session(id)?;
        if !project_id.is_empty() && project_id != session.project_id() {
            return Err(ManagerError::SessionNotFound(id.to_string()));
        }
        let trimmed = title.trim();
        if trimmed.is_empty() || trimmed.chars().count() > TITLE_MAX_SCALARS {
            return Err(ManagerError::InvalidSessionTitle(title.to_string()));
        }
        session.update_title(trimmed.to_string());
        Ok(())
    }

    /// Idempotent: closing an already-closed session is a no-op (delegated
    /// to `Session::close`'s own idempotent teardown).
    pub fn close_session(&self, id: &str) -> Result<(), ManagerError> {
        let session = self.get_session(id)?;
        session.close();
        Ok(())
    }

    pub fn link_task(&self, id: &str, task_id: String) -> Result<(), ManagerError> {
        self.get_session(id)?.link_task(task_id);
        Ok(())
    }

    pub fn unlink_task(&self, id: &str) -> Result<(), ManagerError> {
        self.get_session(id)?.unlink_task();
        Ok(())
    }

    pub async fn capture_chunk(&self, id: &str, timeout: Duration) -> Result<Vec<u8>, ManagerError> {
        let session = self.get_session(id)?;
        session.capture_next_chunk(timeout).await.map_err(ManagerError::from)
    }

    /// Replaces the AI-assistant enablement map and pushes it to every live
    /// session so the next metadata tick re-evaluates with the new policy.
    pub fn update_ai_assistant_status_config(&self, status: HashMap<AssistantType, bool>) {
        self.config.write().ai_assistant_status = status.clone();
        for entry in self.sessions.iter() {
            entry.value().set_ai_assistant_status(status.clone());
        }
    }

    /// Toggles scrollback retention and pushes the effective byte limit to
    /// every live session's buffer.
    pub fn update_scrollback_enabled(&self, enabled: bool) {
        let effective = {
            let mut cfg = self.config.write();
            cfg.scrollback_enabled = enabled;
            cfg.effective_scrollback_bytes()
        };
        for entry in self.sessions.iter() {
            entry.value().set_scrollback_bytes(effective);
        }
    }

    /// Policy-only flag: title derivation from the foreground command is a
    /// concern of the caller, not the core, so no session is touched here.
    pub fn update_rename_title_each_command(&self, enabled: bool) {
        self.config.write().rename_title_each_command = enabled;
    }

    fn count_by_project(&self, project_id: &str) -> usize {
        self.sessions
            .iter()
            .filter(|e| e.value().project_id() == project_id)
            .count()
    }

    /// Order of resolution: an explicit non-empty override, then the
    /// platform-configured shell command line, then the platform built-in.
    /// The latter two are plain strings and need POSIX-style tokenization;
    /// an override is already a split argv.
    fn resolve_command(&self, override_argv: Option<Vec<String>>) -> Result<Vec<String>, ManagerError> {
        if let Some(argv) = override_argv {
            if !argv.is_empty() {
                return Ok(argv);
            }
        }
        let line = self.config.read().shell.for_platform().to_string();
        let argv = tokenize_command(&line);
        if argv.is_empty() {
            return Err(ManagerError::InvalidShellCommand);
        }
        Ok(argv)
    }

    fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAP_TICK);
            interval.tick().await;
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(manager) => manager.reap_idle_sessions(),
                    None => break,
                }
            }
        })
    }

    /// Closes every session whose `last_active` instant is older than the
    /// configured idle timeout. A zero timeout disables reaping entirely.
    /// Exposed separately from the background tick so it can be driven
    /// deterministically in tests.
    pub fn reap_idle_sessions(&self) {
        let timeout = self.config.read().idle_timeout;
        if timeout.is_zero() {
            return;
        }
        let now = Instant::now();
        let stale: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .filter(|e| now.saturating_duration_since(e.value().last_active()) > timeout)
            .map(|e| e.value().clone())
            .collect();
        for session in stale {
            log::info!("manager: reaping idle session {}", session.id());
            session.close();
        }
    }

    /// Drives the completion/approval record lifecycle off a session's
    /// metadata stream, and deregisters the session from the registry on
    /// exit. One task per session, started right after admission.
    fn spawn_session_watcher(self: &Arc<Self>, session: Arc<Session>) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut sub = session.subscribe();
            let mut prior_state = AssistantState::Unknown;
            let mut ever_detected = false;

            while let Some(event) = sub.recv().await {
                match event {
                    StreamEvent::Metadata(meta) => {
                        let info = &meta.ai_assistant;
                        if !info.detected {
                            if ever_detected {
                                manager.records.clear_session_records(session.id());
                                ever_detected = false;
                                prior_state = AssistantState::Unknown;
                            }
                            continue;
                        }
                        ever_detected = true;
                        let new_state = info.state;
                        if new_state != prior_state {
                            manager.apply_transition(&session, info.kind, prior_state, new_state);
                            prior_state = new_state;
                        }
                    }
                    StreamEvent::Exit(_) => {
                        manager.records.clear_session_records(session.id());
                        break;
                    }
                    StreamEvent::Data(_) => {}
                }
            }
            manager.sessions.remove(session.id());
            log::debug!("manager: deregistered session {}", session.id());
        });
    }

    /// The completion/approval wiring rules: entering `waiting_input` from
    /// `working` produces a completion; entering `waiting_approval` produces
    /// an approval; re-entering `working` either flips an existing
    /// completion back to `working` or starts a fresh one; leaving
    /// `waiting_approval` for any other state clears outstanding approvals.
    fn apply_transition(
        &self,
        session: &Arc<Session>,
        assistant: AssistantType,
        old: AssistantState,
        new: AssistantState,
    ) {
        if old == AssistantState::WaitingApproval && new != AssistantState::WaitingApproval {
            self.records.clear_approvals_for_session(session.id());
        }

        match new {
            AssistantState::WaitingInput if old == AssistantState::Working => {
                self.records.clear_completions_for_session(session.id());
                self.records.add_completion(NewCompletion {
                    session_id: session.id().to_string(),
                    project_id: session.project_id().to_string(),
                    title: session.title(),
                    assistant,
                    state: Some(CompletionState::Completed),
                    last_user_input: session.last_input_capture().unwrap_or_default(),
                });
            }
            AssistantState::WaitingApproval if old != AssistantState::WaitingApproval => {
                self.records.clear_approvals_for_session(session.id());
                self.records.add_approval(NewApproval {
                    session_id: session.id().to_string(),
                    project_id: session.project_id().to_string(),
                    title: session.title(),
                    assistant,
                });
            }
            AssistantState::Working => {
                let matched = self
                    .records
                    .update_completion_state_by_session(session.id(), CompletionState::Working);
                if !matched {
                    self.records.add_completion(NewCompletion {
                        session_id: session.id().to_string(),
                        project_id: session.project_id().to_string(),
                        title: session.title(),
                        assistant,
                        state: Some(CompletionState::Working),
                        last_user_input: session.last_input_capture().unwrap_or_default(),
                    });
                }
            }
            _ => {}
        }
    }
}

/// Minimal POSIX-style command-line tokenizer: splits on whitespace outside
/// quotes, honors single/double quotes (no expansion inside single quotes),
/// and treats a backslash as escaping the next character outside single
/// quotes. Enough for the plain shell command lines this crate resolves
/// configuration from; not a general shell parser.
fn tokenize_command(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut has_token = false;
    let mut in_single = false;
    let mut in_double = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                has_token = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                has_token = true;
            }
            '\\' if !in_single => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                has_token = true;
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_plain_and_quoted_command_lines() {
        assert_eq!(tokenize_command("/bin/bash"), vec!["/bin/bash"]);
        assert_eq!(
            tokenize_command("powershell.exe -NoLogo"),
            vec!["powershell.exe", "-NoLogo"]
        );
        assert_eq!(
            tokenize_command("sh -c 'echo hello world'"),
            vec!["sh", "-c", "echo hello world"]
        );
        assert_eq!(tokenize_command(""), Vec::<String>::new());
    }

    #[tokio::test]
    async fn create_session_rejects_blank_project_or_worktree_id() {
        let manager = Manager::new(ManagerConfig::default());
        let err = manager
            .create_session(CreateSessionParams {
                id: None,
                project_id: String::new(),
                worktree_id: "w1".to_string(),
                task_id: None,
                cwd: None,
                command: Some(vec!["/bin/sh".to_string()]),
                env: HashMap::new(),
                rows: 24,
                cols: 80,
                charset: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::InvalidArgs(_)));
    }

    #[tokio::test]
    async fn create_session_enforces_per_project_limit() {
        let mut cfg = ManagerConfig::default();
        cfg.max_sessions_per_project = 1;
        let manager = Manager::new(cfg);

        let make = |id: &str| CreateSessionParams {
            id: Some(id.to_string()),
            project_id: "p1".to_string(),
            worktree_id: "w1".to_string(),
            task_id: None,
            cwd: None,
            command: Some(vec!["/bin/sh".to_string(), "-c".to_string(), "cat".to_string()]),
            env: HashMap::new(),
            rows: 24,
            cols: 80,
            charset: None,
        };

        let first = manager.create_session(make("a")).await.unwrap();
        let err = manager.create_session(make("b")).await.unwrap_err();
        assert!(matches!(err, ManagerError::SessionLimitReached(_)));

        first.close();
    }

    #[tokio::test]
    async fn rename_session_validates_title_and_project_scope() {
        let manager = Manager::new(ManagerConfig::default());
        let session = manager
            .create_session(CreateSessionParams {
                id: Some("s1".to_string()),
                project_id: "p1".to_string(),
                worktree_id: "w1".to_string(),
                task_id: None,
                cwd: None,
                command: Some(vec!["/bin/sh".to_string(), "-c".to_string(), "cat".to_string()]),
                env: HashMap::new(),
                rows: 24,
                cols: 80,
                charset: None,
            })
            .await
            .unwrap();

        assert!(manager.rename_session("p1", "s1", "  build  ").is_ok());
        assert_eq!(session.title(), "build");

        assert!(manager.rename_session("p1", "s1", "   ").is_err());
        assert!(manager.rename_session("other-project", "s1", "ok").is_err());

        session.close();
    }

    #[tokio::test]
    async fn close_session_on_unknown_id_reports_not_found() {
        let manager = Manager::new(ManagerConfig::default());
        assert!(matches!(
            manager.close_session("missing"),
            Err(ManagerError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn reap_idle_sessions_closes_sessions_past_the_timeout() {
        let mut cfg = ManagerConfig::default();
        cfg.idle_timeout = Duration::from_millis(1);
        let manager = Manager::new(cfg);

        let session = manager
            .create_session(CreateSessionParams {
                id: Some("s1".to_string()),
                project_id: "p1".to_string(),
                worktree_id: "w1".to_string(),
                task_id: None,
                cwd: None,
                command: Some(vec!["/bin/sh".to_string(), "-c".to_string(), "cat".to_string()]),
                env: HashMap::new(),
                rows: 24,
                cols: 80,
                charset: None,
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.reap_idle_sessions();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.status(), crate::session::SessionStatus::Closed);
    }
}
