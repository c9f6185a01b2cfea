//! Error taxonomy for the session multiplexer.
//!
//! Each subsystem boundary gets its own `thiserror` enum, mirroring the
//! reference `PtyError` shape: a small set of constructors, a `Display`
//! impl, and nothing that requires callers to match on string messages.

use thiserror::Error;

/// Errors raised while spawning or driving a single PTY.
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to open pty: {0}")]
    OpenFailed(String),
    #[error("failed to spawn child process: {0}")]
    SpawnFailed(String),
    #[error("pty write failed: {0}")]
    WriteFailed(String),
    #[error("pty resize failed: {0}")]
    ResizeFailed(String),
}

/// Errors raised by operations on a single `Session`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unrecognized charset: {0}")]
    InvalidEncoding(String),
    #[error(transparent)]
    Pty(#[from] PtyError),
    #[error("session is closed")]
    Closed,
    #[error("capture timed out")]
    CaptureTimeout,
}

/// Errors raised by `Manager` operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("project {0} has reached its session limit")]
    SessionLimitReached(String),
    #[error("invalid session title: {0}")]
    InvalidSessionTitle(String),
    #[error("invalid shell command")]
    InvalidShellCommand,
    #[error("invalid argument: {0}")]
    InvalidArgs(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<PtyError> for ManagerError {
    fn from(err: PtyError) -> Self {
        ManagerError::Session(SessionError::Pty(err))
    }
}
