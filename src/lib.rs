//! `ptymux`: a local, long-running multiplexer that owns a fleet of
//! interactive shell sessions backed by pseudo-terminals.
//!
//! A [`manager::Manager`] admits and tracks [`session::Session`]s, each of
//! which owns one PTY and child process, normalizes its output through a
//! configurable charset, keeps a bounded [`scrollback::Scrollback`], fans
//! output out to any number of [`subscriber::Subscription`]s, and feeds a
//! [`status_tracker::StatusTracker`] that runs a [`vt::VirtualTerminal`]
//! over the byte stream to infer the activity state of an AI coding
//! assistant running inside the shell. State transitions drive the
//! in-memory completion/approval notifications in [`records::RecordManager`].
//!
//! This crate is transport-agnostic: it has no HTTP/WebSocket server, no
//! persistence, and no terminal UI renderer. A caller wires it up to
//! whatever protocol it needs (see `src/bin/ptymuxd.rs` for a minimal
//! example driving a session over stdio).

pub mod assistant;
pub mod config;
pub mod encoding;
pub mod error;
pub mod manager;
pub mod proc_info;
pub mod pty;
pub mod records;
pub mod scrollback;
pub mod session;
pub mod status_tracker;
pub mod subscriber;
pub mod vt;

pub use config::ManagerConfig;
pub use error::{ManagerError, PtyError, SessionError};
pub use manager::{CreateSessionParams, Manager};
pub use records::RecordManager;
pub use session::{Session, SessionMetadata, SessionSnapshot, SessionStatus};
pub use subscriber::{StreamEvent, Subscription};
