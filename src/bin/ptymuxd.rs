//! Minimal smoke-test harness for the `ptymux` library: spawns one session
//! running the configured shell, mirrors its output to stdout, and forwards
//! stdin keystrokes to it until the child exits or the session is closed.
//!
//! Not a production daemon -- the real transport (HTTP/WebSocket) lives
//! above this crate. This binary exists so the data path (PTY -> scrollback
//! -> subscriber -> terminal) can be exercised by hand.

use std::io::{self, Read, Write};

use ptymux::{CreateSessionParams, ManagerConfig, StreamEvent};

#[tokio::main]
async fn main() {
    env_logger::init();

    let manager = ptymux::Manager::new(ManagerConfig::default());
    let session = manager
        .create_session(CreateSessionParams {
            id: None,
            project_id: "local".to_string(),
            worktree_id: "local".to_string(),
            task_id: None,
            cwd: None,
            command: None,
            env: std::collections::HashMap::new(),
            rows: 24,
            cols: 80,
            charset: None,
        })
        .await
        .expect("failed to create session");

    log::info!("session {} started, pid reported via metadata", session.id());

    let mut sub = session.subscribe();
    let reader = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some(event) = sub.recv().await {
            match event {
                StreamEvent::Data(bytes) => {
                    let _ = stdout.write_all(&bytes);
                    let _ = stdout.flush();
                }
                StreamEvent::Metadata(meta) => {
                    log::debug!("metadata: {:?}", meta.ai_assistant.state);
                }
                StreamEvent::Exit(reason) => {
                    log::info!("session exited: {reason:?}");
                    break;
                }
            }
        }
    });

    let writer_session = session.clone();
    let writer = tokio::task::spawn_blocking(move || {
        let mut stdin = io::stdin();
        let mut buf = [0u8; 4096];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if writer_session.write(&buf[..n]).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let _ = writer.await;
    session.close();
    let _ = reader.await;
}
