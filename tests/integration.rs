//! Cross-task integration tests exercising the full PTY spawn -> read loop
//! -> subscriber fan-out path through the public `ptymux` API, driving a
//! real `/bin/sh` rather than mocking the OS boundary.

use std::collections::HashMap;
use std::time::Duration;

use ptymux::{CreateSessionParams, ManagerConfig, Manager, StreamEvent};

fn echo_session_params(id: &str, project: &str) -> CreateSessionParams {
    CreateSessionParams {
        id: Some(id.to_string()),
        project_id: project.to_string(),
        worktree_id: "w1".to_string(),
        task_id: None,
        cwd: None,
        command: Some(vec!["/bin/sh".to_string(), "-c".to_string(), "cat".to_string()]),
        env: HashMap::new(),
        rows: 24,
        cols: 80,
        charset: None,
    }
}

/// Every subscriber attached before close observes exactly one `Exit`
/// event, and all subscribers see the same data in the same order.
#[tokio::test]
async fn every_subscriber_sees_one_exit_and_consistent_data_order() {
    let manager = Manager::new(ManagerConfig::default());
    let session = manager
        .create_session(echo_session_params("s1", "p1"))
        .await
        .unwrap();

    let sub_a = session.subscribe();
    let sub_b = session.subscribe();

    session.write(b"hello\n").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.close();

    let collect = |mut sub: ptymux::Subscription| async move {
        let mut data = Vec::new();
        let mut exits = 0;
        while let Some(event) = sub.recv().await {
            match event {
                StreamEvent::Data(bytes) => data.extend_from_slice(&bytes),
                StreamEvent::Exit(_) => exits += 1,
                StreamEvent::Metadata(_) => {}
            }
        }
        (data, exits)
    };

    let (data_a, exits_a) = tokio::time::timeout(Duration::from_secs(2), collect(sub_a))
        .await
        .unwrap();
    let (data_b, exits_b) = tokio::time::timeout(Duration::from_secs(2), collect(sub_b))
        .await
        .unwrap();

    assert_eq!(exits_a, 1);
    assert_eq!(exits_b, 1);
    assert!(String::from_utf8_lossy(&data_a).contains("hello"));
    assert!(String::from_utf8_lossy(&data_b).contains("hello"));
}

/// With `maxSessionsPerProject = 2`, a third create for the same project
/// fails with `SessionLimitReached`; after closing one, a fourth succeeds.
#[tokio::test]
async fn per_project_session_limit_is_enforced_and_recovers_after_close() {
    let mut cfg = ManagerConfig::default();
    cfg.max_sessions_per_project = 2;
    let manager = Manager::new(cfg);

    let s1 = manager
        .create_session(echo_session_params("lim-1", "proj"))
        .await
        .unwrap();
    let _s2 = manager
        .create_session(echo_session_params("lim-2", "proj"))
        .await
        .unwrap();

    let err = manager
        .create_session(echo_session_params("lim-3", "proj"))
        .await
        .unwrap_err();
    assert!(matches!(err, ptymux::ManagerError::SessionLimitReached(_)));

    s1.close();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let s4 = manager
        .create_session(echo_session_params("lim-4", "proj"))
        .await
        .unwrap();
    assert_eq!(s4.project_id(), "proj");
}

/// `CaptureNextChunk` concurrently with a `Write` observes the written
/// bytes within the timeout (scenario 6 from the external behavior list).
#[tokio::test]
async fn capture_next_chunk_observes_concurrent_write() {
    let manager = Manager::new(ManagerConfig::default());
    let session = manager
        .create_session(echo_session_params("cap-1", "p1"))
        .await
        .unwrap();

    let capture_session = session.clone();
    let capture = tokio::spawn(async move {
        capture_session
            .capture_next_chunk(Duration::from_secs(2))
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    session.write(b"hi\n").unwrap();

    let chunk = capture.await.unwrap().unwrap();
    assert!(String::from_utf8_lossy(&chunk).contains("hi"));

    session.close();
}

/// Rename validation: blank and over-length titles are rejected; a
/// well-formed title is reflected in the next snapshot.
#[tokio::test]
async fn rename_session_end_to_end() {
    let manager = Manager::new(ManagerConfig::default());
    let session = manager
        .create_session(echo_session_params("ren-1", "p1"))
        .await
        .unwrap();

    assert!(manager.rename_session("p1", "ren-1", "   ").is_err());
    let long_title = "x".repeat(65);
    assert!(manager.rename_session("p1", "ren-1", &long_title).is_err());

    assert!(manager.rename_session("p1", "ren-1", "My shell").is_ok());
    assert_eq!(session.snapshot().title, "My shell");

    session.close();
}

/// The idle reaper closes sessions whose last activity is older than the
/// configured timeout, without affecting freshly active ones.
#[tokio::test]
async fn idle_reaper_closes_only_stale_sessions() {
    let mut cfg = ManagerConfig::default();
    cfg.idle_timeout = Duration::from_millis(30);
    let manager = Manager::new(cfg);

    let stale = manager
        .create_session(echo_session_params("idle-1", "p1"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    let fresh = manager
        .create_session(echo_session_params("idle-2", "p1"))
        .await
        .unwrap();

    manager.reap_idle_sessions();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(stale.status(), ptymux::SessionStatus::Closed);
    assert_eq!(fresh.status(), ptymux::SessionStatus::Running);

    fresh.close();
}

/// A session's working directory is actually applied to the spawned child,
/// not just recorded in the snapshot. The child prints its cwd on a loop so
/// a subscriber attaching slightly after spawn still observes it, rather
/// than racing a one-shot command against PTY bring-up latency.
#[tokio::test]
async fn session_spawns_child_in_requested_cwd() {
    let dir = tempfile::tempdir().unwrap();
    let canonical = dir.path().canonicalize().unwrap();

    let manager = Manager::new(ManagerConfig::default());
    let session = manager
        .create_session(CreateSessionParams {
            id: Some("cwd-1".to_string()),
            project_id: "p1".to_string(),
            worktree_id: "w1".to_string(),
            task_id: None,
            cwd: Some(canonical.to_string_lossy().to_string()),
            command: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "while true; do pwd; sleep 1; done".to_string(),
            ]),
            env: HashMap::new(),
            rows: 24,
            cols: 80,
            charset: None,
        })
        .await
        .unwrap();

    let chunk = session
        .capture_next_chunk(Duration::from_secs(3))
        .await
        .unwrap();
    let output = String::from_utf8_lossy(&chunk);
    let leaf = canonical.file_name().unwrap().to_str().unwrap();
    assert!(output.contains(leaf), "expected {output:?} to contain {leaf:?}");

    session.close();
}
