//! Integration tests for the session engine
//!
//! These drive a real `/bin/sh` on a pseudo-terminal.
//! Run with: cargo test -p integration-tests

#![cfg(unix)]

use integration_tests::*;
use termprompter_engine::domain::recording::{EventKind, Recording};
use termprompter_engine::{
    BackendKind, ContainerConfig, DisplayMessage, Error, RecordingOptions, SessionState, Surface,
};

// ============================================================================
// Local shell
// ============================================================================

#[tokio::test]
async fn test_local_shell_runs_commands() {
    let mut t = TestSession::start(sh_config()).await.unwrap();
    assert_eq!(t.session.backend_kind(), Some(BackendKind::Local));

    t.session
        .send_input(Surface::Primary, b"echo termprompter-$((20+22))\r")
        .await
        .unwrap();

    // The echoed input shows the unexpanded form, only the result matches
    t.wait_for_output("termprompter-42").await.unwrap();
}

#[tokio::test]
async fn test_shell_exit_leaves_session_idle() {
    let mut t = TestSession::start(sh_config()).await.unwrap();

    t.session.write_command("exit 3", true).await.unwrap();
    t.drive_until(DEFAULT_TIMEOUT, |s| s.session.state() == SessionState::Idle)
        .await
        .unwrap();

    assert!(t.session.backend_kind().is_none());
    assert!(t
        .messages
        .contains(&DisplayMessage::SessionState(SessionState::Idle)));
}

#[tokio::test]
async fn test_resize_reaches_shell() {
    let mut t = TestSession::start(sh_config()).await.unwrap();

    t.session.resize(100, 30).await;
    t.session
        .send_input(Surface::Primary, b"stty size\r")
        .await
        .unwrap();

    t.wait_for_output("30 100").await.unwrap();
}

// ============================================================================
// Recording
// ============================================================================

#[tokio::test]
async fn test_recording_saved_as_cast() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = TestSession::start(sh_config()).await.unwrap();

    t.session
        .start_recording(RecordingOptions {
            title: Some("integration".to_string()),
            ..Default::default()
        })
        .unwrap();
    t.session
        .send_input(Surface::Primary, b"echo rec-$((1+1))\r")
        .await
        .unwrap();
    t.wait_for_output("rec-2").await.unwrap();
    t.session.stop_recording().unwrap();

    let saved = t
        .session
        .save_recording(Some(&dir.path().join("demo")))
        .await
        .unwrap();
    assert_eq!(saved, dir.path().join("demo.cast"));

    let text = std::fs::read_to_string(&saved).unwrap();
    let first_line: serde_json::Value =
        serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!(first_line["version"], 2);
    assert_eq!(first_line["width"], 80);
    assert_eq!(first_line["title"], "integration");

    let recording = Recording::parse(&text).unwrap();
    assert!(recording
        .events
        .iter()
        .any(|e| e.kind == EventKind::Input && e.payload.contains("echo rec-")));
    let output: String = recording
        .events
        .iter()
        .filter(|e| e.kind == EventKind::Output)
        .map(|e| e.payload.as_str())
        .collect();
    assert!(output.contains("rec-2"));

    let stats = t.session.recording_stats().unwrap();
    assert_eq!(stats.input_events, 1);
    assert_eq!(stats.total_events, recording.events.len());
}

// ============================================================================
// Scripts
// ============================================================================

#[tokio::test]
async fn test_typed_step_command_advances() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("demo.md");
    std::fs::write(
        &script,
        "# Demo\n\n## Step 1: Greet\n```bash\necho one\n```\n\n## Step 2: Again\n```bash\necho two\n```\n",
    )
    .unwrap();

    let config = termprompter_engine::Config {
        detect_commands_from_input: true,
        advance_delay_ms: 0,
        ..sh_config()
    };
    let mut t = TestSession::start(config).await.unwrap();
    let loaded = t.session.load_script(&script).await.unwrap();
    assert_eq!(loaded.steps.len(), 2);
    assert!(loaded.docker.is_none());

    t.session.write_command("echo one", true).await.unwrap();
    t.drive_until(DEFAULT_TIMEOUT, |s| {
        s.messages.contains(&DisplayMessage::AdvanceStep(1))
    })
    .await
    .unwrap();
    assert_eq!(t.session.active_step(), 1);
}

// ============================================================================
// Container sessions
// ============================================================================

#[tokio::test]
async fn test_unreachable_engine_keeps_local_shell() {
    let mut t = TestSession::start(sh_config()).await.unwrap();
    assert!(!t.session.check_engine().await);

    let err = t
        .session
        .start_container_session(ContainerConfig::for_image("alpine"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EngineUnavailable(_)));
    assert_eq!(t.session.backend_kind(), Some(BackendKind::Local));

    let status = t.session.status().await;
    assert!(!status.is_containerized);
    assert!(!status.engine_available);
    assert!(status.container.is_none());

    // the fallback shell is usable
    t.session
        .send_input(Surface::Primary, b"echo back-$((2*3))\r")
        .await
        .unwrap();
    t.wait_for_output("back-6").await.unwrap();

    t.session.shutdown().await;
    assert_eq!(t.session.state(), SessionState::Idle);
}
