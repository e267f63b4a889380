//! CLI integration tests

use chrono::{Duration, Utc};
use monitor_lib::TelemetryEvent;
use std::io::Write;
use std::process::Command;
use uuid::Uuid;

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = Command::new("cargo")
        .args(["run", "-p", "ltm-cli", "--", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("LLM Telemetry Monitor"),
        "Should show app name"
    );
    assert!(stdout.contains("replay"), "Should show replay command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = Command::new("cargo")
        .args(["run", "-p", "ltm-cli", "--", "--version"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("ltm"), "Should show binary name");
}

fn capture_event(inference_time: f64, offset_secs: i64) -> TelemetryEvent {
    TelemetryEvent {
        request_id: Uuid::new_v4(),
        timestamp: Utc::now() + Duration::seconds(offset_secs),
        provider: "openai".to_string(),
        model: "research-llm-7b".to_string(),
        application: "chat".to_string(),
        inference_time,
        success: true,
        prompt_tokens: 400,
        completion_tokens: Some(200),
        total_tokens: Some(600),
        estimated_cost: Some(0.002),
        error: None,
        memory_used: None,
    }
}

/// Replay a capture with a latency spike and read the findings back as JSON
#[test]
fn test_replay_reports_spike_as_json() {
    let mut capture = tempfile::NamedTempFile::new().expect("temp file");
    for i in 0..40 {
        let event = capture_event(1.0 + ((i % 10) as f64 - 4.5) * 0.01, i);
        writeln!(capture, "{}", serde_json::to_string(&event).unwrap()).unwrap();
    }
    writeln!(
        capture,
        "{}",
        serde_json::to_string(&capture_event(6.0, 41)).unwrap()
    )
    .unwrap();
    capture.flush().unwrap();

    let output = Command::new("cargo")
        .args([
            "run",
            "-p",
            "ltm-cli",
            "--",
            "--format",
            "json",
            "replay",
            capture.path().to_str().unwrap(),
            "--skip-periodic",
        ])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success(), "replay should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let findings: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("findings should be JSON");

    let types: Vec<&str> = findings
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|f| f["type"].as_str())
        .collect();
    assert!(
        types.contains(&"statistical_spike"),
        "expected a statistical_spike, got {types:?}"
    );
}

/// Undecodable lines are skipped without failing the replay
#[test]
fn test_replay_tolerates_garbage_lines() {
    let mut capture = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(capture, "not json at all").unwrap();
    for i in 0..10 {
        let event = capture_event(1.0, i);
        writeln!(capture, "{}", serde_json::to_string(&event).unwrap()).unwrap();
    }
    capture.flush().unwrap();

    let output = Command::new("cargo")
        .args([
            "run",
            "-p",
            "ltm-cli",
            "--",
            "replay",
            capture.path().to_str().unwrap(),
        ])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success(), "replay should tolerate garbage");
}
