//! CLI integration tests

use std::process::Command;

fn perfctl() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_perfctl"));
    cmd.env("NO_COLOR", "1");
    cmd
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = perfctl()
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("report"), "Should show report command");
    assert!(stdout.contains("metrics"), "Should show metrics command");
    assert!(stdout.contains("optimizers"), "Should show optimizers command");
    assert!(stdout.contains("optimize"), "Should show optimize command");
    assert!(stdout.contains("export"), "Should show export command");
    assert!(stdout.contains("config"), "Should show config command");
    assert!(stdout.contains("--api-url"), "Should show api-url option");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = perfctl()
        .arg("--version")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("perfctl"), "Should show binary name");
}

/// Test metrics aggregate subcommand help
#[test]
fn test_metrics_aggregate_help() {
    let output = perfctl()
        .args(["metrics", "aggregate", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--window"), "Should show window option");
    assert!(stdout.contains("--agg"), "Should show agg option");
}

/// Config validation runs without an agent
#[test]
fn test_config_validate_offline() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.json");
    std::fs::write(&good, r#"{"monitoring": {"interval_ms": 2000}}"#).unwrap();
    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, r#"{"storage": {"retention_hours": 0}}"#).unwrap();

    let output = perfctl()
        .args(["--api-url", "http://127.0.0.1:9/", "config", "validate"])
        .arg(&good)
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success(), "valid config should pass");
    assert!(String::from_utf8_lossy(&output.stdout).contains("is valid"));

    let output = perfctl()
        .args(["config", "validate"])
        .arg(&bad)
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success(), "invalid config should fail");
    assert!(String::from_utf8_lossy(&output.stderr).contains("retention_hours"));
}

/// An unreachable agent is a clean error, not a panic
#[test]
fn test_unreachable_agent_fails() {
    let output = perfctl()
        .args(["--api-url", "http://127.0.0.1:9/", "report"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to send request"));
}
