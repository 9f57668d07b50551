//! Integration tests for the `labsync` CLI binary.
//!
//! Argument parsing, config handling and error exit codes, all without a
//! live lab server.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a command with env isolation: config lives under `home`, and no
/// `LABSYNC_*` variable leaks in from the developer's shell.
fn labsync_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("labsync");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("LABSYNC_PROFILE")
        .env_remove("LABSYNC_URL")
        .env_remove("LABSYNC_OUTPUT")
        .env_remove("LABSYNC_TIMEOUT");
    cmd
}

fn write_config(home: &Path, body: &str) {
    let dir = home.join("labsync");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.toml"), body).unwrap();
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = TempDir::new().unwrap();
    let output = labsync_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    labsync_cmd(home.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("watch")
            .and(predicate::str::contains("status"))
            .and(predicate::str::contains("pump"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    let home = TempDir::new().unwrap();
    labsync_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("labsync"));
}

#[test]
fn test_invalid_subcommand() {
    let home = TempDir::new().unwrap();
    labsync_cmd(home.path())
        .arg("frobnicate")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_pump_speed_must_be_numeric() {
    let home = TempDir::new().unwrap();
    labsync_cmd(home.path())
        .args(["pump", "pump_1", "speed", "fast"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_pump_actions_exist() {
    let home = TempDir::new().unwrap();
    labsync_cmd(home.path())
        .args(["pump", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("start")
                .and(predicate::str::contains("stop"))
                .and(predicate::str::contains("toggle"))
                .and(predicate::str::contains("speed")),
        );
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_follows_xdg() {
    let home = TempDir::new().unwrap();
    labsync_cmd(home.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("labsync").and(predicate::str::contains("config.toml")));
}

#[test]
fn test_config_show_without_file_prints_defaults() {
    let home = TempDir::new().unwrap();
    labsync_cmd(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("default_profile").and(predicate::str::contains("timeout")));
}

#[test]
fn test_config_show_reads_profiles() {
    let home = TempDir::new().unwrap();
    write_config(
        home.path(),
        "[profiles.bench]\nurl = \"ws://bench.local:8000/ws\"\n",
    );
    labsync_cmd(home.path())
        .args(["config", "show", "-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ws://bench.local:8000/ws"));
}

// ── Session resolution errors ───────────────────────────────────────

#[test]
fn test_status_without_server_is_a_usage_error() {
    let home = TempDir::new().unwrap();
    labsync_cmd(home.path())
        .arg("status")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("No server configured"));
}

#[test]
fn test_unknown_profile() {
    let home = TempDir::new().unwrap();
    write_config(home.path(), "[profiles.bench]\nurl = \"ws://bench/ws\"\n");
    labsync_cmd(home.path())
        .args(["status", "--profile", "prod"])
        .assert()
        .failure()
        .code(4)
        .stderr(predicate::str::contains("prod"));
}

#[test]
fn test_url_must_be_websocket() {
    let home = TempDir::new().unwrap();
    labsync_cmd(home.path())
        .env("LABSYNC_URL", "http://lab.local/ws")
        .arg("status")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("ws://"));
}

#[test]
fn test_unreachable_server_times_out() {
    let home = TempDir::new().unwrap();
    labsync_cmd(home.path())
        .args(["status", "--url", "ws://127.0.0.1:9/ws", "--timeout", "1"])
        .assert()
        .failure()
        .code(8)
        .stderr(predicate::str::contains("initial state"));
}
