use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn gridsync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("gridsync"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

#[test]
fn daemon_status_reports_not_running() {
    let home = TempDir::new().expect("home");
    let output = gridsync_cmd(home.path())
        .args(["daemon", "status"])
        .output()
        .expect("run daemon status");
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("status JSON");
    assert_eq!(value["running"], false);
    assert!(value["socket"]
        .as_str()
        .expect("socket path")
        .ends_with(".gridsync/daemon.sock"));
}

#[test]
fn daemon_stop_without_daemon_is_harmless() {
    let home = TempDir::new().expect("home");
    gridsync_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
}

#[test]
fn status_without_daemon_suggests_start() {
    let home = TempDir::new().expect("home");
    gridsync_cmd(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("gridsync daemon start"));
}

#[test]
fn client_commands_fail_without_daemon() {
    let home = TempDir::new().expect("home");
    for args in [
        vec!["rows", "list"],
        vec!["records", "get", "--id", "1"],
        vec!["records", "create", "--id", "1", "--name", "Ann"],
        vec!["jobs"],
    ] {
        gridsync_cmd(home.path())
            .args(&args)
            .assert()
            .failure()
            .stderr(contains("daemon is not running"));
    }
}

#[test]
fn trigger_rejects_unreadable_and_malformed_sheets() {
    let home = TempDir::new().expect("home");

    gridsync_cmd(home.path())
        .args(["trigger", "--start", "2", "--end", "2", "--file"])
        .arg(home.path().join("missing.json"))
        .assert()
        .failure()
        .stderr(contains("failed to read sheet data"));

    let sheet = home.path().join("sheet.json");
    fs::write(&sheet, r#"{"not": "rows"}"#).expect("write sheet");
    gridsync_cmd(home.path())
        .args(["trigger", "--start", "2", "--end", "2", "--file"])
        .arg(&sheet)
        .assert()
        .failure()
        .stderr(contains("must be an array of rows"));
}

#[test]
fn jobs_rejects_unknown_queue_and_state() {
    let home = TempDir::new().expect("home");
    gridsync_cmd(home.path())
        .args(["jobs", "--queue", "sheets"])
        .assert()
        .failure()
        .stderr(contains("unknown queue 'sheets'"));
    gridsync_cmd(home.path())
        .args(["jobs", "--state", "stalled"])
        .assert()
        .failure()
        .stderr(contains("unknown job state 'stalled'"));
}
