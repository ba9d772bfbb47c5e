use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde_json::Value;
use tempfile::TempDir;

fn gridsync_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_gridsync"))
}

struct DaemonProcess {
    child: Child,
    home: PathBuf,
}

impl DaemonProcess {
    fn start(home: PathBuf) -> Self {
        let child = Command::new(gridsync_bin())
            .env("HOME", &home)
            .env("USERPROFILE", &home)
            .args(["daemon", "start"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");
        Self { child, home }
    }

    fn stop(&mut self) {
        let _ = gridsync(&self.home, &["daemon", "stop"]);

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            sleep(Duration::from_millis(50));
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

fn gridsync(home: &Path, args: &[&str]) -> Output {
    Command::new(gridsync_bin())
        .env("HOME", home)
        .env("USERPROFILE", home)
        .args(args)
        .output()
        .expect("run gridsync")
}

fn gridsync_json(home: &Path, args: &[&str]) -> Option<Value> {
    let output = gridsync(home, args);
    if !output.status.success() {
        return None;
    }
    serde_json::from_slice(&output.stdout).ok()
}

fn daemon_running(home: &Path) -> bool {
    gridsync_json(home, &["daemon", "status"])
        .and_then(|v| v.get("running").and_then(Value::as_bool))
        .unwrap_or(false)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(100));
    }
    false
}

fn assert_success(output: &Output, what: &str) -> String {
    assert!(
        output.status.success(),
        "{what} failed: {}",
        String::from_utf8_lossy(&output.stderr),
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn edits_flow_both_ways_without_echo() {
    let home = TempDir::new().expect("home");
    let mut daemon = DaemonProcess::start(home.path().to_path_buf());
    assert!(
        wait_until(Duration::from_secs(5), || daemon_running(home.path())),
        "daemon did not report running state in time",
    );

    // Relational insert reaches the grid through the change trigger.
    let created = gridsync(
        home.path(),
        &["records", "create", "--id", "1", "--name", "Ann", "--age", "30", "--city", "NYC"],
    );
    assert_success(&created, "records create");
    let propagated = wait_until(Duration::from_secs(5), || {
        gridsync_json(home.path(), &["rows", "list", "--json"])
            .map(|rows| rows.to_string().contains("Ann"))
            .unwrap_or(false)
    });
    assert!(propagated, "record 1 never reached the grid");

    // A grid edit is reconciled into the relational store.
    let sheet = home.path().join("sheet.json");
    std::fs::write(
        &sheet,
        r#"[["id","name","age","city"],["1","Ann","31","LA"]]"#,
    )
    .expect("write sheet");
    let sheet_arg = sheet.to_str().expect("utf-8 path");
    let ack = gridsync(
        home.path(),
        &["trigger", "--start", "2", "--end", "2", "--file", sheet_arg],
    );
    let stdout = assert_success(&ack, "trigger");
    assert!(stdout.contains("Sheet sync job added to queue"), "{stdout}");

    let reconciled = wait_until(Duration::from_secs(5), || {
        gridsync_json(home.path(), &["records", "get", "--id", "1"])
            .map(|record| record["city"] == "LA" && record["age"] == 31)
            .unwrap_or(false)
    });
    assert!(reconciled, "grid edit was not reconciled");

    // Direct row edits mirror into records synchronously.
    let appended = gridsync(
        home.path(),
        &["rows", "append", "--id", "2", "--name", "Bo", "--city", "SF"],
    );
    let stdout = assert_success(&appended, "rows append");
    assert!(stdout.contains("Row added successfully"), "{stdout}");
    let record = gridsync_json(home.path(), &["records", "get", "--id", "2"]).expect("record 2");
    assert_eq!(record["name"], "Bo");
    assert!(record["age"].is_null());

    // Only the relational insert produced a propagation job.
    let settled = wait_until(Duration::from_secs(5), || {
        gridsync_json(home.path(), &["jobs", "--json"])
            .and_then(|jobs| jobs.as_array().cloned())
            .map(|jobs| {
                jobs.len() == 2 && jobs.iter().all(|job| job["state"] == "completed")
            })
            .unwrap_or(false)
    });
    assert!(settled, "expected exactly two completed jobs");
    let propagations = gridsync_json(home.path(), &["jobs", "--queue", "relational-sync", "--json"])
        .expect("relational jobs");
    assert_eq!(propagations.as_array().map(Vec::len), Some(1));

    let status = gridsync(home.path(), &["status"]);
    let stdout = assert_success(&status, "status");
    assert!(stdout.contains("grid-sync"), "{stdout}");

    daemon.stop();
    assert!(
        wait_until(Duration::from_secs(2), || !daemon_running(home.path())),
        "daemon still reports running after stop",
    );
}
