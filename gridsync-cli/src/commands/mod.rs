pub mod daemon;
pub mod jobs;
pub mod records;
pub mod rows;
pub mod status;
pub mod trigger;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::Value;

use gridsync_daemon::{request, DaemonError};

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Send one command to the running daemon and return its payload.
pub(crate) fn call(cmd: &str, args: Value) -> Result<Value> {
    let home = home_dir()?;
    match request(&home, cmd, args) {
        Ok(data) => Ok(data),
        Err(DaemonError::DaemonNotRunning { socket }) => bail!(
            "daemon is not running (no socket at {}); start it with `gridsync daemon start`",
            socket.display()
        ),
        Err(err) => Err(err).with_context(|| format!("'{cmd}' request failed")),
    }
}

pub(crate) fn print_json(value: &impl Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render JSON")?
    );
    Ok(())
}

/// Print the `message` field of a daemon reply.
pub(crate) fn print_message(reply: &Value) {
    match reply.get("message").and_then(Value::as_str) {
        Some(message) => println!("{message}"),
        None => println!("{reply}"),
    }
}
