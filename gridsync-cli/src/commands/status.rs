//! `gridsync status`: queue depth and guard state at a glance.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Deserialize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use gridsync_core::Provenance;
use gridsync_daemon::{request_status, DaemonError};
use gridsync_sync::{JobCounts, QueueName};

use super::{home_dir, print_json};

/// Arguments for `gridsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Deserialize)]
struct DaemonStatus {
    sheet: String,
    channel: String,
    engine: EngineReport,
}

#[derive(Debug, Deserialize)]
struct EngineReport {
    queues: Vec<QueueReport>,
    guard: GuardReport,
    bound_rows: usize,
}

#[derive(Debug, Deserialize)]
struct QueueReport {
    queue: QueueName,
    #[serde(flatten)]
    counts: JobCounts,
}

#[derive(Debug, Deserialize)]
struct GuardReport {
    slot: Option<Provenance>,
    in_flight: usize,
    recent: usize,
}

#[derive(Tabled)]
struct QueueLine {
    queue: String,
    waiting: usize,
    active: usize,
    completed: usize,
    failed: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let raw = match request_status(&home) {
            Ok(raw) => raw,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                if self.json {
                    return print_json(&serde_json::json!({ "running": false }));
                }
                println!("{} daemon is not running", "●".red());
                println!("Run 'gridsync daemon start' to begin syncing.");
                return Ok(());
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        };

        if self.json {
            return print_json(&raw);
        }
        print_report(raw)
    }
}

fn print_report(raw: Value) -> Result<()> {
    let status: DaemonStatus =
        serde_json::from_value(raw).context("daemon returned a malformed status")?;

    println!(
        "{} gridsync v{} | sheet {} | channel {}",
        "●".green(),
        env!("CARGO_PKG_VERSION"),
        status.sheet.bold(),
        status.channel.bold(),
    );

    let lines: Vec<QueueLine> = status
        .engine
        .queues
        .into_iter()
        .map(|q| QueueLine {
            queue: q.queue.as_str().to_string(),
            waiting: q.counts.waiting,
            active: q.counts.active,
            completed: q.counts.completed,
            failed: if q.counts.failed > 0 {
                q.counts.failed.to_string().red().to_string()
            } else {
                q.counts.failed.to_string()
            },
        })
        .collect();
    let mut table = Table::new(lines);
    table.with(Style::rounded());
    println!("{table}");

    let guard = status.engine.guard;
    let slot = guard
        .slot
        .map(|p| p.to_string())
        .unwrap_or_else(|| "none".to_string());
    println!(
        "guard: slot {} | {} batch(es) in flight | {} recent | {} bound row(s)",
        slot.cyan(),
        guard.in_flight,
        guard.recent,
        status.engine.bound_rows,
    );
    Ok(())
}
