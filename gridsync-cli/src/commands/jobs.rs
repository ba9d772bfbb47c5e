//! `gridsync jobs`: queue inspection.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::Args;
use colored::Colorize;
use serde_json::{Map, Value};
use tabled::{settings::Style, Table, Tabled};

use gridsync_sync::{JobRecord, JobState, QueueName};

use super::{call, print_json};

/// Arguments for `gridsync jobs`.
#[derive(Args, Debug)]
pub struct JobsArgs {
    /// Restrict to one queue (`grid-sync` or `relational-sync`).
    #[arg(long, value_parser = parse_queue)]
    pub queue: Option<QueueName>,

    /// Restrict to one state (`waiting`, `active`, `completed`, `failed`).
    #[arg(long, value_parser = parse_state)]
    pub state: Option<JobState>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

fn parse_queue(raw: &str) -> Result<QueueName, String> {
    QueueName::parse(raw)
        .ok_or_else(|| format!("unknown queue '{raw}'; expected: grid-sync, relational-sync"))
}

fn parse_state(raw: &str) -> Result<JobState, String> {
    JobState::parse(raw).ok_or_else(|| {
        format!("unknown job state '{raw}'; expected: waiting, active, completed, failed")
    })
}

#[derive(Tabled)]
struct JobLine {
    #[tabled(rename = "job")]
    id: u64,
    queue: String,
    state: String,
    #[tabled(rename = "from")]
    provenance: String,
    attempts: u32,
    created: String,
    finished: String,
    #[tabled(rename = "result")]
    outcome: String,
}

impl JobsArgs {
    pub fn run(self) -> Result<()> {
        let mut args = Map::new();
        if let Some(queue) = self.queue {
            args.insert("queue".into(), Value::from(queue.as_str()));
        }
        if let Some(state) = self.state {
            args.insert("state".into(), Value::from(state.to_string()));
        }
        let args = if args.is_empty() {
            Value::Null
        } else {
            Value::Object(args)
        };

        let jobs: Vec<JobRecord> = serde_json::from_value(call("jobs", args)?)
            .context("daemon returned malformed job records")?;
        if self.json {
            return print_json(&jobs);
        }
        if jobs.is_empty() {
            println!("No jobs.");
            return Ok(());
        }

        let lines: Vec<JobLine> = jobs.into_iter().map(job_line).collect();
        let mut table = Table::new(lines);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn job_line(job: JobRecord) -> JobLine {
    let outcome = match (&job.failed_reason, &job.return_value) {
        (Some(reason), _) => reason.clone(),
        (None, Some(value)) => value
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        (None, None) => String::new(),
    };
    JobLine {
        id: job.id.0,
        queue: job.queue.as_str().to_string(),
        state: state_label(job.state),
        provenance: job.provenance.to_string(),
        attempts: job.attempts_made,
        created: format_time(job.created_at),
        finished: job.finished_at.map(format_time).unwrap_or_default(),
        outcome,
    }
}

fn state_label(state: JobState) -> String {
    let label = state.to_string();
    match state {
        JobState::Waiting => label.yellow().to_string(),
        JobState::Active => label.cyan().to_string(),
        JobState::Completed => label.green().to_string(),
        JobState::Failed => label.red().to_string(),
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}
