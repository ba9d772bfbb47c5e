//! gridsync: grid ↔ relational sync daemon and client.
//!
//! # Usage
//!
//! ```text
//! gridsync daemon start|stop|status
//! gridsync trigger --start <row> --end <row> --file <sheet.json>
//! gridsync rows list|append|update|clear
//! gridsync records list|get|create|update|delete
//! gridsync jobs [--queue grid-sync|relational-sync] [--state <state>] [--json]
//! gridsync status [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, jobs::JobsArgs, records::RecordsCommand, rows::RowsCommand,
    status::StatusArgs, trigger::TriggerArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "gridsync",
    version,
    about = "Keep a spreadsheet grid and a relational table in sync",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run, stop or inspect the sync daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Queue a grid edit for reconciliation into the relational store.
    Trigger(TriggerArgs),

    /// Read and edit grid rows; edits are mirrored into the relational store.
    Rows {
        #[command(subcommand)]
        command: RowsCommand,
    },

    /// Read and edit relational records; changes propagate to the grid.
    Records {
        #[command(subcommand)]
        command: RecordsCommand,
    },

    /// List queued, active and finished sync jobs.
    Jobs(JobsArgs),

    /// Summarise queue depth and guard state.
    Status(StatusArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Trigger(args) => args.run(),
        Commands::Rows { command } => commands::rows::run(command),
        Commands::Records { command } => commands::records::run(command),
        Commands::Jobs(args) => args.run(),
        Commands::Status(args) => args.run(),
    }
}
