//! `gridsync trigger`: enqueue a grid edit for reconciliation.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde_json::{json, Value};

use gridsync_core::RowRange;
use gridsync_sync::ProduceAck;

use super::{call, print_json};

/// Arguments for `gridsync trigger`.
#[derive(Args, Debug)]
pub struct TriggerArgs {
    /// First edited sheet row (1-based; row 1 is the header).
    #[arg(long)]
    pub start: u32,

    /// Last edited sheet row, inclusive.
    #[arg(long)]
    pub end: u32,

    /// JSON file holding the sheet contents as an array of rows.
    #[arg(long)]
    pub file: PathBuf,

    /// Print the full acknowledgement as JSON.
    #[arg(long)]
    pub json: bool,
}

impl TriggerArgs {
    pub fn run(self) -> Result<()> {
        let raw = fs::read_to_string(&self.file)
            .with_context(|| format!("failed to read sheet data from {}", self.file.display()))?;
        let sheet_data: Value = serde_json::from_str(&raw)
            .with_context(|| format!("invalid sheet JSON in {}", self.file.display()))?;
        if !sheet_data.is_array() {
            bail!(
                "sheet data in {} must be an array of rows",
                self.file.display()
            );
        }

        let trigger = json!({
            "range": RowRange::new(self.start, self.end),
            "sheetData": sheet_data,
        });
        let ack: ProduceAck = serde_json::from_value(call("sheet-trigger", trigger)?)
            .context("daemon returned a malformed acknowledgement")?;
        if self.json {
            return print_json(&ack);
        }
        println!("{}", ack.message);
        if let Some(job) = ack.job_id {
            println!("job {job}");
        }
        Ok(())
    }
}
