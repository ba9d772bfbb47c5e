//! `gridsync records`: relational records.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::{json, Value};
use tabled::{settings::Style, Table, Tabled};

use gridsync_core::Record;

use super::{call, print_json, print_message};

/// Record fields shared by the create/update and row append/update commands.
#[derive(Args, Debug, Clone)]
pub struct RecordArgs {
    #[arg(long)]
    pub id: i64,

    #[arg(long)]
    pub name: String,

    /// Omit to store a null age.
    #[arg(long)]
    pub age: Option<i64>,

    #[arg(long, default_value = "")]
    pub city: String,
}

impl RecordArgs {
    pub fn to_record(&self) -> Record {
        Record::new(self.id, &self.name, self.age, &self.city)
    }

    pub fn to_json(&self) -> Result<Value> {
        serde_json::to_value(self.to_record()).context("failed to encode record")
    }
}

#[derive(Subcommand, Debug)]
pub enum RecordsCommand {
    /// List every record.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one record.
    Get {
        #[arg(long)]
        id: i64,
    },
    /// Insert a record; the change trigger appends it to the grid.
    Create(RecordArgs),
    /// Update a record in place.
    Update(RecordArgs),
    /// Delete a record.
    Delete {
        #[arg(long)]
        id: i64,
    },
}

#[derive(Tabled)]
pub(crate) struct RecordLine {
    id: i64,
    name: String,
    age: String,
    city: String,
}

impl From<Record> for RecordLine {
    fn from(record: Record) -> Self {
        Self {
            id: record.id.0,
            name: record.name,
            age: record.age.map(|a| a.to_string()).unwrap_or_default(),
            city: record.city,
        }
    }
}

pub fn run(command: RecordsCommand) -> Result<()> {
    match command {
        RecordsCommand::List { json } => {
            let records: Vec<Record> = serde_json::from_value(call("records", Value::Null)?)
                .context("daemon returned malformed records")?;
            if json {
                return print_json(&records);
            }
            if records.is_empty() {
                println!("No records.");
                return Ok(());
            }
            let mut table = Table::new(records.into_iter().map(RecordLine::from));
            table.with(Style::rounded());
            println!("{table}");
        }
        RecordsCommand::Get { id } => {
            print_json(&call("records", json!({ "id": id }))?)?;
        }
        RecordsCommand::Create(args) => {
            print_json(&call("record-create", args.to_json()?)?)?;
        }
        RecordsCommand::Update(args) => {
            print_json(&call("record-update", args.to_json()?)?)?;
        }
        RecordsCommand::Delete { id } => {
            print_message(&call("record-delete", json!({ "id": id }))?);
        }
    }
    Ok(())
}
