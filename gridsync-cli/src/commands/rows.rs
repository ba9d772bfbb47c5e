//! `gridsync rows`: grid rows, mirrored into the relational store.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::{json, Map, Value};
use tabled::{settings::Style, Table, Tabled};

use super::records::RecordArgs;
use super::{call, print_json, print_message};

#[derive(Subcommand, Debug)]
pub enum RowsCommand {
    /// Print every data row keyed by header name.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Append a row and insert the matching record.
    Append(RecordArgs),
    /// Overwrite the row bound to `--id` and update the record.
    Update(RecordArgs),
    /// Clear the row bound to `--id` and delete the record.
    Clear {
        #[arg(long)]
        id: i64,
    },
}

#[derive(Tabled)]
struct RowLine {
    id: String,
    name: String,
    age: String,
    city: String,
}

fn cell(row: &Map<String, Value>, column: &str) -> String {
    match row.get(column) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

pub fn run(command: RowsCommand) -> Result<()> {
    match command {
        RowsCommand::List { json } => {
            let rows: Vec<Map<String, Value>> = serde_json::from_value(call("rows", Value::Null)?)
                .context("daemon returned malformed rows")?;
            if json {
                return print_json(&rows);
            }
            let lines = rows.iter().map(|row| RowLine {
                id: cell(row, "id"),
                name: cell(row, "name"),
                age: cell(row, "age"),
                city: cell(row, "city"),
            });
            let mut table = Table::new(lines);
            table.with(Style::rounded());
            println!("{table}");
        }
        RowsCommand::Append(args) => report_row(call("row-append", args.to_json()?)?),
        RowsCommand::Update(args) => report_row(call("row-update", args.to_json()?)?),
        RowsCommand::Clear { id } => report_row(call("row-clear", json!({ "id": id }))?),
    }
    Ok(())
}

fn report_row(reply: Value) {
    print_message(&reply);
    if let Some(row) = reply.get("row").and_then(Value::as_u64) {
        println!("row {row}");
    }
}
