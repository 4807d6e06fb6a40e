//! Output formatting for lstream-cli (table, json, csv)

use clap::ValueEnum;
use colored::Colorize;
use lstream_client::ItemData;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Plain lines and ASCII tables (default)
    #[default]
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{}", msg.green());
        }
    }

    /// Print an info message (unless in quiet mode)
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{}", msg);
        }
    }

    /// Print a warning message
    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    /// Print an error message
    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg.red());
    }

    /// Print rows in the configured format
    ///
    /// CSV uses the same column names and cell text as the table.
    pub fn print_rows<T: Tabled + Serialize>(&self, rows: &[T]) {
        match self.format {
            OutputFormat::Table if rows.is_empty() => {
                if !self.quiet {
                    println!("No data");
                }
            }
            OutputFormat::Table => println!("{}", Table::new(rows)),
            OutputFormat::Json => match serde_json::to_string_pretty(rows) {
                Ok(json) => println!("{}", json),
                Err(e) => self.error(&format!("Failed to encode output: {}", e)),
            },
            OutputFormat::Csv => {
                for line in csv_lines(rows) {
                    println!("{}", line);
                }
            }
        }
    }
}

/// Header line followed by one line per row
fn csv_lines<T: Tabled>(rows: &[T]) -> Vec<String> {
    std::iter::once(csv_line(&T::headers()))
        .chain(rows.iter().map(|row| csv_line(&row.fields())))
        .collect()
}

fn csv_line(cells: &[Cow<'_, str>]) -> String {
    cells
        .iter()
        .map(|cell| escape_csv(cell))
        .collect::<Vec<_>>()
        .join(",")
}

/// Escape a value for CSV output
fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Display form of a field value; null is shown as `null`
pub fn display_value(value: &Option<String>) -> String {
    match value {
        Some(v) => v.clone(),
        None => "null".to_string(),
    }
}

/// Print one item update as it arrives
pub fn print_update(
    format: OutputFormat,
    item: &str,
    fields: &[String],
    current: &ItemData,
    update: &ItemData,
) {
    match format {
        OutputFormat::Table => {
            let values: Vec<String> = fields
                .iter()
                .filter_map(|f| current.get(f).map(|v| (f, v)))
                .map(|(f, v)| {
                    let text = format!("{}={}", f, display_value(v));
                    if update.contains_key(f) {
                        text.bold().to_string()
                    } else {
                        text
                    }
                })
                .collect();
            println!("[{}] {}", item.cyan(), values.join(" "));
        }
        OutputFormat::Json => {
            let event = UpdateEvent {
                item,
                values: current,
                changed: fields.iter().filter(|f| update.contains_key(*f)).collect(),
            };
            if let Ok(json) = serde_json::to_string(&event) {
                println!("{}", json);
            }
        }
        OutputFormat::Csv => {
            for field in fields {
                if let Some(value) = update.get(field) {
                    println!(
                        "{},{},{}",
                        escape_csv(item),
                        escape_csv(field),
                        escape_csv(&display_value(value))
                    );
                }
            }
        }
    }
}

// =============================================================================
// Display types for commands
// =============================================================================

/// Streamed update for JSON output
#[derive(Debug, Serialize)]
struct UpdateEvent<'a> {
    item: &'a str,
    values: &'a ItemData,
    changed: Vec<&'a String>,
}

/// Last known value of one field, for the monitor summary
#[derive(Debug, Tabled, Serialize)]
pub struct ItemRow {
    #[tabled(rename = "Item")]
    pub item: String,
    #[tabled(rename = "Field")]
    pub field: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

/// Outcome of a sent message
#[derive(Debug, Tabled, Serialize)]
pub struct OutcomeRow {
    #[tabled(rename = "Sequence")]
    pub sequence: String,
    #[tabled(rename = "Numbers")]
    pub numbers: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Error")]
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_csv() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_csv_lines_use_table_columns() {
        let rows = [ItemRow {
            item: "item1".to_string(),
            field: "last".to_string(),
            value: "1,5".to_string(),
        }];
        assert_eq!(
            csv_lines(&rows),
            vec!["Item,Field,Value".to_string(), "item1,last,\"1,5\"".to_string()]
        );
    }

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(&Some("10".to_string())), "10");
        assert_eq!(display_value(&Some(String::new())), "");
        assert_eq!(display_value(&None), "null");
    }
}
