//! Output formatters for run events and migration status.

use std::path::Path;

use clap::ValueEnum;
use comfy_table::Table;
use waymark_core::{MigrationStatus, Outcome, RunEvent, RunReport};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text and tables
    Table,
    /// JSON, one document per line
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format a progress event. `None` means the event is not shown.
    fn format_event(&self, event: &RunEvent) -> Option<String>;

    /// Format the final report of a run.
    fn format_report(&self, report: &RunReport) -> String;

    /// Format migration status.
    fn format_status(&self, statuses: &[MigrationStatus]) -> String;

    /// Format a created migration path.
    fn format_created(&self, path: &Path) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Text formatter using comfy-table for listings.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_event(&self, event: &RunEvent) -> Option<String> {
        match event {
            RunEvent::Nop { direction } => Some(format!("Nothing to {}", direction.verb())),
            RunEvent::Started { direction, count } => {
                Some(format!("Migration started {} ({} pending)", direction, count))
            }
            RunEvent::Migrated { name, direction } => {
                Some(format!("Successfully {}d: {}", direction.verb(), name))
            }
            RunEvent::Failed { name, reason } => {
                let mut line = format!("Error occurred during migration: {}", name);
                if let Some(reason) = reason {
                    line.push('\n');
                    line.push_str(reason);
                }
                Some(line)
            }
            // The report covers completion.
            RunEvent::Complete { .. } => None,
        }
    }

    fn format_report(&self, report: &RunReport) -> String {
        match &report.outcome {
            Outcome::Nop => String::new(),
            Outcome::Complete { names } => {
                format!("{} migration(s) {}d", names.len(), report.direction.verb())
            }
            Outcome::Halted {
                executed, failed, ..
            } => format!(
                "Stopped at {} after {} migration(s); state was not saved",
                failed,
                executed.len()
            ),
        }
    }

    fn format_status(&self, statuses: &[MigrationStatus]) -> String {
        if statuses.is_empty() {
            return "No migrations".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec!["Migration", "Status"]);
        for status in statuses {
            let state = if status.applied { "applied" } else { "pending" };
            table.add_row(vec![status.name.as_str(), state]);
        }
        table.to_string()
    }

    fn format_created(&self, path: &Path) -> String {
        format!("Successfully created migration: {}", path.display())
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_event(&self, event: &RunEvent) -> Option<String> {
        serde_json::to_string(event).ok()
    }

    fn format_report(&self, report: &RunReport) -> String {
        serde_json::to_string(report).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
    }

    fn format_status(&self, statuses: &[MigrationStatus]) -> String {
        serde_json::to_string_pretty(statuses).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_created(&self, path: &Path) -> String {
        serde_json::json!({ "created": path.display().to_string() }).to_string()
    }
}
