//! Output formatters for migration reports.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use rosterdb_core::migration::{
    MigrationDefinition, MigrationResult, PreviewReport, RollbackResult, ValidationIssue,
    ValidationReport,
};
use rosterdb_core::BackupInfo;
use serde::Serialize;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
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

/// Row count of a workbook table.
#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    /// Table name.
    pub name: String,
    /// Header columns.
    pub columns: usize,
    /// Data rows.
    pub rows: usize,
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format a preview.
    fn format_preview(&self, report: &PreviewReport) -> String;

    /// Format an execute result.
    fn format_result(&self, result: &MigrationResult) -> String;

    /// Format a validation report.
    fn format_validation(&self, report: &ValidationReport) -> String;

    /// Format a rollback or restore.
    fn format_rollback(&self, result: &RollbackResult) -> String;

    /// Format known migration definitions.
    fn format_definitions(&self, definitions: &[MigrationDefinition]) -> String;

    /// Format workbook tables.
    fn format_tables(&self, tables: &[TableSummary]) -> String;

    /// Format stored backups.
    fn format_backups(&self, backups: &[BackupInfo]) -> String;

    /// Format a simple message.
    fn format_message(&self, message: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_preview(&self, report: &PreviewReport) -> String {
        let mut table = Table::new();
        table.set_header(vec![
            "Table", "Key", "Rows", "Live", "Blank", "Legacy keys", "Shape", "LegacyId",
            "Depends on", "Referenced by",
        ]);
        for t in &report.tables {
            let legacy_id = match (t.preserve_legacy, t.legacy_column_present) {
                (false, _) => "-",
                (true, true) => "present",
                (true, false) => "will create",
            };
            table.add_row(vec![
                Cell::new(&t.table),
                Cell::new(&t.primary_key),
                Cell::new(t.total_rows),
                Cell::new(t.live_rows),
                Cell::new(t.blank_rows),
                Cell::new(t.pending),
                Cell::new(t.classification),
                Cell::new(legacy_id),
                Cell::new(t.depends_on.join(", ")),
                Cell::new(t.referenced_by.join(", ")),
            ]);
        }

        let mut output = format!("Migration: {}\n", report.migration_id);
        if !report.description.is_empty() {
            output.push_str(&format!("{}\n", report.description));
        }
        output.push_str(&table.to_string());
        output.push_str(&format!("\nForeign keys: {}", report.foreign_keys.len()));
        for fk in &report.foreign_keys {
            let required = if fk.required { " (required)" } else { "" };
            output.push_str(&format!("\n  {}{}", fk, required));
        }
        if let Some(backup) = &report.existing_backup {
            output.push_str(&format!(
                "\nExisting backup: {} ({})",
                backup.backup_id, backup.created_at
            ));
        }
        if report.already_optimal {
            output.push_str("\nAlready optimal: every key has the identifier shape");
        } else {
            output.push_str(&format!("\n{} key(s) would be reassigned", report.pending()));
        }
        output
    }

    fn format_result(&self, result: &MigrationResult) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Table", "Migrated", "Already migrated", "LegacyId created"]);
        for t in &result.tables {
            table.add_row(vec![
                Cell::new(&t.table),
                Cell::new(t.rows_migrated),
                Cell::new(t.already_migrated),
                Cell::new(if t.legacy_column_created { "yes" } else { "no" }),
            ]);
        }

        let mut remap = Table::new();
        remap.set_header(vec!["Foreign key", "Rows", "Values"]);
        for count in &result.remap.counts {
            remap.add_row(vec![
                Cell::new(format!("{}.{} -> {}", count.table, count.column, count.references)),
                Cell::new(count.rows_updated),
                Cell::new(count.values_rewritten),
            ]);
        }
        for failure in &result.remap.failures {
            remap.add_row(vec![
                Cell::new(format!("{}.{}", failure.table, failure.column)),
                Cell::new("failed"),
                Cell::new(&failure.reason),
            ]);
        }

        let backup = result
            .backup
            .as_ref()
            .map(|b| b.backup_id.as_str())
            .unwrap_or("none, nothing to migrate");
        let mut output = format!(
            "Migration {}: {}\nBackup: {}\n{}\n{}\n",
            result.migration_id, result.status, backup, table, remap
        );
        output.push_str(&self.format_validation(&result.validation));
        for warning in &result.warnings {
            output.push_str(&format!("\nwarning: {}", warning));
        }
        output
    }

    fn format_validation(&self, report: &ValidationReport) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Pass", "Checked", "Failed"]);
        let mut passes = vec![
            ("identity", report.identity),
            ("uniqueness", report.uniqueness),
            ("referential", report.referential),
        ];
        if let Some(legacy) = report.legacy {
            passes.push(("legacy (warnings)", legacy));
        }
        for (name, tally) in passes {
            table.add_row(vec![
                Cell::new(name),
                Cell::new(tally.checked),
                Cell::new(tally.failed),
            ]);
        }

        let verdict = if report.passed() { "passed" } else { "FAILED" };
        let mut output = format!("Validation {}\n{}", verdict, table);
        if !report.issues.is_empty() || !report.warnings.is_empty() {
            output.push('\n');
            output.push_str(&issue_table(report.issues.iter().chain(&report.warnings)));
        }
        output
    }

    fn format_rollback(&self, result: &RollbackResult) -> String {
        let mut output = format!(
            "Migration {}: {} via {}\nRestored tables: {}",
            result.migration_id,
            result.status,
            result.path,
            result.restored_tables.join(", ")
        );
        if result.degraded {
            output.push_str(&format!(
                "\nDegraded: {} key(s) restored from legacy ids, {} reference row(s) reverted",
                result.keys_restored,
                result.remap.rows_updated()
            ));
            for failure in &result.remap.failures {
                output.push_str(&format!(
                    "\nwarning: {}.{} not reverted: {}",
                    failure.table, failure.column, failure.reason
                ));
            }
        }
        output
    }

    fn format_definitions(&self, definitions: &[MigrationDefinition]) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Migration", "Plan", "Related", "Foreign keys", "Description"]);
        for d in definitions {
            table.add_row(vec![
                Cell::new(&d.id),
                Cell::new(d.plan_tables().join(" -> ")),
                Cell::new(
                    d.related
                        .iter()
                        .map(|t| t.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                ),
                Cell::new(d.foreign_keys.len()),
                Cell::new(&d.description),
            ]);
        }
        table.to_string()
    }

    fn format_tables(&self, tables: &[TableSummary]) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Table", "Columns", "Rows"]);
        for t in tables {
            table.add_row(vec![Cell::new(&t.name), Cell::new(t.columns), Cell::new(t.rows)]);
        }
        table.to_string()
    }

    fn format_backups(&self, backups: &[BackupInfo]) -> String {
        if backups.is_empty() {
            return "No backups".to_string();
        }
        let mut table = Table::new();
        table.set_header(vec!["Backup", "Created", "Tables"]);
        for b in backups {
            table.add_row(vec![
                Cell::new(&b.backup_id),
                Cell::new(b.created_at.to_rfc3339()),
                Cell::new(b.tables.join(", ")),
            ]);
        }
        table.to_string()
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

fn issue_table<'a>(issues: impl Iterator<Item = &'a ValidationIssue>) -> String {
    let mut table = Table::new();
    table.set_header(vec!["Pass", "Location", "Column", "Value", "Reason"]);
    for issue in issues {
        let locations = issue
            .locations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        table.add_row(vec![
            Cell::new(issue.pass),
            Cell::new(locations),
            Cell::new(&issue.column),
            Cell::new(&issue.value),
            Cell::new(&issue.reason),
        ]);
    }
    table.to_string()
}

/// JSON formatter.
pub struct JsonFormatter;

impl JsonFormatter {
    fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|e| {
            serde_json::json!({ "error": e.to_string() }).to_string()
        })
    }
}

impl Formatter for JsonFormatter {
    fn format_preview(&self, report: &PreviewReport) -> String {
        Self::pretty(report)
    }

    fn format_result(&self, result: &MigrationResult) -> String {
        Self::pretty(result)
    }

    fn format_validation(&self, report: &ValidationReport) -> String {
        Self::pretty(report)
    }

    fn format_rollback(&self, result: &RollbackResult) -> String {
        Self::pretty(result)
    }

    fn format_definitions(&self, definitions: &[MigrationDefinition]) -> String {
        Self::pretty(definitions)
    }

    fn format_tables(&self, tables: &[TableSummary]) -> String {
        Self::pretty(tables)
    }

    fn format_backups(&self, backups: &[BackupInfo]) -> String {
        Self::pretty(backups)
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({
            "message": message
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosterdb_core::migration::{PassTally, RowRef, ValidationPass};

    fn report() -> ValidationReport {
        ValidationReport {
            migration_id: "family-ids".to_string(),
            identity: PassTally { checked: 2, failed: 0 },
            uniqueness: PassTally { checked: 2, failed: 1 },
            referential: PassTally { checked: 1, failed: 0 },
            legacy: None,
            issues: vec![ValidationIssue {
                pass: ValidationPass::Uniqueness,
                locations: vec![
                    RowRef {
                        table: "parents".to_string(),
                        row_offset: Some(0),
                    },
                    RowRef {
                        table: "students".to_string(),
                        row_offset: Some(3),
                    },
                ],
                column: String::new(),
                value: "dup".to_string(),
                reason: "identifier used 2 times".to_string(),
            }],
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_table_validation_output() {
        let output = TableFormatter.format_validation(&report());
        assert!(output.starts_with("Validation FAILED"));
        assert!(output.contains("parents row 2; students row 5"));
    }

    #[test]
    fn test_json_validation_output() {
        let output = JsonFormatter.format_validation(&report());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["uniqueness"]["failed"], 1);
        assert_eq!(value["issues"][0]["pass"], "uniqueness");
    }

    #[test]
    fn test_message() {
        assert_eq!(JsonFormatter.format_message("ok"), r#"{"message":"ok"}"#);
        assert_eq!(TableFormatter.format_message("ok"), "ok");
    }
}
