//! Post-migration validation.
//!
//! Three independent passes decide whether a migration succeeded:
//! - identity shape of every live primary key in the plan tables
//! - uniqueness of primary keys across all plan tables
//! - referential closure of every declared foreign key
//!
//! A fourth pass checks that legacy keys were preserved where the contract
//! asks for it; its findings are warnings and never fail the report. Rows
//! with an identifier-shaped key and no LegacyId are not flagged: they were
//! created after the migration or never had a legacy key. When the run's
//! mapping is supplied, every migrated row must hold exactly the legacy key
//! it was issued for.
//!
//! Reports are built in declaration order, then row order, so validating an
//! unchanged store twice yields identical reports.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::definition::{MigrationDefinition, TableSpec};
use super::error::MigrationError;
use crate::identity::{is_valid_id, IdMapping};
use crate::store::TableStore;
use crate::table::{sheet_row, Table};

/// Which pass produced an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPass {
    /// Primary key does not have the identifier shape.
    Identity,
    /// Primary key used more than once.
    Uniqueness,
    /// Foreign key does not resolve.
    Referential,
    /// Legacy key missing where it should be preserved.
    Legacy,
}

impl std::fmt::Display for ValidationPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationPass::Identity => write!(f, "identity"),
            ValidationPass::Uniqueness => write!(f, "uniqueness"),
            ValidationPass::Referential => write!(f, "referential"),
            ValidationPass::Legacy => write!(f, "legacy"),
        }
    }
}

/// Location of a row, or of a whole table when `row_offset` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRef {
    /// Table name.
    pub table: String,
    /// Zero-based data-row offset.
    pub row_offset: Option<usize>,
}

impl RowRef {
    fn row(table: &str, offset: usize) -> Self {
        Self {
            table: table.to_string(),
            row_offset: Some(offset),
        }
    }

    fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            row_offset: None,
        }
    }
}

impl std::fmt::Display for RowRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.row_offset {
            Some(offset) => write!(f, "{} row {}", self.table, sheet_row(offset)),
            None => write!(f, "{}", self.table),
        }
    }
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Pass that produced the finding.
    pub pass: ValidationPass,
    /// Where it was found; duplicates name every location.
    pub locations: Vec<RowRef>,
    /// Column holding the offending value.
    pub column: String,
    /// Offending value.
    pub value: String,
    /// Explanation.
    pub reason: String,
}

/// Checked/failed counts for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassTally {
    /// Values examined.
    pub checked: usize,
    /// Failures found.
    pub failed: usize,
}

impl PassTally {
    /// Whether the pass found nothing wrong.
    pub fn passed(&self) -> bool {
        self.failed == 0
    }
}

/// Result of validating a migration's tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Migration validated.
    pub migration_id: String,
    /// Identity-shape pass.
    pub identity: PassTally,
    /// Uniqueness pass.
    pub uniqueness: PassTally,
    /// Referential pass.
    pub referential: PassTally,
    /// Legacy-preservation pass, when any plan table preserves legacy keys.
    pub legacy: Option<PassTally>,
    /// Failures from the identity, uniqueness and referential passes.
    pub issues: Vec<ValidationIssue>,
    /// Legacy-preservation warnings.
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn new(migration_id: &str) -> Self {
        Self {
            migration_id: migration_id.to_string(),
            identity: PassTally::default(),
            uniqueness: PassTally::default(),
            referential: PassTally::default(),
            legacy: None,
            issues: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Whether the identity, uniqueness and referential passes all succeeded.
    pub fn passed(&self) -> bool {
        self.identity.passed() && self.uniqueness.passed() && self.referential.passed()
    }

    /// Total failures across the three hard passes.
    pub fn failure_count(&self) -> usize {
        self.identity.failed + self.uniqueness.failed + self.referential.failed
    }

    /// Issues produced by one pass.
    pub fn issues_for(&self, pass: ValidationPass) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .chain(&self.warnings)
            .filter(move |issue| issue.pass == pass)
    }

    /// Turn a failed report into [`MigrationError::ValidationFailed`].
    pub fn ensure_passed(&self) -> Result<(), MigrationError> {
        if self.passed() {
            Ok(())
        } else {
            Err(MigrationError::ValidationFailed {
                identity: self.identity.failed,
                uniqueness: self.uniqueness.failed,
                referential: self.referential.failed,
            })
        }
    }
}

/// Read-only integrity checks over a migration's tables.
pub struct MigrationValidator<'a> {
    store: &'a dyn TableStore,
    legacy_column: &'a str,
    mapping: Option<&'a IdMapping>,
}

/// Tables read once per validation.
struct TableCache<'a> {
    store: &'a dyn TableStore,
    tables: HashMap<String, Table>,
}

impl<'a> TableCache<'a> {
    async fn get(&mut self, name: &str) -> Result<&Table, MigrationError> {
        if !self.tables.contains_key(name) {
            let table = self.store.read_table(name).await?;
            self.tables.insert(name.to_string(), table);
        }
        self.tables
            .get(name)
            .ok_or_else(|| MigrationError::configuration(format!("table '{}' vanished", name)))
    }
}

impl<'a> MigrationValidator<'a> {
    /// Create a validator; `legacy_column` names the LegacyId header.
    pub fn new(store: &'a dyn TableStore, legacy_column: &'a str) -> Self {
        Self {
            store,
            legacy_column,
            mapping: None,
        }
    }

    /// Check legacy preservation against the mapping of the run just finished.
    pub fn with_mapping(mut self, mapping: &'a IdMapping) -> Self {
        self.mapping = Some(mapping);
        self
    }

    /// Run every pass over the tables `definition` declares.
    pub async fn validate(
        &self,
        definition: &MigrationDefinition,
    ) -> Result<ValidationReport, MigrationError> {
        let mut report = ValidationReport::new(&definition.id);
        let mut cache = TableCache {
            store: self.store,
            tables: HashMap::new(),
        };

        for spec in &definition.plan {
            let table = cache.get(&spec.name).await?;
            Self::check_identity(spec, table, &mut report)?;
        }

        let mut keys: Vec<(String, Vec<RowRef>)> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for spec in &definition.plan {
            let table = cache.get(&spec.name).await?;
            let key_index = table.schema(&[spec.primary_key.as_str()])?.column(&spec.primary_key)?;
            for (offset, row) in table.live_rows(key_index) {
                let key = row.get(key_index).trim().to_string();
                report.uniqueness.checked += 1;
                match positions.get(&key) {
                    Some(&i) => keys[i].1.push(RowRef::row(&spec.name, offset)),
                    None => {
                        positions.insert(key.clone(), keys.len());
                        keys.push((key, vec![RowRef::row(&spec.name, offset)]));
                    }
                }
            }
        }
        for (key, locations) in keys {
            if locations.len() > 1 {
                report.uniqueness.failed += 1;
                let reason = format!("identifier used {} times", locations.len());
                report.issues.push(ValidationIssue {
                    pass: ValidationPass::Uniqueness,
                    locations,
                    column: String::new(),
                    value: key,
                    reason,
                });
            }
        }

        for fk in &definition.foreign_keys {
            let target_spec = definition.table_spec(&fk.references).ok_or_else(|| {
                MigrationError::configuration(format!("foreign key {} has no target contract", fk))
            })?;
            let source_spec = definition.table_spec(&fk.table).ok_or_else(|| {
                MigrationError::configuration(format!("foreign key {} has no source contract", fk))
            })?;

            let target = cache.get(&fk.references).await?;
            let target_key = target
                .schema(&[target_spec.primary_key.as_str()])?
                .column(&target_spec.primary_key)?;
            let live_keys: HashSet<String> = target
                .live_rows(target_key)
                .map(|(_, row)| row.get(target_key).trim().to_string())
                .collect();

            let source = cache.get(&fk.table).await?;
            let schema = source.schema(&[source_spec.primary_key.as_str(), fk.column.as_str()])?;
            let source_key = schema.column(&source_spec.primary_key)?;
            let column = schema.column(&fk.column)?;

            for (offset, row) in source.live_rows(source_key) {
                let values = fk.values(row.get(column));
                if values.is_empty() {
                    if fk.required {
                        report.referential.checked += 1;
                        report.referential.failed += 1;
                        report.issues.push(ValidationIssue {
                            pass: ValidationPass::Referential,
                            locations: vec![RowRef::row(&fk.table, offset)],
                            column: fk.column.clone(),
                            value: String::new(),
                            reason: format!("required reference to {} is empty", fk.references),
                        });
                    }
                    continue;
                }
                for value in values {
                    report.referential.checked += 1;
                    if !live_keys.contains(value) {
                        report.referential.failed += 1;
                        report.issues.push(ValidationIssue {
                            pass: ValidationPass::Referential,
                            locations: vec![RowRef::row(&fk.table, offset)],
                            column: fk.column.clone(),
                            value: value.to_string(),
                            reason: format!("no live row in {} with this key", fk.references),
                        });
                    }
                }
            }
        }

        if definition.preserves_legacy() {
            let mut tally = PassTally::default();
            for spec in definition.plan.iter().filter(|s| s.preserve_legacy) {
                let table = cache.get(&spec.name).await?;
                self.check_legacy(spec, table, &mut tally, &mut report)?;
            }
            report.legacy = Some(tally);
        }

        info!(
            migration = %definition.id,
            identity_failed = report.identity.failed,
            uniqueness_failed = report.uniqueness.failed,
            referential_failed = report.referential.failed,
            warnings = report.warnings.len(),
            "validation finished"
        );
        Ok(report)
    }

    fn check_identity(
        spec: &TableSpec,
        table: &Table,
        report: &mut ValidationReport,
    ) -> Result<(), MigrationError> {
        let key_index = table.schema(&[spec.primary_key.as_str()])?.column(&spec.primary_key)?;
        for (offset, row) in table.live_rows(key_index) {
            let key = row.get(key_index).trim();
            report.identity.checked += 1;
            if !is_valid_id(key) {
                report.identity.failed += 1;
                report.issues.push(ValidationIssue {
                    pass: ValidationPass::Identity,
                    locations: vec![RowRef::row(&spec.name, offset)],
                    column: spec.primary_key.clone(),
                    value: key.to_string(),
                    reason: "not a valid identifier".to_string(),
                });
            }
        }
        Ok(())
    }

    fn check_legacy(
        &self,
        spec: &TableSpec,
        table: &Table,
        tally: &mut PassTally,
        report: &mut ValidationReport,
    ) -> Result<(), MigrationError> {
        let schema = table.schema(&[spec.primary_key.as_str()])?;
        let key_index = schema.column(&spec.primary_key)?;
        let legacy_index = schema.find(self.legacy_column);

        // new key -> legacy key it replaced
        let migrated: HashMap<&str, &str> = self
            .mapping
            .and_then(|mapping| mapping.table(&spec.name))
            .map(|entries| {
                entries
                    .iter()
                    .map(|(legacy, new)| (new.as_str(), legacy.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        let mut uncaptured = 0;
        for (offset, row) in table.live_rows(key_index) {
            let key = row.get(key_index).trim();
            let expected = migrated.get(key).copied();
            if expected.is_none() && is_valid_id(key) {
                continue;
            }
            tally.checked += 1;

            let Some(legacy_index) = legacy_index else {
                uncaptured += 1;
                continue;
            };
            let legacy = row.get(legacy_index).trim();
            let reason = match expected {
                Some(expected) if legacy != expected => {
                    format!("legacy key should be '{}'", expected)
                }
                Some(_) => continue,
                None if legacy.is_empty() => "legacy key not preserved".to_string(),
                None => continue,
            };
            tally.failed += 1;
            report.warnings.push(ValidationIssue {
                pass: ValidationPass::Legacy,
                locations: vec![RowRef::row(&spec.name, offset)],
                column: self.legacy_column.to_string(),
                value: key.to_string(),
                reason,
            });
        }

        if uncaptured > 0 {
            tally.failed += uncaptured;
            report.warnings.push(ValidationIssue {
                pass: ValidationPass::Legacy,
                locations: vec![RowRef::table(&spec.name)],
                column: self.legacy_column.to_string(),
                value: String::new(),
                reason: format!("legacy column is missing for {} row(s)", uncaptured),
            });
        }
        Ok(())
    }
}
