//! Declarative migration definitions.
//!
//! A definition names the tables to migrate, in dependency order, the tables
//! that merely reference them, and the foreign-key relationships between
//! all of them. The order is declared by the author and checked here, never
//! computed.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::MigrationError;

/// Contract for one table taking part in a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table (sheet) name.
    pub name: String,
    /// Primary-key column header.
    pub primary_key: String,
    /// Keep the pre-migration key in a LegacyId column.
    #[serde(default)]
    pub preserve_legacy: bool,
}

impl TableSpec {
    /// Describe a table by name and primary-key column.
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            preserve_legacy: false,
        }
    }

    /// Preserve legacy keys for this table.
    pub fn preserving_legacy(mut self) -> Self {
        self.preserve_legacy = true;
        self
    }
}

/// `table.column` references the primary key of `references`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDefinition {
    /// Source table.
    pub table: String,
    /// Source column.
    pub column: String,
    /// Referenced table.
    pub references: String,
    /// Every live source row must carry a value.
    #[serde(default)]
    pub required: bool,
    /// Separator for cells holding several references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
}

impl ForeignKeyDefinition {
    /// Declare an optional reference.
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        references: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            references: references.into(),
            required: false,
            delimiter: None,
        }
    }

    /// Require a value on every live row.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Treat the cell as a `delimiter`-separated list of references.
    pub fn delimited(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    /// Non-empty, trimmed references held in a cell.
    pub fn values<'a>(&self, cell: &'a str) -> Vec<&'a str> {
        match &self.delimiter {
            Some(sep) if !sep.is_empty() => cell
                .split(sep.as_str())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .collect(),
            _ => {
                let value = cell.trim();
                if value.is_empty() {
                    Vec::new()
                } else {
                    vec![value]
                }
            }
        }
    }

    /// Rewrite the references in a cell through `map`.
    ///
    /// Returns the new cell text and the number of references replaced, or
    /// `None` when nothing changed. Separators and surrounding whitespace
    /// are kept as they were.
    pub fn rewrite<'m, F>(&self, cell: &str, map: F) -> Option<(String, usize)>
    where
        F: Fn(&str) -> Option<&'m str>,
    {
        let replace = |piece: &str| -> Option<String> {
            let trimmed = piece.trim();
            if trimmed.is_empty() {
                return None;
            }
            let mapped = map(trimmed)?;
            let start = piece.len() - piece.trim_start().len();
            let end = start + trimmed.len();
            Some(format!("{}{}{}", &piece[..start], mapped, &piece[end..]))
        };

        match &self.delimiter {
            Some(sep) if !sep.is_empty() => {
                let mut changed = 0;
                let pieces: Vec<String> = cell
                    .split(sep.as_str())
                    .map(|piece| match replace(piece) {
                        Some(new) => {
                            changed += 1;
                            new
                        }
                        None => piece.to_string(),
                    })
                    .collect();
                (changed > 0).then(|| (pieces.join(sep.as_str()), changed))
            }
            _ => replace(cell).map(|new| (new, 1)),
        }
    }
}

impl std::fmt::Display for ForeignKeyDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{} -> {}", self.table, self.column, self.references)
    }
}

fn default_true() -> bool {
    true
}

/// A named identity migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationDefinition {
    /// Migration id; also keys the pre-migration snapshot.
    pub id: String,
    /// Human-readable summary.
    #[serde(default)]
    pub description: String,
    /// Tables to migrate, referenced tables first.
    pub plan: Vec<TableSpec>,
    /// Tables outside the plan that reference plan tables.
    #[serde(default)]
    pub related: Vec<TableSpec>,
    /// Foreign keys to rewrite and validate.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyDefinition>,
    /// Whether rollback may fall back to copying LegacyId back in place.
    #[serde(default = "default_true")]
    pub allow_legacy_reversal: bool,
}

impl MigrationDefinition {
    /// Start a definition.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            plan: Vec::new(),
            related: Vec::new(),
            foreign_keys: Vec::new(),
            allow_legacy_reversal: true,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Append a table to the plan.
    pub fn migrate(mut self, table: TableSpec) -> Self {
        self.plan.push(table);
        self
    }

    /// Add a non-migrated table that references plan tables.
    pub fn with_related(mut self, table: TableSpec) -> Self {
        self.related.push(table);
        self
    }

    /// Add a foreign key.
    pub fn with_foreign_key(mut self, fk: ForeignKeyDefinition) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Forbid in-place legacy reversal on rollback.
    pub fn without_legacy_reversal(mut self) -> Self {
        self.allow_legacy_reversal = false;
        self
    }

    /// Check internal consistency, including the declared plan order.
    pub fn validate(&self) -> Result<(), MigrationError> {
        if self.id.trim().is_empty() {
            return Err(MigrationError::configuration("migration id is empty"));
        }
        if self.plan.is_empty() {
            return Err(MigrationError::configuration(format!(
                "migration '{}' has no tables to migrate",
                self.id
            )));
        }

        let mut seen = HashSet::new();
        for spec in self.plan.iter().chain(&self.related) {
            if !seen.insert(spec.name.as_str()) {
                return Err(MigrationError::configuration(format!(
                    "table '{}' is declared more than once in '{}'",
                    spec.name, self.id
                )));
            }
        }

        let position: HashMap<&str, usize> = self
            .plan
            .iter()
            .enumerate()
            .map(|(i, spec)| (spec.name.as_str(), i))
            .collect();

        for fk in &self.foreign_keys {
            for table in [&fk.table, &fk.references] {
                if !seen.contains(table.as_str()) {
                    return Err(MigrationError::configuration(format!(
                        "foreign key {} names undeclared table '{}'",
                        fk, table
                    )));
                }
            }
            if let (Some(&source), Some(&target)) = (
                position.get(fk.table.as_str()),
                position.get(fk.references.as_str()),
            ) {
                if target > source {
                    return Err(MigrationError::configuration(format!(
                        "plan order: '{}' references '{}', which is migrated after it",
                        fk.table, fk.references
                    )));
                }
            }
        }

        Ok(())
    }

    /// Contract for a declared table.
    pub fn table_spec(&self, name: &str) -> Option<&TableSpec> {
        self.plan
            .iter()
            .chain(&self.related)
            .find(|spec| spec.name == name)
    }

    /// Whether `name` is migrated by this definition.
    pub fn is_planned(&self, name: &str) -> bool {
        self.plan.iter().any(|spec| spec.name == name)
    }

    /// Plan table names in order.
    pub fn plan_tables(&self) -> Vec<String> {
        self.plan.iter().map(|spec| spec.name.clone()).collect()
    }

    /// Tables to snapshot: the plan, then every other table owning a foreign key.
    pub fn snapshot_tables(&self) -> Vec<String> {
        let mut tables = self.plan_tables();
        for fk in &self.foreign_keys {
            if !tables.contains(&fk.table) {
                tables.push(fk.table.clone());
            }
        }
        tables
    }

    /// Whether any plan table keeps its legacy keys.
    pub fn preserves_legacy(&self) -> bool {
        self.plan.iter().any(|spec| spec.preserve_legacy)
    }

    /// Tables `table` references, in declaration order.
    pub fn depends_on(&self, table: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for fk in self.foreign_keys.iter().filter(|fk| fk.table == table) {
            if !out.contains(&fk.references) {
                out.push(fk.references.clone());
            }
        }
        out
    }

    /// Tables referencing `table`, in declaration order.
    pub fn referenced_by(&self, table: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for fk in self.foreign_keys.iter().filter(|fk| fk.references == table) {
            if !out.contains(&fk.table) {
                out.push(fk.table.clone());
            }
        }
        out
    }
}

/// Known migration definitions, looked up by id.
#[derive(Debug, Clone, Default)]
pub struct DefinitionRegistry {
    definitions: Vec<MigrationDefinition>,
}

impl DefinitionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in school registration migrations.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for definition in super::builtin::definitions() {
            registry.definitions.push(definition);
        }
        registry
    }

    /// Add a definition after validating it, replacing any with the same id.
    pub fn register(&mut self, definition: MigrationDefinition) -> Result<(), MigrationError> {
        definition.validate()?;
        self.definitions.retain(|d| d.id != definition.id);
        self.definitions.push(definition);
        Ok(())
    }

    /// Register every definition in a JSON array.
    pub fn extend_from_json(&mut self, json: &str) -> Result<usize, MigrationError> {
        let definitions: Vec<MigrationDefinition> = serde_json::from_str(json)
            .map_err(|e| MigrationError::configuration(format!("invalid definitions: {}", e)))?;
        let count = definitions.len();
        for definition in definitions {
            self.register(definition)?;
        }
        Ok(count)
    }

    /// Register every definition in a JSON file.
    pub fn extend_from_file(&mut self, path: &Path) -> Result<usize, MigrationError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            MigrationError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        self.extend_from_json(&json)
    }

    /// Look up a definition.
    pub fn get(&self, id: &str) -> Result<&MigrationDefinition, MigrationError> {
        self.definitions
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| MigrationError::UnknownMigration(id.to_string()))
    }

    /// Every registered definition.
    pub fn definitions(&self) -> &[MigrationDefinition] {
        &self.definitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family() -> MigrationDefinition {
        MigrationDefinition::new("family-ids")
            .migrate(TableSpec::new("parents", "ParentId").preserving_legacy())
            .migrate(TableSpec::new("students", "StudentId").preserving_legacy())
            .with_related(TableSpec::new("registrations", "RegistrationId"))
            .with_foreign_key(ForeignKeyDefinition::new("students", "Parent1Id", "parents").required())
            .with_foreign_key(ForeignKeyDefinition::new("registrations", "StudentId", "students"))
    }

    #[test]
    fn test_valid_definition() {
        family().validate().unwrap();
    }

    #[test]
    fn test_plan_order_violation() {
        let def = MigrationDefinition::new("bad")
            .migrate(TableSpec::new("students", "StudentId"))
            .migrate(TableSpec::new("parents", "ParentId"))
            .with_foreign_key(ForeignKeyDefinition::new("students", "Parent1Id", "parents"));

        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("plan order"));
    }

    #[test]
    fn test_self_reference_allowed() {
        MigrationDefinition::new("tree")
            .migrate(TableSpec::new("staff", "StaffId"))
            .with_foreign_key(ForeignKeyDefinition::new("staff", "ManagerId", "staff"))
            .validate()
            .unwrap();
    }

    #[test]
    fn test_undeclared_table_rejected() {
        let def = MigrationDefinition::new("m")
            .migrate(TableSpec::new("parents", "ParentId"))
            .with_foreign_key(ForeignKeyDefinition::new("invoices", "ParentId", "parents"));
        assert!(matches!(
            def.validate(),
            Err(MigrationError::Configuration { .. })
        ));
    }

    #[test]
    fn test_snapshot_tables_include_fk_owners() {
        assert_eq!(
            family().snapshot_tables(),
            vec!["parents", "students", "registrations"]
        );
    }

    #[test]
    fn test_dependency_queries() {
        let def = family();
        assert_eq!(def.depends_on("students"), vec!["parents"]);
        assert_eq!(def.referenced_by("students"), vec!["registrations"]);
        assert!(def.preserves_legacy());
        assert!(def.is_planned("parents"));
        assert!(!def.is_planned("registrations"));
    }

    #[test]
    fn test_delimited_values_and_rewrite() {
        let fk = ForeignKeyDefinition::new("students", "SiblingIds", "students").delimited(",");
        assert_eq!(fk.values("S1, S2,,S3 "), vec!["S1", "S2", "S3"]);

        let (cell, changed) = fk
            .rewrite("S1, S9", |v| if v == "S1" { Some("u1") } else { None })
            .unwrap();
        assert_eq!(cell, "u1, S9");
        assert_eq!(changed, 1);
        assert!(fk.rewrite("S9", |_| None).is_none());
    }

    #[test]
    fn test_single_value_rewrite_keeps_padding() {
        let fk = ForeignKeyDefinition::new("students", "Parent1Id", "parents");
        let (cell, _) = fk.rewrite(" P1 ", |_| Some("u1")).unwrap();
        assert_eq!(cell, " u1 ");
        assert!(fk.rewrite("   ", |_| Some("u1")).is_none());
    }

    #[test]
    fn test_registry_from_json() {
        let json = r#"[{
            "id": "staff-ids",
            "plan": [{"name": "staff", "primary_key": "StaffId", "preserve_legacy": true}],
            "foreign_keys": [{"table": "staff", "column": "ManagerId", "references": "staff"}]
        }]"#;
        let mut registry = DefinitionRegistry::new();
        assert_eq!(registry.extend_from_json(json).unwrap(), 1);

        let def = registry.get("staff-ids").unwrap();
        assert!(def.allow_legacy_reversal);
        assert!(def.plan[0].preserve_legacy);
        assert!(matches!(
            registry.get("nope"),
            Err(MigrationError::UnknownMigration(_))
        ));
    }

    #[test]
    fn test_builtin_definitions_are_valid() {
        let registry = DefinitionRegistry::builtin();
        assert!(!registry.definitions().is_empty());
        for def in registry.definitions() {
            def.validate().unwrap();
        }
    }
}
