//! Legacy-to-new identifier registry for a single migration run.

use std::collections::{HashMap, HashSet};

use super::IdGenerator;

/// Per-table map from legacy primary key to newly issued identifier.
///
/// Created empty at the start of a run and dropped when the run ends; the
/// only durable trace of a mapping is the LegacyId column in the store.
#[derive(Debug, Default, Clone)]
pub struct IdMapping {
    tables: HashMap<String, HashMap<String, String>>,
    issued: HashSet<String>,
}

impl IdMapping {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an identifier as taken so it is never issued.
    pub fn reserve(&mut self, id: impl Into<String>) {
        self.issued.insert(id.into());
    }

    /// Draw a fresh identifier that has not been issued or reserved in this run.
    pub fn issue(&mut self, generator: &mut dyn IdGenerator) -> String {
        loop {
            let id = generator.next_id();
            if self.issued.insert(id.clone()) {
                return id;
            }
        }
    }

    /// Record `legacy -> new` for `table`.
    ///
    /// Returns `false` and keeps the existing entry if `legacy` was already mapped.
    pub fn record(&mut self, table: &str, legacy: &str, new: &str) -> bool {
        let entries = self.tables.entry(table.to_string()).or_default();
        if entries.contains_key(legacy) {
            return false;
        }
        entries.insert(legacy.to_string(), new.to_string());
        true
    }

    /// New identifier for a legacy key.
    pub fn lookup(&self, table: &str, legacy: &str) -> Option<&str> {
        self.tables
            .get(table)
            .and_then(|entries| entries.get(legacy))
            .map(String::as_str)
    }

    /// Entries recorded for `table`.
    pub fn table(&self, table: &str) -> Option<&HashMap<String, String>> {
        self.tables.get(table)
    }

    /// Number of entries recorded for `table`.
    pub fn table_len(&self, table: &str) -> usize {
        self.tables.get(table).map(HashMap::len).unwrap_or(0)
    }

    /// Total number of entries across all tables.
    pub fn len(&self) -> usize {
        self.tables.values().map(HashMap::len).sum()
    }

    /// Whether no entries have been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mapping with every entry reversed (`new -> legacy`).
    pub fn inverted(&self) -> IdMapping {
        let tables = self
            .tables
            .iter()
            .map(|(table, entries)| {
                let reversed = entries
                    .iter()
                    .map(|(legacy, new)| (new.clone(), legacy.clone()))
                    .collect();
                (table.clone(), reversed)
            })
            .collect();
        IdMapping {
            tables,
            issued: HashSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SequenceGenerator;

    /// Generator that repeats its first value before moving on.
    struct Stutter {
        inner: SequenceGenerator,
        repeated: Option<String>,
    }

    impl IdGenerator for Stutter {
        fn next_id(&mut self) -> String {
            match self.repeated.take() {
                Some(id) => id,
                None => self.inner.next_id(),
            }
        }
    }

    #[test]
    fn test_record_keeps_first_entry() {
        let mut mapping = IdMapping::new();
        assert!(mapping.record("parents", "P1", "new-1"));
        assert!(!mapping.record("parents", "P1", "new-2"));
        assert_eq!(mapping.lookup("parents", "P1"), Some("new-1"));
        assert_eq!(mapping.lookup("students", "P1"), None);
        assert_eq!(mapping.len(), 1);
    }

    #[test]
    fn test_issue_skips_reserved_ids() {
        let mut gen = SequenceGenerator::starting_at(0);
        let mut mapping = IdMapping::new();
        mapping.reserve("00000000-0000-4000-8000-000000000000");

        let id = mapping.issue(&mut gen);
        assert_eq!(id, "00000000-0000-4000-8000-000000000001");
    }

    #[test]
    fn test_issue_never_repeats() {
        let mut mapping = IdMapping::new();
        let mut gen = Stutter {
            inner: SequenceGenerator::starting_at(5),
            repeated: None,
        };
        let first = mapping.issue(&mut gen);
        gen.repeated = Some(first.clone());
        let second = mapping.issue(&mut gen);
        assert_ne!(first, second);
    }

    #[test]
    fn test_inverted() {
        let mut mapping = IdMapping::new();
        mapping.record("parents", "P1", "u1");
        mapping.record("students", "S1", "u2");

        let inverted = mapping.inverted();
        assert_eq!(inverted.lookup("parents", "u1"), Some("P1"));
        assert_eq!(inverted.lookup("students", "u2"), Some("S1"));
        assert_eq!(inverted.table_len("parents"), 1);
    }
}
