//! Identifier generation and shape checks.
//!
//! Migrated tables use UUID-v4-shaped keys: 36 characters, hyphenated
//! 8-4-4-4-12, version nibble `4`, variant nibble one of `8 9 a b`.

mod mapping;

pub use mapping::IdMapping;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of a hyphenated identifier.
pub const ID_LEN: usize = 36;

/// Source of new primary-key values.
pub trait IdGenerator: Send {
    /// Produce the next identifier.
    fn next_id(&mut self) -> String;
}

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&mut self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Deterministic, shape-valid identifiers counting up from a seed.
///
/// Useful for reproducible runs; never use it against a live workbook.
#[derive(Debug, Default, Clone)]
pub struct SequenceGenerator {
    next: u64,
}

impl SequenceGenerator {
    /// Start counting at `seed`.
    pub fn starting_at(seed: u64) -> Self {
        Self { next: seed }
    }
}

impl IdGenerator for SequenceGenerator {
    fn next_id(&mut self) -> String {
        let id = format!("00000000-0000-4000-8000-{:012x}", self.next & 0xffff_ffff_ffff);
        self.next += 1;
        id
    }
}

/// Whether `value` has the identifier shape exactly.
pub fn is_valid_id(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() != ID_LEN {
        return false;
    }
    bytes.iter().enumerate().all(|(i, &b)| match i {
        8 | 13 | 18 | 23 => b == b'-',
        14 => b == b'4',
        19 => matches!(b, b'8' | b'9' | b'a' | b'b' | b'A' | b'B'),
        _ => b.is_ascii_hexdigit(),
    })
}

/// How the live keys of a table are shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdClassification {
    /// No live rows.
    Empty,
    /// Every live key is a legacy key.
    Legacy,
    /// Some keys are migrated, some are not.
    Mixed,
    /// Every live key already has the identifier shape.
    AlreadyMigrated,
}

impl std::fmt::Display for IdClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdClassification::Empty => write!(f, "empty"),
            IdClassification::Legacy => write!(f, "legacy"),
            IdClassification::Mixed => write!(f, "mixed"),
            IdClassification::AlreadyMigrated => write!(f, "already migrated"),
        }
    }
}

/// Counts of shaped and legacy keys.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeCounts {
    /// Keys matching the identifier shape.
    pub valid: usize,
    /// Keys that do not.
    pub legacy: usize,
}

impl ShapeCounts {
    /// Tally a sequence of live keys.
    pub fn tally<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        keys.into_iter().fold(Self::default(), |mut acc, key| {
            if is_valid_id(key) {
                acc.valid += 1;
            } else {
                acc.legacy += 1;
            }
            acc
        })
    }

    /// Classify the tallied keys.
    pub fn classification(&self) -> IdClassification {
        match (self.valid, self.legacy) {
            (0, 0) => IdClassification::Empty,
            (0, _) => IdClassification::Legacy,
            (_, 0) => IdClassification::AlreadyMigrated,
            _ => IdClassification::Mixed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_valid() {
        let mut gen = UuidGenerator;
        for _ in 0..100 {
            let id = gen.next_id();
            assert!(is_valid_id(&id), "{id}");
        }
    }

    #[test]
    fn test_sequence_ids_are_valid_and_distinct() {
        let mut gen = SequenceGenerator::starting_at(1);
        let a = gen.next_id();
        let b = gen.next_id();
        assert_ne!(a, b);
        assert!(is_valid_id(&a));
        assert_eq!(a, "00000000-0000-4000-8000-000000000001");
    }

    #[test]
    fn test_shape_rejections() {
        assert!(is_valid_id("3f2b8c1e-9d4a-4c6b-a1e2-0f9d8c7b6a55"));
        assert!(is_valid_id("3F2B8C1E-9D4A-4C6B-B1E2-0F9D8C7B6A55"));
        // wrong version nibble
        assert!(!is_valid_id("3f2b8c1e-9d4a-1c6b-a1e2-0f9d8c7b6a55"));
        // wrong variant nibble
        assert!(!is_valid_id("3f2b8c1e-9d4a-4c6b-c1e2-0f9d8c7b6a55"));
        // hyphen misplaced
        assert!(!is_valid_id("3f2b8c1e9-d4a-4c6b-a1e2-0f9d8c7b6a55"));
        // non-hex
        assert!(!is_valid_id("zf2b8c1e-9d4a-4c6b-a1e2-0f9d8c7b6a55"));
        assert!(!is_valid_id("1_A@x.com_Monday_10:00"));
        assert!(!is_valid_id(""));
    }

    #[test]
    fn test_classification() {
        let uuid = "3f2b8c1e-9d4a-4c6b-a1e2-0f9d8c7b6a55";
        assert_eq!(ShapeCounts::tally(std::iter::empty()).classification(), IdClassification::Empty);
        assert_eq!(
            ShapeCounts::tally(["P1", "P2"]).classification(),
            IdClassification::Legacy
        );
        assert_eq!(
            ShapeCounts::tally([uuid, "P2"]).classification(),
            IdClassification::Mixed
        );
        assert_eq!(
            ShapeCounts::tally([uuid]).classification(),
            IdClassification::AlreadyMigrated
        );
    }
}
