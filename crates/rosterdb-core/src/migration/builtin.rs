//! Built-in migrations for the school registration workbook.

use super::definition::{ForeignKeyDefinition, MigrationDefinition, TableSpec};

/// Parents and students move to UUID keys; registrations follow.
pub const FAMILY_IDS: &str = "family-ids";

/// Registrations drop composite keys for UUIDs; the audit log follows.
pub const REGISTRATION_IDS: &str = "registration-ids";

/// Instructors and classes move to UUID keys; registrations follow.
pub const INSTRUCTOR_IDS: &str = "instructor-ids";

pub(crate) fn definitions() -> Vec<MigrationDefinition> {
    vec![family_ids(), registration_ids(), instructor_ids()]
}

/// `family-ids`: parents, then students.
pub fn family_ids() -> MigrationDefinition {
    MigrationDefinition::new(FAMILY_IDS)
        .with_description("Replace parent and student keys with UUIDs, keeping LegacyId")
        .migrate(TableSpec::new("parents", "ParentId").preserving_legacy())
        .migrate(TableSpec::new("students", "StudentId").preserving_legacy())
        .with_related(TableSpec::new("registrations", "RegistrationId"))
        .with_foreign_key(ForeignKeyDefinition::new("students", "Parent1Id", "parents").required())
        .with_foreign_key(ForeignKeyDefinition::new("students", "Parent2Id", "parents"))
        .with_foreign_key(
            ForeignKeyDefinition::new("registrations", "StudentId", "students").required(),
        )
}

/// `registration-ids`: composite registration keys such as
/// `1_A@x.com_Monday_10:00` become UUIDs. Original keys are not kept, so
/// rollback relies on the snapshot alone.
pub fn registration_ids() -> MigrationDefinition {
    MigrationDefinition::new(REGISTRATION_IDS)
        .with_description("Replace composite registration keys with UUIDs")
        .migrate(TableSpec::new("registrations", "RegistrationId"))
        .with_related(TableSpec::new("registrations_audit", "AuditId"))
        .with_foreign_key(ForeignKeyDefinition::new(
            "registrations_audit",
            "RegistrationId",
            "registrations",
        ))
        .without_legacy_reversal()
}

/// `instructor-ids`: instructors, then the classes they teach.
pub fn instructor_ids() -> MigrationDefinition {
    MigrationDefinition::new(INSTRUCTOR_IDS)
        .with_description("Replace instructor and class keys with UUIDs, keeping LegacyId")
        .migrate(TableSpec::new("instructors", "InstructorId").preserving_legacy())
        .migrate(TableSpec::new("classes", "ClassId").preserving_legacy())
        .with_related(TableSpec::new("registrations", "RegistrationId"))
        .with_foreign_key(
            ForeignKeyDefinition::new("classes", "InstructorId", "instructors").required(),
        )
        .with_foreign_key(ForeignKeyDefinition::new(
            "registrations",
            "InstructorId",
            "instructors",
        ))
        .with_foreign_key(ForeignKeyDefinition::new("registrations", "ClassId", "classes"))
}
