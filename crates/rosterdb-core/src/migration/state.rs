//! Migration run state machine.
//!
//! ```text
//! NotStarted -> BackedUp -> Migrating -> Remapping -> Validated -> Completed
//!                                                              \-> CompletedWithErrors
//! NotStarted -> Validated (nothing to migrate, no snapshot taken)
//! any state after BackedUp -> RolledBack (explicit rollback only)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::MigrationError;

/// State of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Run created, nothing touched yet.
    NotStarted,
    /// Snapshot taken; mutation may begin.
    BackedUp,
    /// Primary keys are being reassigned.
    Migrating,
    /// Foreign keys are being rewritten.
    Remapping,
    /// Validation has run.
    Validated,
    /// Run finished and every validation pass succeeded.
    Completed,
    /// Run finished but remapping or validation reported failures.
    CompletedWithErrors,
    /// The run's changes were reverted.
    RolledBack,
}

impl MigrationStatus {
    /// Whether `self -> to` is a legal transition.
    pub fn can_transition(self, to: MigrationStatus) -> bool {
        use MigrationStatus::*;
        match (self, to) {
            (NotStarted, BackedUp)
            | (NotStarted, Validated)
            | (BackedUp, Migrating)
            | (Migrating, Remapping)
            | (Remapping, Validated)
            | (Validated, Completed)
            | (Validated, CompletedWithErrors) => true,
            (NotStarted | RolledBack, RolledBack) => false,
            (_, RolledBack) => true,
            _ => false,
        }
    }

    /// Whether the run has reached a final state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MigrationStatus::Completed
                | MigrationStatus::CompletedWithErrors
                | MigrationStatus::RolledBack
        )
    }
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStatus::NotStarted => write!(f, "not_started"),
            MigrationStatus::BackedUp => write!(f, "backed_up"),
            MigrationStatus::Migrating => write!(f, "migrating"),
            MigrationStatus::Remapping => write!(f, "remapping"),
            MigrationStatus::Validated => write!(f, "validated"),
            MigrationStatus::Completed => write!(f, "completed"),
            MigrationStatus::CompletedWithErrors => write!(f, "completed_with_errors"),
            MigrationStatus::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// A recorded status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    /// Status entered.
    pub status: MigrationStatus,
    /// When it was entered.
    pub at: DateTime<Utc>,
}

/// Lifecycle of one migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationState {
    /// Migration id.
    pub migration_id: String,
    /// Current status.
    pub status: MigrationStatus,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Every status entered after `NotStarted`, in order.
    pub history: Vec<StatusChange>,
}

impl MigrationState {
    /// Create a new run state.
    pub fn new(migration_id: impl Into<String>) -> Self {
        Self {
            migration_id: migration_id.into(),
            status: MigrationStatus::NotStarted,
            started_at: Utc::now(),
            completed_at: None,
            history: Vec::new(),
        }
    }

    /// Move to `to`, rejecting illegal transitions.
    pub fn advance(&mut self, to: MigrationStatus) -> Result<(), MigrationError> {
        if !self.status.can_transition(to) {
            return Err(MigrationError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        let now = Utc::now();
        self.status = to;
        self.history.push(StatusChange { status: to, at: now });
        if to.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Mark the run as rolled back.
    pub fn roll_back(&mut self) -> Result<(), MigrationError> {
        self.advance(MigrationStatus::RolledBack)
    }

    /// Whether the run has reached a final state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Statuses visited so far, excluding `NotStarted`.
    pub fn trail(&self) -> Vec<MigrationStatus> {
        self.history.iter().map(|change| change.status).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MigrationStatus::*;

    #[test]
    fn test_migration_state_lifecycle() {
        let mut state = MigrationState::new("registration-ids");
        assert_eq!(state.status, NotStarted);

        for status in [BackedUp, Migrating, Remapping, Validated, Completed] {
            state.advance(status).unwrap();
        }

        assert!(state.is_terminal());
        assert!(state.completed_at.is_some());
        assert_eq!(
            state.trail(),
            vec![BackedUp, Migrating, Remapping, Validated, Completed]
        );
    }

    #[test]
    fn test_nothing_to_migrate_goes_straight_to_validated() {
        let mut state = MigrationState::new("family-ids");
        state.advance(Validated).unwrap();
        state.advance(Completed).unwrap();
        assert_eq!(state.trail(), vec![Validated, Completed]);
    }

    #[test]
    fn test_skipping_phases_is_rejected() {
        let mut state = MigrationState::new("m");
        let err = state.advance(Migrating).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::InvalidTransition {
                from: NotStarted,
                to: Migrating
            }
        ));
    }

    #[test]
    fn test_rollback_only_after_backup() {
        let mut state = MigrationState::new("m");
        assert!(state.roll_back().is_err());

        state.advance(BackedUp).unwrap();
        state.advance(Migrating).unwrap();
        state.roll_back().unwrap();
        assert_eq!(state.status, RolledBack);
        assert!(state.roll_back().is_err());
    }

    #[test]
    fn test_completed_with_errors_can_roll_back() {
        assert!(CompletedWithErrors.can_transition(RolledBack));
        assert!(!CompletedWithErrors.can_transition(Completed));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(CompletedWithErrors.to_string(), "completed_with_errors");
        assert_eq!(NotStarted.to_string(), "not_started");
    }
}
