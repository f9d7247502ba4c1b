use crate::changelog::ChangeSetId;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// Errors raised by a target-system adapter (statement execution, ledger and
/// lock storage).
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cannot render statement: {0}")]
    Render(#[from] CompileError),

    #[error("{0}")]
    Other(String),
}

impl DatabaseError {
    pub fn other(message: impl Into<String>) -> Self {
        DatabaseError::Other(message.into())
    }
}

/// Failure to turn a change into statements, or a statement into text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("{change} is not supported on {dialect}")]
    Unsupported { change: String, dialect: String },

    #[error("{0} cannot be rolled back automatically")]
    NotInvertible(String),
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Could not acquire change log lock. Currently locked by {}", describe_holder(.holder, .granted))]
    Timeout {
        holder: Option<String>,
        granted: Option<DateTime<Utc>>,
    },

    #[error("Change log lock was lost while the operation was running (now held by {})", .current.as_deref().unwrap_or("nobody"))]
    Lost { current: Option<String> },

    #[error("Waiting for the change log lock was cancelled")]
    Cancelled,

    #[error("Change log lock storage failed: {0}")]
    Storage(#[from] DatabaseError),
}

fn describe_holder(holder: &Option<String>, granted: &Option<DateTime<Utc>>) -> String {
    match (holder, granted) {
        (Some(holder), Some(granted)) => {
            format!("{} since {}", holder, granted.format("%Y-%m-%d %H:%M:%S UTC"))
        }
        (Some(holder), None) => holder.clone(),
        _ => "UNKNOWN".to_string(),
    }
}

/// One problem found while validating a changelog against the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationProblem {
    ChecksumDrift {
        change_set: ChangeSetId,
        stored: String,
        current: String,
    },
    DuplicateChangeSet(ChangeSetId),
    Unsupported {
        change_set: ChangeSetId,
        error: CompileError,
    },
    EmptyIdentity(ChangeSetId),
    UnknownDbms {
        change_set: ChangeSetId,
        dbms: String,
    },
    UnknownTag(String),
}

impl fmt::Display for ValidationProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationProblem::ChecksumDrift { change_set, stored, current } => {
                write!(f, "{} was: {} but is now: {}", change_set, stored, current)
            }
            ValidationProblem::DuplicateChangeSet(id) => {
                write!(f, "{} is declared more than once", id)
            }
            ValidationProblem::Unsupported { change_set, error } => {
                write!(f, "{}: {}", change_set, error)
            }
            ValidationProblem::EmptyIdentity(id) => {
                write!(f, "{}: change set id and author must not be empty", id)
            }
            ValidationProblem::UnknownDbms { change_set, dbms } => {
                write!(f, "{}: unknown dbms '{}'", change_set, dbms)
            }
            ValidationProblem::UnknownTag(tag) => {
                write!(f, "could not find tag '{}' in the database", tag)
            }
        }
    }
}

/// Aggregated validation failure, reported before the target is touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    pub problems: Vec<ValidationProblem>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn push(&mut self, problem: ValidationProblem) {
        self.problems.push(problem);
    }

    pub fn has_checksum_drift(&self) -> bool {
        self.problems
            .iter()
            .any(|p| matches!(p, ValidationProblem::ChecksumDrift { .. }))
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation error(s)", self.problems.len())?;
        for problem in &self.problems {
            write!(f, "\n  - {}", problem)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Change set {change_set} failed while executing {statement}: {source}")]
    Execution {
        change_set: ChangeSetId,
        statement: String,
        #[source]
        source: DatabaseError,
    },

    #[error("Change set {change_set} cannot be rolled back: {reason}")]
    RollbackImpossible {
        change_set: ChangeSetId,
        reason: String,
    },

    #[error("Change set {change_set}: {source}")]
    Unsupported {
        change_set: ChangeSetId,
        #[source]
        source: CompileError,
    },

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Changelog parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ValidationErrors> for MigrationError {
    fn from(errors: ValidationErrors) -> Self {
        MigrationError::Validation(errors)
    }
}

impl From<rusqlite::Error> for MigrationError {
    fn from(err: rusqlite::Error) -> Self {
        MigrationError::Database(DatabaseError::Sqlite(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_lock_timeout_names_holder_and_grant_time() {
        let err = LockError::Timeout {
            holder: Some("host-a:42".to_string()),
            granted: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()),
        };
        let message = err.to_string();
        assert!(message.contains("host-a:42"));
        assert!(message.contains("2024-03-01 12:30:00"));
    }

    #[test]
    fn test_lock_timeout_without_status() {
        let err = LockError::Timeout { holder: None, granted: None };
        assert!(err.to_string().ends_with("UNKNOWN"));
    }

    #[test]
    fn test_validation_errors_display_lists_problems() {
        let mut errors = ValidationErrors::default();
        errors.push(ValidationProblem::DuplicateChangeSet(ChangeSetId::new(
            "db/changelog.json",
            "1",
            "alice",
        )));
        errors.push(ValidationProblem::UnknownTag("v1".to_string()));
        let text = errors.to_string();
        assert!(text.starts_with("2 validation error(s)"));
        assert!(text.contains("db/changelog.json::1::alice is declared more than once"));
        assert!(text.contains("could not find tag 'v1'"));
    }
}
