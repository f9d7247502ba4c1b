use crate::database::Database;
use crate::error::{DatabaseError, MigrationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// What to do when the root preconditions do not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnFail {
    #[default]
    Halt,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Precondition {
    /// Comma separated target names; `!name` excludes a target.
    Dbms {
        #[serde(rename = "type")]
        dbms_type: String,
    },
    #[serde(rename_all = "camelCase")]
    TableExists {
        #[serde(default)]
        schema_name: Option<String>,
        table_name: String,
    },
    And(Vec<Precondition>),
    Or(Vec<Precondition>),
    Not(Box<Precondition>),
}

impl Precondition {
    pub fn holds(&self, database: &dyn Database) -> Result<bool, DatabaseError> {
        match self {
            Precondition::Dbms { dbms_type } => Ok(dbms_matches(dbms_type, database.short_name())),
            Precondition::TableExists { schema_name, table_name } => {
                database.table_exists(schema_name.as_deref(), table_name)
            }
            Precondition::And(all) => {
                for condition in all {
                    if !condition.holds(database)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Precondition::Or(any) => {
                for condition in any {
                    if condition.holds(database)? {
                        return Ok(true);
                    }
                }
                Ok(any.is_empty())
            }
            Precondition::Not(inner) => Ok(!inner.holds(database)?),
        }
    }
}

fn dbms_matches(list: &str, target: &str) -> bool {
    let target = target.to_ascii_lowercase();
    let mut included = false;
    let mut has_positive = false;
    for entry in list.split(',').map(|e| e.trim().to_ascii_lowercase()) {
        if let Some(excluded) = entry.strip_prefix('!') {
            if excluded == target {
                return false;
            }
        } else if !entry.is_empty() {
            has_positive = true;
            included |= entry == target;
        }
    }
    included || !has_positive
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precondition::Dbms { dbms_type } => write!(f, "dbms is {}", dbms_type),
            Precondition::TableExists { schema_name: Some(schema), table_name } => {
                write!(f, "table {}.{} exists", schema, table_name)
            }
            Precondition::TableExists { table_name, .. } => write!(f, "table {} exists", table_name),
            Precondition::And(all) => write_joined(f, all, " and "),
            Precondition::Or(any) => write_joined(f, any, " or "),
            Precondition::Not(inner) => write!(f, "not ({})", inner),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[Precondition], separator: &str) -> fmt::Result {
    let parts: Vec<String> = items.iter().map(|p| format!("({})", p)).collect();
    f.write_str(&parts.join(separator))
}

/// Root precondition tree of a changelog. All conditions must hold.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preconditions {
    #[serde(default)]
    pub on_fail: OnFail,
    #[serde(default)]
    pub conditions: Vec<Precondition>,
}

impl Preconditions {
    pub fn new(on_fail: OnFail, conditions: Vec<Precondition>) -> Self {
        Self { on_fail, conditions }
    }

    /// Combine two trees; the stricter failure mode wins.
    pub fn merge(mut self, other: Preconditions) -> Self {
        if other.on_fail == OnFail::Halt {
            self.on_fail = OnFail::Halt;
        }
        self.conditions.extend(other.conditions);
        self
    }
}

/// Gate run once per operation, before any change set is considered.
pub trait PreconditionEvaluator: Send + Sync {
    fn evaluate(&self, preconditions: &Preconditions, database: &dyn Database) -> Result<(), MigrationError>;
}

#[derive(Debug, Default)]
pub struct StandardPreconditionEvaluator;

impl PreconditionEvaluator for StandardPreconditionEvaluator {
    fn evaluate(&self, preconditions: &Preconditions, database: &dyn Database) -> Result<(), MigrationError> {
        let failed: Vec<String> = {
            let mut failed = Vec::new();
            for condition in &preconditions.conditions {
                if !condition.holds(database)? {
                    failed.push(condition.to_string());
                }
            }
            failed
        };

        if failed.is_empty() {
            return Ok(());
        }
        let message = failed.join("; ");
        match preconditions.on_fail {
            OnFail::Halt => Err(MigrationError::Precondition(message)),
            OnFail::Warn => {
                warn!("Changelog preconditions failed, continuing: {}", message);
                Ok(())
            }
        }
    }
}
