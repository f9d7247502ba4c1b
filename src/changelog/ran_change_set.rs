use super::{ChangeSet, ChangeSetId};
use crate::checksum::CheckSum;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// How a ledger row came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecType {
    Executed,
    Reran,
    MarkRan,
}

impl ExecType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecType::Executed => "EXECUTED",
            ExecType::Reran => "RERAN",
            ExecType::MarkRan => "MARK_RAN",
        }
    }
}

impl fmt::Display for ExecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EXECUTED" => Ok(ExecType::Executed),
            "RERAN" => Ok(ExecType::Reran),
            "MARK_RAN" => Ok(ExecType::MarkRan),
            other => Err(format!("unknown exec type '{}'", other)),
        }
    }
}

/// Ledger evidence that a change set ran. Identity is the change set
/// identity alone; the checksum is kept for drift detection.
#[derive(Debug, Clone)]
pub struct RanChangeSet {
    pub id: ChangeSetId,
    /// `None` once checksums have been cleared.
    pub checksum: Option<CheckSum>,
    pub date_executed: DateTime<Utc>,
    pub order_executed: i64,
    pub exec_type: ExecType,
    pub tag: Option<String>,
    pub description: Option<String>,
    pub comments: Option<String>,
    pub contexts: Option<String>,
    pub labels: Option<String>,
    pub deployment_id: Option<String>,
}

impl RanChangeSet {
    /// Row for `change_set` as it is about to be written.
    pub fn from_change_set(
        change_set: &ChangeSet,
        exec_type: ExecType,
        date_executed: DateTime<Utc>,
        order_executed: i64,
        deployment_id: &str,
    ) -> Self {
        let join = |values: &std::collections::BTreeSet<String>| {
            if values.is_empty() {
                None
            } else {
                Some(values.iter().cloned().collect::<Vec<_>>().join(","))
            }
        };
        Self {
            id: change_set.identity().clone(),
            checksum: Some(change_set.checksum().clone()),
            date_executed,
            order_executed,
            exec_type,
            tag: None,
            description: Some(change_set.description()),
            comments: change_set.comment().map(str::to_string),
            contexts: join(change_set.contexts()),
            labels: join(change_set.labels()),
            deployment_id: Some(deployment_id.to_string()),
        }
    }

    pub fn is_same_as(&self, change_set: &ChangeSet) -> bool {
        &self.id == change_set.identity()
    }
}

impl PartialEq for RanChangeSet {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RanChangeSet {}

impl std::hash::Hash for RanChangeSet {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
