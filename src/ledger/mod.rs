pub mod memory;
pub mod sqlite;

pub use memory::MemoryHistory;
pub use sqlite::SqliteHistory;

use crate::changelog::{ChangeSet, ChangeSetId, ExecType, RanChangeSet};
use crate::checksum::CheckSum;
use crate::error::DatabaseError;
use chrono::{DateTime, Utc};

/// Persisted record of the change sets that ran against one target.
///
/// Writes must be visible to reads through the same instance immediately.
pub trait ChangeLogHistory: Send + Sync {
    /// Create the backing table if it is missing.
    fn init(&self) -> Result<(), DatabaseError>;

    /// Every row, in execution order.
    fn ran_change_sets(&self) -> Result<Vec<RanChangeSet>, DatabaseError>;

    /// Insert a row for `change_set`, or refresh the existing one when it
    /// is re-executed. Either way the row moves to the end of the order.
    fn record(
        &self,
        change_set: &ChangeSet,
        exec_type: ExecType,
        deployment_id: &str,
        executed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    fn remove(&self, id: &ChangeSetId) -> Result<(), DatabaseError>;

    fn tag(&self, id: &ChangeSetId, tag: &str) -> Result<(), DatabaseError>;

    /// Tag the most recently executed row. Returns false on an empty ledger.
    fn tag_last(&self, tag: &str) -> Result<bool, DatabaseError>;

    /// Forget every stored checksum. Returns the number of rows touched.
    fn clear_checksums(&self) -> Result<usize, DatabaseError>;

    fn update_checksum(&self, id: &ChangeSetId, checksum: &CheckSum) -> Result<(), DatabaseError>;

    fn get(&self, id: &ChangeSetId) -> Result<Option<RanChangeSet>, DatabaseError> {
        Ok(self.ran_change_sets()?.into_iter().find(|ran| &ran.id == id))
    }

    fn has_run(&self, id: &ChangeSetId) -> Result<bool, DatabaseError> {
        Ok(self.get(id)?.is_some())
    }

    /// Stored checksum, absent when the change set never ran or the
    /// checksum was cleared.
    fn checksum_of(&self, id: &ChangeSetId) -> Result<Option<CheckSum>, DatabaseError> {
        Ok(self.get(id)?.and_then(|ran| ran.checksum))
    }

    fn tag_exists(&self, tag: &str) -> Result<bool, DatabaseError> {
        Ok(self
            .ran_change_sets()?
            .iter()
            .any(|ran| ran.tag.as_deref() == Some(tag)))
    }
}
