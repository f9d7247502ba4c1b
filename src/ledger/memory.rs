use super::ChangeLogHistory;
use crate::changelog::{ChangeSet, ChangeSetId, ExecType, RanChangeSet};
use crate::checksum::CheckSum;
use crate::error::DatabaseError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct MemoryHistory {
    rows: Mutex<Vec<RanChangeSet>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChangeLogHistory for MemoryHistory {
    fn init(&self) -> Result<(), DatabaseError> {
        Ok(())
    }

    fn ran_change_sets(&self) -> Result<Vec<RanChangeSet>, DatabaseError> {
        let mut rows = self.rows.lock().clone();
        rows.sort_by_key(|row| row.order_executed);
        Ok(rows)
    }

    fn record(
        &self,
        change_set: &ChangeSet,
        exec_type: ExecType,
        deployment_id: &str,
        executed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let mut rows = self.rows.lock();
        let next_order = rows.iter().map(|row| row.order_executed).max().unwrap_or(0) + 1;
        let mut row = RanChangeSet::from_change_set(change_set, exec_type, executed_at, next_order, deployment_id);
        if let Some(existing) = rows.iter_mut().find(|r| r.is_same_as(change_set)) {
            row.tag = existing.tag.take();
            *existing = row;
        } else {
            rows.push(row);
        }
        Ok(())
    }

    fn remove(&self, id: &ChangeSetId) -> Result<(), DatabaseError> {
        self.rows.lock().retain(|row| &row.id != id);
        Ok(())
    }

    fn tag(&self, id: &ChangeSetId, tag: &str) -> Result<(), DatabaseError> {
        if let Some(row) = self.rows.lock().iter_mut().find(|row| &row.id == id) {
            row.tag = Some(tag.to_string());
        }
        Ok(())
    }

    fn tag_last(&self, tag: &str) -> Result<bool, DatabaseError> {
        let mut rows = self.rows.lock();
        match rows.iter_mut().max_by_key(|row| row.order_executed) {
            Some(row) => {
                row.tag = Some(tag.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clear_checksums(&self) -> Result<usize, DatabaseError> {
        let mut rows = self.rows.lock();
        for row in rows.iter_mut() {
            row.checksum = None;
        }
        Ok(rows.len())
    }

    fn update_checksum(&self, id: &ChangeSetId, checksum: &CheckSum) -> Result<(), DatabaseError> {
        if let Some(row) = self.rows.lock().iter_mut().find(|row| &row.id == id) {
            row.checksum = Some(checksum.clone());
        }
        Ok(())
    }
}
