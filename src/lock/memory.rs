use super::{LockRecord, LockStore};
use crate::error::DatabaseError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Lock row kept in process memory. Share one instance between services to
/// model several processes racing for one target.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    row: Mutex<Option<LockRecord>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockStore for MemoryLockStore {
    fn init(&self) -> Result<(), DatabaseError> {
        let mut row = self.row.lock();
        if row.is_none() {
            *row = Some(LockRecord {
                id: 1,
                locked: false,
                holder: None,
                granted: None,
            });
        }
        Ok(())
    }

    fn try_lock(&self, holder: &str, granted: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let mut row = self.row.lock();
        match row.as_mut() {
            Some(record) if !record.locked => {
                record.locked = true;
                record.holder = Some(holder.to_string());
                record.granted = Some(granted);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn unlock(&self, holder: Option<&str>) -> Result<bool, DatabaseError> {
        let mut row = self.row.lock();
        match row.as_mut() {
            Some(record) if record.locked && holder.is_none_or(|h| record.holder.as_deref() == Some(h)) => {
                record.locked = false;
                record.holder = None;
                record.granted = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn status(&self) -> Result<Option<LockRecord>, DatabaseError> {
        Ok(self.row.lock().clone())
    }
}
