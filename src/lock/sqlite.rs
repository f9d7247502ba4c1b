use super::{LockRecord, LockStore};
use crate::database::SharedConnection;
use crate::database::sqlite::qualified;
use crate::error::DatabaseError;
use chrono::{DateTime, Utc};
use rusqlite::{ErrorCode, OptionalExtension, params};

pub struct SqliteLockStore {
    conn: SharedConnection,
    table: String,
}

impl SqliteLockStore {
    pub fn new(conn: SharedConnection, schema: &str, table: &str) -> Self {
        Self {
            conn,
            table: qualified(schema, table),
        }
    }
}

impl LockStore for SqliteLockStore {
    fn init(&self) -> Result<(), DatabaseError> {
        // Avoid taking a write lock when the row is already there.
        if matches!(self.status(), Ok(Some(_))) {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                locked INTEGER NOT NULL DEFAULT 0,
                locked_by TEXT,
                lock_granted TEXT
            );
            INSERT OR IGNORE INTO {table} (id, locked) VALUES (1, 0);
            "#,
            table = self.table
        ))?;
        Ok(())
    }

    fn try_lock(&self, holder: &str, granted: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let result = self.conn.lock().execute(
            &format!(
                "UPDATE {} SET locked = 1, locked_by = ?1, lock_granted = ?2 WHERE id = 1 AND locked = 0",
                self.table
            ),
            params![holder, granted],
        );
        match result {
            Ok(updated) => Ok(updated == 1),
            // Another connection is writing, which only a lock holder does.
            Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::DatabaseBusy => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn unlock(&self, holder: Option<&str>) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock();
        let updated = match holder {
            Some(holder) => conn.execute(
                &format!(
                    "UPDATE {} SET locked = 0, locked_by = NULL, lock_granted = NULL \
                     WHERE id = 1 AND locked = 1 AND locked_by = ?1",
                    self.table
                ),
                params![holder],
            )?,
            None => conn.execute(
                &format!(
                    "UPDATE {} SET locked = 0, locked_by = NULL, lock_granted = NULL WHERE id = 1 AND locked = 1",
                    self.table
                ),
                [],
            )?,
        };
        Ok(updated == 1)
    }

    fn status(&self) -> Result<Option<LockRecord>, DatabaseError> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!("SELECT id, locked, locked_by, lock_granted FROM {} WHERE id = 1", self.table),
                [],
                |row| {
                    Ok(LockRecord {
                        id: row.get(0)?,
                        locked: row.get(1)?,
                        holder: row.get(2)?,
                        granted: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_connection;

    #[test]
    fn test_conditional_update_decides_ownership() {
        let store = SqliteLockStore::new(open_connection(":memory:").unwrap(), "main", "lock");
        store.init().unwrap();
        store.init().unwrap();

        let now = Utc::now();
        assert!(store.try_lock("a", now).unwrap());
        assert!(!store.try_lock("b", now).unwrap());

        let status = store.status().unwrap().unwrap();
        assert!(status.locked);
        assert_eq!(status.holder.as_deref(), Some("a"));

        assert!(!store.unlock(Some("b")).unwrap());
        assert!(store.unlock(Some("a")).unwrap());
        assert!(!store.unlock(Some("a")).unwrap());
        assert!(store.try_lock("b", now).unwrap());
        assert!(store.unlock(None).unwrap());
        assert!(!store.status().unwrap().unwrap().locked);
    }
}
