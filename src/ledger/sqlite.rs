use super::ChangeLogHistory;
use crate::changelog::{ChangeSet, ChangeSetId, ExecType, RanChangeSet};
use crate::checksum::CheckSum;
use crate::database::SharedConnection;
use crate::database::sqlite::qualified;
use crate::error::DatabaseError;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, warn};

/// Ledger kept in a table of the target SQLite database.
pub struct SqliteHistory {
    conn: SharedConnection,
    table: String,
}

impl SqliteHistory {
    pub fn new(conn: SharedConnection, schema: &str, table: &str) -> Self {
        Self {
            conn,
            table: qualified(schema, table),
        }
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<RanChangeSet> {
        let checksum: Option<String> = row.get(3)?;
        let checksum = checksum.and_then(|text| match text.parse::<CheckSum>() {
            Ok(checksum) => Some(checksum),
            Err(err) => {
                // Treated like a cleared checksum; the next update rewrites it.
                warn!("Ignoring unreadable stored checksum: {}", err);
                None
            }
        });
        let exec_type: String = row.get(6)?;
        let exec_type = exec_type
            .parse::<ExecType>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, e.into()))?;

        Ok(RanChangeSet {
            id: ChangeSetId::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?),
            checksum,
            date_executed: row.get(4)?,
            order_executed: row.get(5)?,
            exec_type,
            tag: row.get(7)?,
            description: row.get(8)?,
            comments: row.get(9)?,
            contexts: row.get(10)?,
            labels: row.get(11)?,
            deployment_id: row.get(12)?,
        })
    }
}

impl ChangeLogHistory for SqliteHistory {
    fn init(&self) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                filename TEXT NOT NULL,
                id TEXT NOT NULL,
                author TEXT NOT NULL,
                checksum TEXT,
                date_executed TEXT NOT NULL,
                order_executed INTEGER NOT NULL,
                exec_type TEXT NOT NULL,
                tag TEXT,
                description TEXT,
                comments TEXT,
                contexts TEXT,
                labels TEXT,
                deployment_id TEXT,
                PRIMARY KEY (filename, id, author)
            );
            "#,
            self.table
        ))?;
        Ok(())
    }

    fn ran_change_sets(&self) -> Result<Vec<RanChangeSet>, DatabaseError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT filename, id, author, checksum, date_executed, order_executed, exec_type, \
             tag, description, comments, contexts, labels, deployment_id \
             FROM {} ORDER BY order_executed",
            self.table
        ))?;
        let rows = stmt
            .query_map([], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn record(
        &self,
        change_set: &ChangeSet,
        exec_type: ExecType,
        deployment_id: &str,
        executed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        let next_order: i64 = conn.query_row(
            &format!("SELECT COALESCE(MAX(order_executed), 0) + 1 FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        let row = RanChangeSet::from_change_set(change_set, exec_type, executed_at, next_order, deployment_id);
        let checksum = row.checksum.as_ref().map(|c| c.to_string());
        let id = &row.id;

        let updated = conn.execute(
            &format!(
                "UPDATE {} SET checksum = ?4, date_executed = ?5, order_executed = ?6, exec_type = ?7, \
                 description = ?8, comments = ?9, contexts = ?10, labels = ?11, deployment_id = ?12 \
                 WHERE filename = ?1 AND id = ?2 AND author = ?3",
                self.table
            ),
            params![
                id.file_path,
                id.id,
                id.author,
                checksum,
                row.date_executed,
                row.order_executed,
                row.exec_type.as_str(),
                row.description,
                row.comments,
                row.contexts,
                row.labels,
                row.deployment_id
            ],
        )?;
        if updated == 0 {
            conn.execute(
                &format!(
                    "INSERT INTO {} (filename, id, author, checksum, date_executed, order_executed, exec_type, \
                     description, comments, contexts, labels, deployment_id) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    self.table
                ),
                params![
                    id.file_path,
                    id.id,
                    id.author,
                    checksum,
                    row.date_executed,
                    row.order_executed,
                    row.exec_type.as_str(),
                    row.description,
                    row.comments,
                    row.contexts,
                    row.labels,
                    row.deployment_id
                ],
            )?;
        }
        debug!("Recorded {} as {} (order {})", id, exec_type, next_order);
        Ok(())
    }

    fn remove(&self, id: &ChangeSetId) -> Result<(), DatabaseError> {
        self.conn.lock().execute(
            &format!("DELETE FROM {} WHERE filename = ?1 AND id = ?2 AND author = ?3", self.table),
            params![id.file_path, id.id, id.author],
        )?;
        Ok(())
    }

    fn tag(&self, id: &ChangeSetId, tag: &str) -> Result<(), DatabaseError> {
        self.conn.lock().execute(
            &format!(
                "UPDATE {} SET tag = ?4 WHERE filename = ?1 AND id = ?2 AND author = ?3",
                self.table
            ),
            params![id.file_path, id.id, id.author, tag],
        )?;
        Ok(())
    }

    fn tag_last(&self, tag: &str) -> Result<bool, DatabaseError> {
        let updated = self.conn.lock().execute(
            &format!(
                "UPDATE {table} SET tag = ?1 WHERE order_executed = (SELECT MAX(order_executed) FROM {table})",
                table = self.table
            ),
            params![tag],
        )?;
        Ok(updated > 0)
    }

    fn clear_checksums(&self) -> Result<usize, DatabaseError> {
        let updated = self
            .conn
            .lock()
            .execute(&format!("UPDATE {} SET checksum = NULL", self.table), [])?;
        Ok(updated)
    }

    fn update_checksum(&self, id: &ChangeSetId, checksum: &CheckSum) -> Result<(), DatabaseError> {
        self.conn.lock().execute(
            &format!(
                "UPDATE {} SET checksum = ?4 WHERE filename = ?1 AND id = ?2 AND author = ?3",
                self.table
            ),
            params![id.file_path, id.id, id.author, checksum.to_string()],
        )?;
        Ok(())
    }

    fn get(&self, id: &ChangeSetId) -> Result<Option<RanChangeSet>, DatabaseError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!(
                    "SELECT filename, id, author, checksum, date_executed, order_executed, exec_type, \
                     tag, description, comments, contexts, labels, deployment_id \
                     FROM {} WHERE filename = ?1 AND id = ?2 AND author = ?3",
                    self.table
                ),
                params![id.file_path, id.id, id.author],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::build::*;
    use crate::database::open_connection;

    fn history() -> SqliteHistory {
        let history = SqliteHistory::new(open_connection(":memory:").unwrap(), "main", "ledger");
        history.init().unwrap();
        history
    }

    fn change_set(id: &str) -> ChangeSet {
        ChangeSet::new("changelog.json", id, "alice").with_change(sql("SELECT 1"))
    }

    #[test]
    fn test_init_is_repeatable() {
        let history = history();
        history.init().unwrap();
        assert!(history.ran_change_sets().unwrap().is_empty());
    }

    #[test]
    fn test_record_is_visible_immediately() {
        let history = history();
        let cs = change_set("1");
        history.record(&cs, ExecType::Executed, "dep", Utc::now()).unwrap();
        assert!(history.has_run(cs.identity()).unwrap());
        assert_eq!(history.checksum_of(cs.identity()).unwrap().as_ref(), Some(cs.checksum()));

        let rows = history.ran_change_sets().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].exec_type, ExecType::Executed);
        assert_eq!(rows[0].order_executed, 1);
        assert_eq!(rows[0].deployment_id.as_deref(), Some("dep"));
    }

    #[test]
    fn test_rerun_refreshes_row_and_moves_it_last() {
        let history = history();
        history.record(&change_set("1"), ExecType::Executed, "d1", Utc::now()).unwrap();
        history.record(&change_set("2"), ExecType::Executed, "d1", Utc::now()).unwrap();
        let edited = change_set("1").with_change(sql("SELECT 2"));
        history.record(&edited, ExecType::Reran, "d2", Utc::now()).unwrap();

        let rows = history.ran_change_sets().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].id, *edited.identity());
        assert_eq!(rows[1].exec_type, ExecType::Reran);
        assert_eq!(rows[1].checksum.as_ref(), Some(edited.checksum()));
    }

    #[test]
    fn test_tags_and_cleared_checksums() {
        let history = history();
        assert!(!history.tag_last("empty").unwrap());
        history.record(&change_set("1"), ExecType::Executed, "d", Utc::now()).unwrap();
        history.record(&change_set("2"), ExecType::Executed, "d", Utc::now()).unwrap();
        assert!(history.tag_last("v1").unwrap());
        assert!(history.tag_exists("v1").unwrap());
        assert_eq!(history.get(change_set("2").identity()).unwrap().unwrap().tag.as_deref(), Some("v1"));

        assert_eq!(history.clear_checksums().unwrap(), 2);
        assert_eq!(history.checksum_of(change_set("1").identity()).unwrap(), None);
        assert!(history.has_run(change_set("1").identity()).unwrap());

        history.remove(change_set("1").identity()).unwrap();
        assert!(!history.has_run(change_set("1").identity()).unwrap());
    }
}
