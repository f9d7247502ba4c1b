use super::Database;
use crate::compiler::Dialect;
use crate::error::DatabaseError;
use crate::statement::SqlStatement;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One SQLite connection shared by the adapter, the ledger and the lock
/// store of a migrator, so ledger writes join the change set's transaction.
pub type SharedConnection = Arc<Mutex<Connection>>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn open_connection(path: &str) -> Result<SharedConnection, DatabaseError> {
    let conn = if path == ":memory:" {
        Connection::open_in_memory()?
    } else {
        Connection::open(path)?
    };
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Quote a schema or table name for use in bookkeeping SQL.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

pub struct SqliteDatabase {
    conn: SharedConnection,
}

impl SqliteDatabase {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    pub fn open(path: &str) -> Result<Self, DatabaseError> {
        Ok(Self::new(open_connection(path)?))
    }

    pub fn connection(&self) -> SharedConnection {
        self.conn.clone()
    }
}

impl Database for SqliteDatabase {
    fn short_name(&self) -> &str {
        "sqlite"
    }

    fn execute(&self, statement: &SqlStatement, dialect: &dyn Dialect) -> Result<(), DatabaseError> {
        let commands = dialect.render(statement)?;
        let conn = self.conn.lock();
        for sql in commands {
            debug!("Executing: {}", sql);
            conn.execute_batch(&sql)?;
        }
        Ok(())
    }

    fn begin(&self) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    fn commit(&self) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    fn rollback(&self) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn table_exists(&self, schema: Option<&str>, table: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT 1 FROM {}.sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
            quote_ident(schema.unwrap_or("main"))
        );
        let found = conn
            .query_row(&sql, [table], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }
}
