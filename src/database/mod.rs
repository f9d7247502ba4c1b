pub mod memory;
pub mod sqlite;

pub use memory::MemoryDatabase;
pub use sqlite::{SharedConnection, SqliteDatabase, open_connection};

use crate::compiler::Dialect;
use crate::error::DatabaseError;
use crate::statement::SqlStatement;

/// A target system the engine migrates.
///
/// Methods take `&self`; adapters keep their connection state behind interior
/// mutability so one adapter can be shared by the ledger, the lock store and
/// the engine within a single operation.
pub trait Database: Send + Sync {
    /// Identity used to pick a dialect and to evaluate `dbms` filters.
    fn short_name(&self) -> &str;

    /// Render `statement` with `dialect` and run the resulting commands in order.
    fn execute(&self, statement: &SqlStatement, dialect: &dyn Dialect) -> Result<(), DatabaseError>;

    fn begin(&self) -> Result<(), DatabaseError>;

    /// Commit the open transaction. A no-op when none is open.
    fn commit(&self) -> Result<(), DatabaseError>;

    /// Roll back the open transaction. A no-op when none is open.
    fn rollback(&self) -> Result<(), DatabaseError>;

    fn table_exists(&self, schema: Option<&str>, table: &str) -> Result<bool, DatabaseError>;
}
