pub mod change;
pub mod changelog;
pub mod checksum;
pub mod compiler;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod filter;
pub mod ledger;
pub mod lock;
pub mod parser;
pub mod precondition;
pub mod statement;

pub use changelog::{ChangeLog, ChangeSet, ChangeSetId, ExecType, RanChangeSet};
pub use checksum::CheckSum;
pub use engine::{Migrator, RollbackTarget, RunScope};
pub use error::{CompileError, DatabaseError, LockError, MigrationError, ValidationErrors, ValidationProblem};

pub type Result<T> = std::result::Result<T, MigrationError>;
