use super::Database;
use crate::compiler::Dialect;
use crate::error::DatabaseError;
use crate::statement::SqlStatement;
use parking_lot::Mutex;
use std::collections::HashSet;

#[derive(Debug, Default)]
struct State {
    journal: Vec<String>,
    statements: Vec<SqlStatement>,
    tables: HashSet<String>,
    fail_on: Option<String>,
    in_transaction: bool,
}

/// Scriptable target that records what it was asked to do. Statements are
/// rendered with the dialect the engine hands over, and known tables are
/// tracked so preconditions can be evaluated.
#[derive(Debug)]
pub struct MemoryDatabase {
    name: String,
    state: Mutex<State>,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_table(self, table: &str) -> Self {
        self.state.lock().tables.insert(table.to_ascii_lowercase());
        self
    }

    /// Make every command whose text contains `fragment` fail.
    pub fn fail_on(&self, fragment: impl Into<String>) {
        self.state.lock().fail_on = Some(fragment.into());
    }

    pub fn clear_failure(&self) {
        self.state.lock().fail_on = None;
    }

    /// Rendered commands interleaved with `BEGIN`, `COMMIT` and `ROLLBACK`.
    pub fn journal(&self) -> Vec<String> {
        self.state.lock().journal.clone()
    }

    /// Rendered commands only.
    pub fn executed_sql(&self) -> Vec<String> {
        self.journal()
            .into_iter()
            .filter(|entry| !matches!(entry.as_str(), "BEGIN" | "COMMIT" | "ROLLBACK"))
            .collect()
    }

    pub fn statements(&self) -> Vec<SqlStatement> {
        self.state.lock().statements.clone()
    }

    pub fn reset_journal(&self) {
        let mut state = self.state.lock();
        state.journal.clear();
        state.statements.clear();
    }
}

impl Database for MemoryDatabase {
    fn short_name(&self) -> &str {
        &self.name
    }

    fn execute(&self, statement: &SqlStatement, dialect: &dyn Dialect) -> Result<(), DatabaseError> {
        let commands = dialect.render(statement)?;
        let mut state = self.state.lock();
        for sql in commands {
            if let Some(fragment) = &state.fail_on {
                if sql.contains(fragment.as_str()) {
                    return Err(DatabaseError::other(format!("simulated failure: {}", sql)));
                }
            }
            state.journal.push(sql);
        }
        match statement {
            SqlStatement::CreateTable { table, .. } => {
                state.tables.insert(table.to_ascii_lowercase());
            }
            SqlStatement::DropTable { table, .. } => {
                state.tables.remove(&table.to_ascii_lowercase());
            }
            SqlStatement::RenameTable { old_name, new_name, .. } => {
                state.tables.remove(&old_name.to_ascii_lowercase());
                state.tables.insert(new_name.to_ascii_lowercase());
            }
            _ => {}
        }
        state.statements.push(statement.clone());
        Ok(())
    }

    fn begin(&self) -> Result<(), DatabaseError> {
        let mut state = self.state.lock();
        if !state.in_transaction {
            state.in_transaction = true;
            state.journal.push("BEGIN".to_string());
        }
        Ok(())
    }

    fn commit(&self) -> Result<(), DatabaseError> {
        let mut state = self.state.lock();
        if state.in_transaction {
            state.in_transaction = false;
            state.journal.push("COMMIT".to_string());
        }
        Ok(())
    }

    fn rollback(&self) -> Result<(), DatabaseError> {
        let mut state = self.state.lock();
        if state.in_transaction {
            state.in_transaction = false;
            state.journal.push("ROLLBACK".to_string());
        }
        Ok(())
    }

    fn table_exists(&self, _schema: Option<&str>, table: &str) -> Result<bool, DatabaseError> {
        Ok(self.state.lock().tables.contains(&table.to_ascii_lowercase()))
    }
}
