// Compilation of abstract changes into dialect-neutral statements

pub mod dialect;
pub mod registry;

pub use dialect::{AnsiDialect, Db2Dialect, Dialect, DialectRegistry, PostgresDialect, SqliteDialect};
pub use registry::{Generator, GeneratorRegistry};

use crate::change::Change;
use crate::changelog::ChangeSet;
use crate::error::CompileError;
use crate::statement::SqlStatement;
use std::sync::Arc;

/// Dispatches each change to the generator registered for the pair
/// (change type, target dialect). Compiling never touches the target.
#[derive(Clone)]
pub struct StatementCompiler {
    dialects: DialectRegistry,
    generators: GeneratorRegistry,
}

impl StatementCompiler {
    pub fn new(dialects: DialectRegistry, generators: GeneratorRegistry) -> Self {
        Self { dialects, generators }
    }

    pub fn standard() -> Self {
        Self::new(DialectRegistry::standard(), GeneratorRegistry::standard())
    }

    pub fn dialects(&self) -> &DialectRegistry {
        &self.dialects
    }

    pub fn dialects_mut(&mut self) -> &mut DialectRegistry {
        &mut self.dialects
    }

    pub fn generators_mut(&mut self) -> &mut GeneratorRegistry {
        &mut self.generators
    }

    pub fn dialect_for(&self, target: &str) -> Arc<dyn Dialect> {
        self.dialects.resolve(target)
    }

    /// Compile one change for `target`, in declared order.
    pub fn compile(&self, change: &Change, target: &str) -> Result<Vec<SqlStatement>, CompileError> {
        let dialect = self.dialects.resolve(target);
        let change_type = change.change_type();
        let generator = self
            .generators
            .lookup(change_type, dialect.name())
            .ok_or_else(|| CompileError::Unsupported {
                change: change_type.to_string(),
                dialect: dialect.name().to_string(),
            })?;

        let statements = generator(&change.kind, dialect.as_ref())?;
        if let Some(rejected) = statements.iter().find(|s| !dialect.supports(s)) {
            return Err(CompileError::Unsupported {
                change: format!("{} ({})", change_type, rejected.kind_name()),
                dialect: dialect.name().to_string(),
            });
        }
        Ok(statements)
    }

    /// Compile every change of a change set, keeping change then statement
    /// order. Unsupported changes flagged `skip_if_unsupported` contribute
    /// nothing; the errors they raised are returned alongside.
    pub fn compile_change_set(
        &self,
        change_set: &ChangeSet,
        target: &str,
    ) -> Result<(Vec<SqlStatement>, Vec<CompileError>), CompileError> {
        let mut statements = Vec::new();
        let mut skipped = Vec::new();
        for change in change_set.changes() {
            match self.compile(change, target) {
                Ok(mut compiled) => statements.append(&mut compiled),
                Err(err) if change.skip_if_unsupported => skipped.push(err),
                Err(err) => return Err(err),
            }
        }
        Ok((statements, skipped))
    }

    pub fn invert(&self, change: &Change) -> Result<Vec<Change>, CompileError> {
        change.inverse()
    }

    /// Changes that undo a change set. An explicit rollback block wins;
    /// otherwise every change must be invertible, and changes are undone
    /// last-declared first. Each change's own inverse list keeps its order.
    pub fn rollback_changes(&self, change_set: &ChangeSet) -> Result<Vec<Change>, CompileError> {
        if let Some(explicit) = change_set.rollback() {
            return Ok(explicit.to_vec());
        }
        let mut inverses = Vec::new();
        for change in change_set.changes().iter().rev() {
            inverses.extend(self.invert(change)?);
        }
        Ok(inverses)
    }

    /// Rollback statements for a change set, compiled for `target`.
    pub fn compile_rollback(&self, change_set: &ChangeSet, target: &str) -> Result<Vec<SqlStatement>, CompileError> {
        let mut statements = Vec::new();
        for change in self.rollback_changes(change_set)? {
            statements.extend(self.compile(&change, target)?);
        }
        Ok(statements)
    }

    pub fn render(&self, statement: &SqlStatement, target: &str) -> Result<Vec<String>, CompileError> {
        self.dialects.resolve(target).render(statement)
    }
}

impl Default for StatementCompiler {
    fn default() -> Self {
        Self::standard()
    }
}
