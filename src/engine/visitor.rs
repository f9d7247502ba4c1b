use crate::changelog::{ChangeSet, ChangeSetId, ExecType};
use crate::compiler::{Dialect, StatementCompiler};
use crate::database::Database;
use crate::error::MigrationError;
use crate::ledger::ChangeLogHistory;
use crate::lock::Timer;
use crate::statement::SqlStatement;
use crate::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Everything a visitor may touch during one operation.
pub struct ExecutionContext<'a> {
    pub database: &'a dyn Database,
    pub history: &'a dyn ChangeLogHistory,
    pub compiler: &'a StatementCompiler,
    pub dialect: Arc<dyn Dialect>,
    pub timer: &'a dyn Timer,
    pub deployment_id: String,
}

impl ExecutionContext<'_> {
    pub fn target(&self) -> &str {
        self.database.short_name()
    }

    fn execute(&self, change_set: &ChangeSet, statement: &SqlStatement) -> Result<()> {
        self.database
            .execute(statement, self.dialect.as_ref())
            .map_err(|source| MigrationError::Execution {
                change_set: change_set.identity().clone(),
                statement: describe(statement, self.dialect.as_ref()),
                source,
            })
    }

    /// Roll back whatever is open; failures are logged, not returned.
    fn abandon(&self, change_set: &ChangeSet) {
        if let Err(err) = self.database.rollback() {
            error!("Failed to roll back transaction of {}: {}", change_set, err);
        }
    }
}

/// Rendered text of a statement for error messages, or its summary when it
/// cannot be rendered.
pub fn describe(statement: &SqlStatement, dialect: &dyn Dialect) -> String {
    dialect
        .render(statement)
        .map(|sql| sql.join("; "))
        .unwrap_or_else(|_| statement.to_string())
}

pub trait ChangeSetVisitor {
    fn visit(&mut self, change_set: &ChangeSet) -> Result<()>;
}

/// Executes change sets and records them.
pub struct UpdateVisitor<'a> {
    ctx: &'a ExecutionContext<'a>,
    ran: HashSet<ChangeSetId>,
    executed: Vec<ChangeSetId>,
}

impl<'a> UpdateVisitor<'a> {
    pub fn new(ctx: &'a ExecutionContext<'a>, ran: HashSet<ChangeSetId>) -> Self {
        Self {
            ctx,
            ran,
            executed: Vec::new(),
        }
    }

    pub fn executed(&self) -> &[ChangeSetId] {
        &self.executed
    }

    fn apply(&self, change_set: &ChangeSet, exec_type: ExecType) -> Result<()> {
        let ctx = self.ctx;
        for change in change_set.changes() {
            let statements = match ctx.compiler.compile(change, ctx.target()) {
                Ok(statements) => statements,
                Err(err) if change.skip_if_unsupported => {
                    warn!("Skipping '{}' in {}: {}", change, change_set, err);
                    continue;
                }
                Err(source) => {
                    return Err(MigrationError::Unsupported {
                        change_set: change_set.identity().clone(),
                        source,
                    });
                }
            };

            if change.run_in_own_transaction {
                ctx.database.commit()?;
                ctx.database.begin()?;
            }
            for statement in &statements {
                debug!("{}: {}", change_set, statement);
                ctx.execute(change_set, statement)?;
            }
            if change.run_in_own_transaction {
                ctx.database.commit()?;
                if change_set.is_run_in_transaction() {
                    ctx.database.begin()?;
                }
            }
        }

        ctx.history
            .record(change_set, exec_type, &ctx.deployment_id, ctx.timer.now())?;
        if let Some(tag) = change_set.tag() {
            ctx.history.tag(change_set.identity(), tag)?;
        }
        Ok(())
    }
}

impl ChangeSetVisitor for UpdateVisitor<'_> {
    fn visit(&mut self, change_set: &ChangeSet) -> Result<()> {
        let exec_type = if self.ran.contains(change_set.identity()) {
            ExecType::Reran
        } else {
            ExecType::Executed
        };
        if change_set.is_run_in_transaction() {
            self.ctx.database.begin()?;
        }

        let outcome = self
            .apply(change_set, exec_type)
            .and_then(|()| self.ctx.database.commit().map_err(MigrationError::from));
        match outcome {
            Ok(()) => {
                info!("Change set {} ran successfully ({})", change_set, exec_type);
                self.executed.push(change_set.identity().clone());
                Ok(())
            }
            Err(err) => {
                error!("Change set {} failed: {}", change_set, err);
                self.ctx.abandon(change_set);
                Err(err)
            }
        }
    }
}

/// Executes precomputed rollback plans and removes the ledger rows.
pub struct RollbackVisitor<'a> {
    ctx: &'a ExecutionContext<'a>,
    plans: HashMap<ChangeSetId, Vec<SqlStatement>>,
    rolled_back: usize,
}

impl<'a> RollbackVisitor<'a> {
    pub fn new(ctx: &'a ExecutionContext<'a>, plans: HashMap<ChangeSetId, Vec<SqlStatement>>) -> Self {
        Self {
            ctx,
            plans,
            rolled_back: 0,
        }
    }

    pub fn rolled_back(&self) -> usize {
        self.rolled_back
    }

    fn undo(&self, change_set: &ChangeSet) -> Result<()> {
        let statements = self.plans.get(change_set.identity()).ok_or_else(|| {
            MigrationError::RollbackImpossible {
                change_set: change_set.identity().clone(),
                reason: "no rollback plan was prepared".to_string(),
            }
        })?;
        for statement in statements {
            debug!("{}: {}", change_set, statement);
            self.ctx.execute(change_set, statement)?;
        }
        self.ctx.history.remove(change_set.identity())?;
        self.ctx.database.commit()?;
        Ok(())
    }
}

impl ChangeSetVisitor for RollbackVisitor<'_> {
    fn visit(&mut self, change_set: &ChangeSet) -> Result<()> {
        if change_set.is_run_in_transaction() {
            self.ctx.database.begin()?;
        }
        match self.undo(change_set) {
            Ok(()) => {
                info!("Rolled back change set {}", change_set);
                self.rolled_back += 1;
                Ok(())
            }
            Err(err) => {
                error!("Rollback of change set {} failed: {}", change_set, err);
                self.ctx.abandon(change_set);
                Err(err)
            }
        }
    }
}

/// Records change sets as ran without executing anything.
pub struct SyncVisitor<'a> {
    ctx: &'a ExecutionContext<'a>,
    marked: usize,
}

impl<'a> SyncVisitor<'a> {
    pub fn new(ctx: &'a ExecutionContext<'a>) -> Self {
        Self { ctx, marked: 0 }
    }

    pub fn marked(&self) -> usize {
        self.marked
    }
}

impl ChangeSetVisitor for SyncVisitor<'_> {
    fn visit(&mut self, change_set: &ChangeSet) -> Result<()> {
        self.ctx
            .history
            .record(change_set, ExecType::MarkRan, &self.ctx.deployment_id, self.ctx.timer.now())?;
        if let Some(tag) = change_set.tag() {
            self.ctx.history.tag(change_set.identity(), tag)?;
        }
        info!("Marked change set {} as ran", change_set);
        self.marked += 1;
        Ok(())
    }
}

/// Collects the selected change sets.
#[derive(Default)]
pub struct ListVisitor {
    seen: Vec<ChangeSet>,
}

impl ListVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_change_sets(self) -> Vec<ChangeSet> {
        self.seen
    }
}

impl ChangeSetVisitor for ListVisitor {
    fn visit(&mut self, change_set: &ChangeSet) -> Result<()> {
        self.seen.push(change_set.clone());
        Ok(())
    }
}

/// Renders what an update would execute, touching neither the target nor
/// the ledger.
pub struct SqlOutputVisitor<'a> {
    compiler: &'a StatementCompiler,
    target: String,
    dialect: Arc<dyn Dialect>,
    lines: Vec<String>,
}

impl<'a> SqlOutputVisitor<'a> {
    pub fn new(compiler: &'a StatementCompiler, target: &str) -> Self {
        Self {
            compiler,
            target: target.to_string(),
            dialect: compiler.dialect_for(target),
            lines: Vec::new(),
        }
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

impl ChangeSetVisitor for SqlOutputVisitor<'_> {
    fn visit(&mut self, change_set: &ChangeSet) -> Result<()> {
        self.lines.push(format!("-- Changeset {}", change_set));
        for change in change_set.changes() {
            let statements = match self.compiler.compile(change, &self.target) {
                Ok(statements) => statements,
                Err(err) if change.skip_if_unsupported => {
                    self.lines.push(format!("-- Skipped {}: {}", change, err));
                    continue;
                }
                Err(source) => {
                    return Err(MigrationError::Unsupported {
                        change_set: change_set.identity().clone(),
                        source,
                    });
                }
            };
            for statement in &statements {
                let rendered = self
                    .dialect
                    .render(statement)
                    .map_err(|source| MigrationError::Unsupported {
                        change_set: change_set.identity().clone(),
                        source,
                    })?;
                self.lines.extend(rendered.into_iter().map(|sql| format!("{};", sql)));
            }
        }
        Ok(())
    }
}
