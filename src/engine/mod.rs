// Operations over a changelog: update, rollback, sync and friends

pub mod iterator;
pub mod validation;
pub mod visitor;

pub use iterator::{ChangeLogIterator, Direction};
pub use validation::validate_changelog;
pub use visitor::{
    ChangeSetVisitor, ExecutionContext, ListVisitor, RollbackVisitor, SqlOutputVisitor, SyncVisitor, UpdateVisitor,
};

use crate::Result;
use crate::changelog::{ChangeLog, ChangeSet, RanChangeSet};
use crate::compiler::StatementCompiler;
use crate::config::MigratorSettings;
use crate::database::{Database, SqliteDatabase, open_connection};
use crate::error::{DatabaseError, MigrationError, ValidationErrors};
use crate::filter::{
    AfterTagFilter, AlreadyRanFilter, ContextFilter, DbmsFilter, ExecutedAfterFilter, FilterPipeline, LabelFilter,
    ShouldRunFilter,
};
use crate::ledger::{ChangeLogHistory, SqliteHistory};
use crate::lock::{LockRecord, LockService, SqliteLockStore, SystemTimer};
use crate::precondition::{PreconditionEvaluator, StandardPreconditionEvaluator};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Caller-supplied contexts and labels restricting which change sets apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunScope {
    pub contexts: Vec<String>,
    pub labels: Vec<String>,
}

impl RunScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contexts(mut self, contexts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.contexts = contexts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_labels(mut self, labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackTarget {
    /// Everything executed after the last row carrying the tag.
    Tag(String),
    /// Everything executed after the given time.
    Date(DateTime<Utc>),
    /// The last `n` applied change sets, in reverse changelog order.
    Count(usize),
}

/// Runs operations against one target. Owns its collaborators; nothing is
/// shared between migrators except what the caller shares explicitly.
pub struct Migrator {
    database: Arc<dyn Database>,
    history: Arc<dyn ChangeLogHistory>,
    lock: LockService,
    compiler: StatementCompiler,
    preconditions: Box<dyn PreconditionEvaluator>,
    settings: MigratorSettings,
}

impl Migrator {
    pub fn new(
        database: Arc<dyn Database>,
        history: Arc<dyn ChangeLogHistory>,
        lock: LockService,
        settings: MigratorSettings,
    ) -> Self {
        Self {
            database,
            history,
            lock,
            compiler: StatementCompiler::standard(),
            preconditions: Box::new(StandardPreconditionEvaluator),
            settings,
        }
    }

    /// Migrator for a SQLite file, keeping the ledger and the lock in the
    /// same database.
    pub fn open_sqlite(path: &str, settings: MigratorSettings) -> Result<Self> {
        let conn = open_connection(path)?;
        if let Some(mode) = &settings.journal_mode {
            let applied: String = conn
                .lock()
                .query_row(&format!("PRAGMA journal_mode = {}", mode), [], |row| row.get(0))
                .map_err(DatabaseError::from)?;
            debug!("SQLite journal mode: {}", applied);
        }

        let database = Arc::new(SqliteDatabase::new(conn.clone()));
        let history = Arc::new(SqliteHistory::new(conn.clone(), &settings.schema, &settings.ledger_table));
        let store = Arc::new(SqliteLockStore::new(conn, &settings.schema, &settings.lock_table));
        let mut lock = LockService::new(store, Arc::new(SystemTimer::new()))
            .with_wait(settings.lock_wait_time, settings.lock_recheck_time);
        if let Some(holder) = &settings.lock_holder {
            lock = lock.with_holder(holder.clone());
        }
        Ok(Self::new(database, history, lock, settings))
    }

    pub fn with_compiler(mut self, compiler: StatementCompiler) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_precondition_evaluator(mut self, evaluator: impl PreconditionEvaluator + 'static) -> Self {
        self.preconditions = Box::new(evaluator);
        self
    }

    pub fn settings(&self) -> &MigratorSettings {
        &self.settings
    }

    pub fn lock(&self) -> &LockService {
        &self.lock
    }

    pub fn compiler(&self) -> &StatementCompiler {
        &self.compiler
    }

    fn target(&self) -> &str {
        self.database.short_name()
    }

    /// Run `operation` while holding the changelog lock. A failed release is
    /// logged and never replaces the operation's own result.
    fn locked<T>(&self, operation: impl FnOnce() -> Result<T>) -> Result<T> {
        self.lock.wait_for_lock()?;
        let result = operation();
        if let Err(err) = self.lock.release() {
            warn!("Failed to release change log lock: {}", err);
        }
        result
    }

    fn context(&self) -> ExecutionContext<'_> {
        let now = self.lock.timer().now();
        ExecutionContext {
            database: self.database.as_ref(),
            history: self.history.as_ref(),
            compiler: &self.compiler,
            dialect: self.compiler.dialect_for(self.target()),
            timer: self.lock.timer().as_ref(),
            deployment_id: format!("{:010}", now.timestamp_millis().rem_euclid(10_000_000_000)),
        }
    }

    fn scope_pipeline(&self, scope: &RunScope) -> FilterPipeline {
        FilterPipeline::new()
            .with(ContextFilter::new(&scope.contexts))
            .with(LabelFilter::new(&scope.labels))
            .with(DbmsFilter::new(self.target()))
    }

    /// Bootstrap the ledger, evaluate root preconditions and read the ledger.
    fn prepare(&self, changelog: &ChangeLog) -> Result<Vec<RanChangeSet>> {
        self.history.init()?;
        if let Some(preconditions) = changelog.preconditions() {
            self.preconditions.evaluate(preconditions, self.database.as_ref())?;
        }
        Ok(self.history.ran_change_sets()?)
    }

    fn check(&self, changelog: &ChangeLog, scope: &RunScope, ran: &[RanChangeSet]) -> Result<()> {
        let errors = validate_changelog(
            changelog,
            ran,
            &self.scope_pipeline(scope),
            &self.compiler,
            self.target(),
            self.settings.ignore_checksums,
        );
        if errors.is_empty() {
            Ok(())
        } else {
            Err(MigrationError::Validation(errors))
        }
    }

    /// Store current checksums for rows whose checksum was cleared. Returns
    /// whether anything changed.
    fn upgrade_checksums(&self, changelog: &ChangeLog, ran: &[RanChangeSet]) -> Result<bool> {
        let cleared: HashSet<_> = ran.iter().filter(|r| r.checksum.is_none()).map(|r| &r.id).collect();
        let mut upgraded = false;
        for change_set in changelog.change_sets() {
            if cleared.contains(change_set.identity()) {
                info!("Updating null or out of date checksum on change set {}", change_set);
                self.history
                    .update_checksum(change_set.identity(), change_set.checksum())?;
                upgraded = true;
            }
        }
        Ok(upgraded)
    }

    fn pending(&self, changelog: &ChangeLog, scope: &RunScope) -> Result<Vec<RanChangeSet>> {
        let ran = self.prepare(changelog)?;
        self.check(changelog, scope, &ran)?;
        if self.upgrade_checksums(changelog, &ran)? {
            return Ok(self.history.ran_change_sets()?);
        }
        Ok(ran)
    }

    /// Apply pending change sets in changelog order, at most `count` of them.
    /// Returns how many ran.
    pub fn update(&self, changelog: &ChangeLog, scope: &RunScope, count: Option<usize>) -> Result<usize> {
        self.locked(|| {
            let ran = self.pending(changelog, scope)?;
            let pipeline = self
                .scope_pipeline(scope)
                .with(ShouldRunFilter::new(&ran))
                .with_count(count);
            let iterator = ChangeLogIterator::new(changelog, pipeline);
            let selected = iterator.select(Direction::Forward);

            let ctx = self.context();
            let mut visitor = UpdateVisitor::new(&ctx, ran.iter().map(|r| r.id.clone()).collect());
            ChangeLogIterator::walk(&selected, &mut visitor, &self.lock)?;
            let executed = visitor.executed().len();
            info!("Update complete: {} change set(s) applied to {}", executed, self.target());
            Ok(executed)
        })
    }

    /// Undo applied change sets in reverse changelog order. Every selected
    /// change set is planned before the first statement runs, so a change
    /// set that cannot be undone fails the whole rollback up front.
    pub fn rollback(&self, changelog: &ChangeLog, scope: &RunScope, target: RollbackTarget) -> Result<usize> {
        self.locked(|| {
            let ran = self.prepare(changelog)?;
            self.check(changelog, scope, &ran)?;

            let mut pipeline = self.scope_pipeline(scope).with(AlreadyRanFilter::new(&ran));
            pipeline = match &target {
                RollbackTarget::Tag(tag) => {
                    let filter = AfterTagFilter::new(tag, &ran).map_err(|problem| ValidationErrors {
                        problems: vec![problem],
                    })?;
                    pipeline.with(filter)
                }
                RollbackTarget::Date(date) => pipeline.with(ExecutedAfterFilter::new(*date, &ran)),
                RollbackTarget::Count(n) => pipeline.with_count(Some(*n)),
            };
            let iterator = ChangeLogIterator::new(changelog, pipeline);
            let selected = iterator.select(Direction::Reverse);

            let mut plans = HashMap::new();
            for change_set in &selected {
                let statements = self
                    .compiler
                    .compile_rollback(change_set, self.target())
                    .map_err(|err| MigrationError::RollbackImpossible {
                        change_set: change_set.identity().clone(),
                        reason: err.to_string(),
                    })?;
                plans.insert(change_set.identity().clone(), statements);
            }

            let ctx = self.context();
            let mut visitor = RollbackVisitor::new(&ctx, plans);
            ChangeLogIterator::walk(&selected, &mut visitor, &self.lock)?;
            info!("Rollback complete: {} change set(s) rolled back", visitor.rolled_back());
            Ok(visitor.rolled_back())
        })
    }

    /// Record pending change sets as ran without executing them.
    pub fn sync(&self, changelog: &ChangeLog, scope: &RunScope) -> Result<usize> {
        self.locked(|| {
            let ran = self.pending(changelog, scope)?;
            let pipeline = self.scope_pipeline(scope).with(ShouldRunFilter::new(&ran));
            let selected = ChangeLogIterator::new(changelog, pipeline).select(Direction::Forward);

            let ctx = self.context();
            let mut visitor = SyncVisitor::new(&ctx);
            ChangeLogIterator::walk(&selected, &mut visitor, &self.lock)?;
            Ok(visitor.marked())
        })
    }

    /// Change sets an update would run, in order. Nothing is mutated except
    /// bootstrapping the ledger table.
    pub fn list_pending(&self, changelog: &ChangeLog, scope: &RunScope) -> Result<Vec<ChangeSet>> {
        self.locked(|| {
            let ran = self.prepare(changelog)?;
            let pipeline = self.scope_pipeline(scope).with(ShouldRunFilter::new(&ran));
            let selected = ChangeLogIterator::new(changelog, pipeline).select(Direction::Forward);

            let mut visitor = ListVisitor::new();
            ChangeLogIterator::walk(&selected, &mut visitor, &self.lock)?;
            Ok(visitor.into_change_sets())
        })
    }

    /// SQL an update would execute, one command per line, with a comment
    /// line naming each change set.
    pub fn update_sql(&self, changelog: &ChangeLog, scope: &RunScope, count: Option<usize>) -> Result<Vec<String>> {
        self.locked(|| {
            let ran = self.prepare(changelog)?;
            self.check(changelog, scope, &ran)?;
            let pipeline = self
                .scope_pipeline(scope)
                .with(ShouldRunFilter::new(&ran))
                .with_count(count);
            let selected = ChangeLogIterator::new(changelog, pipeline).select(Direction::Forward);

            let mut visitor = SqlOutputVisitor::new(&self.compiler, self.target());
            ChangeLogIterator::walk(&selected, &mut visitor, &self.lock)?;
            Ok(visitor.into_lines())
        })
    }

    pub fn validate(&self, changelog: &ChangeLog, scope: &RunScope) -> Result<()> {
        self.locked(|| {
            let ran = self.prepare(changelog)?;
            self.check(changelog, scope, &ran)
        })
    }

    /// Tag the most recently applied change set.
    pub fn tag(&self, tag: &str) -> Result<()> {
        self.locked(|| {
            self.history.init()?;
            if self.history.tag_last(tag)? {
                info!("Tagged database with '{}'", tag);
                Ok(())
            } else {
                Err(DatabaseError::other("Cannot tag an empty database").into())
            }
        })
    }

    pub fn tag_exists(&self, tag: &str) -> Result<bool> {
        self.history.init()?;
        Ok(self.history.tag_exists(tag)?)
    }

    /// Ledger rows in execution order.
    pub fn history(&self) -> Result<Vec<RanChangeSet>> {
        self.history.init()?;
        Ok(self.history.ran_change_sets()?)
    }

    pub fn clear_checksums(&self) -> Result<usize> {
        self.locked(|| {
            self.history.init()?;
            let cleared = self.history.clear_checksums()?;
            info!("Cleared {} stored checksum(s)", cleared);
            Ok(cleared)
        })
    }

    /// Release the changelog lock regardless of who holds it.
    pub fn release_locks(&self) -> Result<()> {
        Ok(self.lock.force_release()?)
    }

    pub fn list_locks(&self) -> Result<Vec<LockRecord>> {
        Ok(self.lock.list_locks()?)
    }
}
