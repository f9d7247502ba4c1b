#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use schemashift::change::ColumnConfig;
use schemashift::change::build::*;
use schemashift::config::MigratorSettings;
use schemashift::database::MemoryDatabase;
use schemashift::ledger::MemoryHistory;
use schemashift::lock::{LockService, ManualTimer, MemoryLockStore};
use schemashift::{ChangeLog, ChangeSet, Migrator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const LEDGER: &str = "schemashift_changelog";

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Temporary SQLite file shared by any number of migrators.
pub struct TestDb {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        Self { dir, path }
    }

    pub fn path_str(&self) -> &str {
        self.path.to_str().unwrap()
    }

    pub fn migrator(&self, holder: &str) -> Migrator {
        self.migrator_with(holder, |_| {})
    }

    pub fn migrator_with(&self, holder: &str, tweak: impl FnOnce(&mut MigratorSettings)) -> Migrator {
        let mut settings = MigratorSettings {
            lock_holder: Some(holder.to_string()),
            lock_wait_time: Duration::from_secs(10),
            lock_recheck_time: Duration::from_millis(20),
            journal_mode: Some("WAL".to_string()),
            ..MigratorSettings::default()
        };
        tweak(&mut settings);
        Migrator::open_sqlite(self.path_str(), settings).unwrap()
    }

    /// Separate connection for inspecting the file.
    pub fn connection(&self) -> Connection {
        Connection::open(&self.path).unwrap()
    }

    pub fn table_exists(&self, table: &str) -> bool {
        let count: i64 = self
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .unwrap();
        count == 1
    }

    pub fn columns(&self, table: &str) -> Vec<String> {
        let conn = self.connection();
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table)).unwrap();
        stmt.query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    /// Ledger ids in execution order.
    pub fn ledger_ids(&self) -> Vec<String> {
        let conn = self.connection();
        let mut stmt = conn
            .prepare(&format!("SELECT id FROM {} ORDER BY order_executed", LEDGER))
            .unwrap();
        stmt.query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }
}

/// In-memory target, ledger and lock sharing one virtual clock.
pub struct MemoryTarget {
    pub database: Arc<MemoryDatabase>,
    pub history: Arc<MemoryHistory>,
    pub store: Arc<MemoryLockStore>,
    pub timer: Arc<ManualTimer>,
}

impl MemoryTarget {
    pub fn new(name: &str) -> Self {
        Self {
            database: Arc::new(MemoryDatabase::new(name)),
            history: Arc::new(MemoryHistory::new()),
            store: Arc::new(MemoryLockStore::new()),
            timer: Arc::new(ManualTimer::new(start())),
        }
    }

    pub fn migrator(&self) -> Migrator {
        self.migrator_with(MigratorSettings::default())
    }

    pub fn migrator_with(&self, settings: MigratorSettings) -> Migrator {
        let lock = LockService::new(self.store.clone(), self.timer.clone())
            .with_holder("memory")
            .with_wait(settings.lock_wait_time, settings.lock_recheck_time);
        Migrator::new(self.database.clone(), self.history.clone(), lock, settings)
    }
}

pub fn cs(id: &str) -> ChangeSet {
    ChangeSet::new("changelog.json", id, "tester")
}

/// Three change sets, each creating one table.
pub fn three_tables() -> ChangeLog {
    ["a", "b", "c"].iter().fold(ChangeLog::new("changelog.json"), |log, name| {
        log.with_change_set(cs(&name.to_uppercase()).with_change(create_table(
            &format!("t_{}", name),
            vec![ColumnConfig::new("id", "INTEGER").primary_key()],
        )))
    })
}

pub fn write_file(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, text).unwrap();
    path
}
