// Changelog lock: one row per target, taken with a conditional update

pub mod memory;
pub mod sqlite;
pub mod timer;

pub use memory::MemoryLockStore;
pub use sqlite::SqliteLockStore;
pub use timer::{ManualTimer, SystemTimer, Timer};

use crate::error::{DatabaseError, LockError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Contents of the lock row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub id: i64,
    pub locked: bool,
    pub holder: Option<String>,
    pub granted: Option<DateTime<Utc>>,
}

/// Storage of the lock row. `try_lock` must be a single atomic conditional
/// write; its result is the only evidence of ownership.
pub trait LockStore: Send + Sync {
    /// Create the table and its single row if missing.
    fn init(&self) -> Result<(), DatabaseError>;

    /// Set `locked` if and only if it is currently clear.
    fn try_lock(&self, holder: &str, granted: DateTime<Utc>) -> Result<bool, DatabaseError>;

    /// Clear the row. With `Some(holder)` only that holder's lock is cleared.
    fn unlock(&self, holder: Option<&str>) -> Result<bool, DatabaseError>;

    fn status(&self) -> Result<Option<LockRecord>, DatabaseError>;
}

/// Identity written into the lock row: `host-pid:uuid`.
pub fn default_holder() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{}-{}:{}", host, std::process::id(), Uuid::new_v4())
}

pub struct LockService {
    store: Arc<dyn LockStore>,
    timer: Arc<dyn Timer>,
    holder: String,
    has_lock: AtomicBool,
    wait_time: Duration,
    recheck_interval: Duration,
}

impl LockService {
    pub fn new(store: Arc<dyn LockStore>, timer: Arc<dyn Timer>) -> Self {
        Self {
            store,
            timer,
            holder: default_holder(),
            has_lock: AtomicBool::new(false),
            wait_time: Duration::from_secs(300),
            recheck_interval: Duration::from_secs(10),
        }
    }

    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    pub fn with_wait(mut self, wait_time: Duration, recheck_interval: Duration) -> Self {
        self.wait_time = wait_time;
        self.recheck_interval = recheck_interval;
        self
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn timer(&self) -> &Arc<dyn Timer> {
        &self.timer
    }

    /// In-process view of ownership; storage is not consulted.
    pub fn has_lock(&self) -> bool {
        self.has_lock.load(Ordering::SeqCst)
    }

    /// Single attempt. Never blocks on contention; a nested call from the
    /// current holder succeeds without touching storage.
    pub fn acquire(&self) -> Result<bool, LockError> {
        if self.has_lock() {
            return Ok(true);
        }
        self.store.init()?;
        if self.store.try_lock(&self.holder, self.timer.now())? {
            self.has_lock.store(true, Ordering::SeqCst);
            info!("Successfully acquired change log lock");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn wait_for_lock(&self) -> Result<(), LockError> {
        self.wait_for_lock_with(self.wait_time, self.recheck_interval)
    }

    /// Poll `acquire` every `recheck_interval` until it succeeds or `timeout`
    /// has elapsed. On timeout the current holder is read from storage.
    pub fn wait_for_lock_with(&self, timeout: Duration, recheck_interval: Duration) -> Result<(), LockError> {
        let started = self.timer.now();
        let give_up_at = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|delta| started.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        loop {
            if self.acquire()? {
                return Ok(());
            }
            let now = self.timer.now();
            if now >= give_up_at {
                break;
            }
            let remaining = (give_up_at - now).to_std().unwrap_or(Duration::ZERO);
            info!("Waiting for changelog lock....");
            self.timer.sleep(recheck_interval.min(remaining))?;
        }

        let status = self.store.status()?;
        let (holder, granted) = match status {
            Some(record) if record.locked => (record.holder, record.granted),
            _ => (None, None),
        };
        Err(LockError::Timeout { holder, granted })
    }

    /// Release our lock. Idempotent.
    pub fn release(&self) -> Result<(), LockError> {
        if !self.has_lock() {
            debug!("Change log lock not held, nothing to release");
            return Ok(());
        }
        self.store.unlock(Some(&self.holder))?;
        self.has_lock.store(false, Ordering::SeqCst);
        info!("Successfully released change log lock");
        Ok(())
    }

    /// Fail with `LockError::Lost` unless storage still names us as holder.
    pub fn verify(&self) -> Result<(), LockError> {
        let record = self.store.status()?;
        let ours = self.has_lock()
            && record
                .as_ref()
                .is_some_and(|r| r.locked && r.holder.as_deref() == Some(self.holder.as_str()));
        if ours {
            return Ok(());
        }
        self.has_lock.store(false, Ordering::SeqCst);
        Err(LockError::Lost {
            current: record.filter(|r| r.locked).and_then(|r| r.holder),
        })
    }

    /// Locks currently held on the target, by anyone.
    pub fn list_locks(&self) -> Result<Vec<LockRecord>, LockError> {
        self.store.init()?;
        Ok(self.store.status()?.filter(|r| r.locked).into_iter().collect())
    }

    /// Clear the lock whoever holds it.
    pub fn force_release(&self) -> Result<(), LockError> {
        self.store.init()?;
        if self.store.unlock(None)? {
            warn!("Change log lock was released by force");
        }
        self.has_lock.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicUsize;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn service(store: Arc<MemoryLockStore>, timer: Arc<ManualTimer>, holder: &str) -> LockService {
        LockService::new(store, timer).with_holder(holder)
    }

    #[test]
    fn test_acquire_is_exclusive() {
        let store = Arc::new(MemoryLockStore::new());
        let timer = Arc::new(ManualTimer::new(start()));
        let a = service(store.clone(), timer.clone(), "a");
        let b = service(store.clone(), timer, "b");

        assert!(a.acquire().unwrap());
        assert!(!b.acquire().unwrap());
        assert!(a.acquire().unwrap(), "reentrant within the holder");

        a.release().unwrap();
        a.release().unwrap();
        assert!(b.acquire().unwrap());
    }

    #[test]
    fn test_wait_times_out_naming_holder() {
        let store = Arc::new(MemoryLockStore::new());
        let timer = Arc::new(ManualTimer::new(start()));
        let first = service(store.clone(), timer.clone(), "first-host:1");
        let second = service(store, timer.clone(), "second");
        first.acquire().unwrap();

        let err = second
            .wait_for_lock_with(Duration::from_secs(30), Duration::from_secs(10))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("first-host:1"), "{}", message);
        assert!(message.contains("2024-01-01 00:00:00"), "{}", message);
        assert_eq!(timer.sleeps(), vec![Duration::from_secs(10); 3]);
    }

    #[test]
    fn test_wait_succeeds_after_holder_releases() {
        let store = Arc::new(MemoryLockStore::new());
        let first = Arc::new(
            LockService::new(store.clone(), Arc::new(ManualTimer::new(start()))).with_holder("first"),
        );
        first.acquire().unwrap();

        let polls = Arc::new(AtomicUsize::new(0));
        let timer = {
            let first = first.clone();
            let polls = polls.clone();
            ManualTimer::new(start()).on_sleep(move |_| {
                if polls.fetch_add(1, Ordering::SeqCst) == 1 {
                    first.release().unwrap();
                }
            })
        };
        let second = LockService::new(store.clone(), Arc::new(timer)).with_holder("second");
        second
            .wait_for_lock_with(Duration::from_secs(60), Duration::from_secs(5))
            .unwrap();
        assert!(second.has_lock());
        assert_eq!(polls.load(Ordering::SeqCst), 2);
        assert_eq!(store.status().unwrap().unwrap().holder.as_deref(), Some("second"));
    }

    #[test]
    fn test_zero_timeout_tries_once() {
        let store = Arc::new(MemoryLockStore::new());
        let timer = Arc::new(ManualTimer::new(start()));
        service(store.clone(), timer.clone(), "a").acquire().unwrap();
        let b = service(store, timer.clone(), "b");
        assert!(b.wait_for_lock_with(Duration::ZERO, Duration::from_secs(1)).is_err());
        assert!(timer.sleeps().is_empty());
    }

    #[test]
    fn test_verify_detects_lost_lock() {
        let store = Arc::new(MemoryLockStore::new());
        let timer = Arc::new(ManualTimer::new(start()));
        let a = service(store.clone(), timer.clone(), "a");
        a.acquire().unwrap();
        a.verify().unwrap();

        let admin = service(store.clone(), timer.clone(), "admin");
        admin.force_release().unwrap();
        service(store, timer, "intruder").acquire().unwrap();

        match a.verify() {
            Err(LockError::Lost { current }) => assert_eq!(current.as_deref(), Some("intruder")),
            other => panic!("expected lost lock, got {:?}", other),
        }
        assert!(!a.has_lock());
    }

    #[test]
    fn test_list_locks() {
        let store = Arc::new(MemoryLockStore::new());
        let timer = Arc::new(ManualTimer::new(start()));
        let a = service(store, timer, "a");
        assert!(a.list_locks().unwrap().is_empty());
        a.acquire().unwrap();
        let locks = a.list_locks().unwrap();
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].holder.as_deref(), Some("a"));
        assert_eq!(locks[0].granted, Some(start()));
    }
}
