use crate::error::LockError;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Clock and sleep used while waiting for the changelog lock.
pub trait Timer: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Block for `duration`, or fail with `LockError::Cancelled` once the
    /// wait has been abandoned.
    fn sleep(&self, duration: Duration) -> Result<(), LockError>;
}

/// Wall clock with a cancellable sleep.
#[derive(Default)]
pub struct SystemTimer {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl SystemTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every sleeper and make further sleeps fail.
    pub fn cancel(&self) {
        *self.cancelled.lock() = true;
        self.wake.notify_all();
    }
}

impl Timer for SystemTimer {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Result<(), LockError> {
        let deadline = Instant::now() + duration;
        let mut cancelled = self.cancelled.lock();
        while !*cancelled {
            if self.wake.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        if *cancelled { Err(LockError::Cancelled) } else { Ok(()) }
    }
}

type SleepHook = Box<dyn Fn(DateTime<Utc>) + Send + Sync>;

/// Virtual clock. Sleeping advances the clock instantly and then runs the
/// optional hook with the new time.
pub struct ManualTimer {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
    on_sleep: Option<SleepHook>,
}

impl ManualTimer {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
            on_sleep: None,
        }
    }

    pub fn on_sleep(mut self, hook: impl Fn(DateTime<Utc>) + Send + Sync + 'static) -> Self {
        self.on_sleep = Some(Box::new(hook));
        self
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock();
        if let Some(later) = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
        {
            *now = later;
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Timer for ManualTimer {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) -> Result<(), LockError> {
        self.sleeps.lock().push(duration);
        self.advance(duration);
        if let Some(hook) = &self.on_sleep {
            hook(self.now());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_manual_timer_advances_on_sleep() {
        let start = Utc::now();
        let timer = ManualTimer::new(start);
        timer.sleep(Duration::from_secs(10)).unwrap();
        assert_eq!(timer.now() - start, chrono::Duration::seconds(10));
        assert_eq!(timer.sleeps(), vec![Duration::from_secs(10)]);
    }

    #[test]
    fn test_system_timer_cancel_wakes_sleeper() {
        let timer = Arc::new(SystemTimer::new());
        let sleeper = {
            let timer = timer.clone();
            thread::spawn(move || timer.sleep(Duration::from_secs(60)))
        };
        thread::sleep(Duration::from_millis(20));
        timer.cancel();
        assert!(matches!(sleeper.join().unwrap(), Err(LockError::Cancelled)));
    }

    #[test]
    fn test_system_timer_short_sleep() {
        let timer = SystemTimer::new();
        let started = Instant::now();
        timer.sleep(Duration::from_millis(5)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(5));
    }
}
