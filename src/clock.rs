use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{NaiveDate, Utc};

use crate::model::Ms;

/// Injected time source. Every time-dependent decision (availability date
/// checks, cancellation cutoffs, sweep passes) reads the clock through
/// this trait so tests can pin the calendar.
pub trait Clock: Send + Sync {
    /// Calendar date used for all day-granularity logic.
    fn today(&self) -> NaiveDate;

    /// Unix milliseconds, for booking timestamps and grace periods.
    fn now_ms(&self) -> Ms;
}

/// Wall-clock time (UTC).
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }

    fn now_ms(&self) -> Ms {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as Ms
    }
}

/// Settable clock for deterministic tests and replays.
pub struct ManualClock {
    today: Mutex<NaiveDate>,
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(today: NaiveDate, now_ms: Ms) -> Self {
        Self {
            today: Mutex::new(today),
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set_today(&self, date: NaiveDate) {
        *self.today.lock().unwrap() = date;
    }

    pub fn advance_days(&self, days: i64) {
        let mut today = self.today.lock().unwrap();
        *today = *today + chrono::Duration::days(days);
        self.now_ms
            .fetch_add(days * 24 * 3_600_000, Ordering::SeqCst);
    }

    pub fn set_now_ms(&self, now: Ms) {
        self.now_ms.store(now, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, delta: Ms) {
        self.now_ms.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn today(&self) -> NaiveDate {
        *self.today.lock().unwrap()
    }

    fn now_ms(&self) -> Ms {
        self.now_ms.load(Ordering::SeqCst)
    }
}
