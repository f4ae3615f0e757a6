//! Clock abstraction.
//!
//! Token validation, connection expiry, and buffer retention all read time
//! through [`Clock`] so tests can pin it.

/// Source of the current time as Unix epoch seconds.
pub trait Clock: Send + Sync {
    /// Current time as Unix epoch seconds. Broken hosts may report negative values.
    fn now_epoch_secs(&self) -> i64;
}

/// Production clock using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_epoch_secs(&self) -> i64 {
        self.0
    }
}
