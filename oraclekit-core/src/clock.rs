//! Time sources.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock time for nonces and status timestamps.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;

    /// Local time of day formatted as `HH:MM:SS`.
    fn time_of_day(&self) -> String;
}

/// The system clock in the device's local timezone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|elapsed| u64::try_from(elapsed.as_millis()).ok())
            .unwrap_or_default()
    }

    fn time_of_day(&self) -> String {
        chrono::Local::now().format("%H:%M:%S").to_string()
    }
}

/// A clock frozen at a given instant. Useful for tests and reproducible tokens.
#[derive(Debug, Clone)]
pub struct FixedClock {
    millis: u64,
    time_of_day: String,
}

impl FixedClock {
    /// Creates a clock that always reports `millis` and `time_of_day`.
    #[must_use]
    pub fn new(millis: u64, time_of_day: impl Into<String>) -> Self {
        Self {
            millis,
            time_of_day: time_of_day.into(),
        }
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> u64 {
        self.millis
    }

    fn time_of_day(&self) -> String {
        self.time_of_day.clone()
    }
}
