//! Wall clock backed by the system time.

use ferry_engine::{Clock, Timestamp};

/// Reads the system clock through chrono.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp_millis().max(0) as Timestamp
    }
}
