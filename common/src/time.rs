//! Time utilities and defaults.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Timing defaults.
pub mod constants {
    use super::Duration;

    /// Deadline for a whole transfer, lock waits included (5 seconds).
    pub fn default_transfer_timeout() -> Duration {
        Duration::from_secs(5)
    }

    /// Longest a statement may wait on a row lock (2 seconds).
    pub fn default_lock_timeout() -> Duration {
        Duration::from_secs(2)
    }

    /// Pool connection acquisition timeout (3 seconds).
    pub fn connection_acquire_timeout() -> Duration {
        Duration::from_secs(3)
    }
}

/// A timestamp, always UTC.
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Whole milliseconds in a duration, saturating at `u64::MAX`.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
