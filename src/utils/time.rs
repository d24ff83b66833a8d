//! Time utility functions

use std::time::Duration;

/// Convert duration to milliseconds, saturating at `u64::MAX`
pub fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
