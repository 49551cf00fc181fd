//! Timestamps stamped onto outbound frames.

use chrono::{Local, Utc};

/// Seconds since the Unix epoch.
pub fn unix_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Wall clock time of day as `HH:MM:SS`, used by chat frames.
pub fn clock_time() -> String {
    Local::now().format("%H:%M:%S").to_string()
}
