use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) mod sync;
pub mod timer;

/// Milliseconds since the UNIX epoch, or 0 if the system clock is set before it.
pub(crate) fn system_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
