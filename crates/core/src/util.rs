use std::time::{SystemTime, UNIX_EPOCH};

use ulid::Ulid;

/// Unix epoch milliseconds.
pub type EpochMs = i64;

/// Returns current unix epoch milliseconds.
///
/// A clock set before the epoch reads as 0 rather than panicking.
pub fn now_ms() -> EpochMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as EpochMs)
        .unwrap_or(0)
}

/// Generates a new ULID.
pub fn new_ulid() -> Ulid {
    Ulid::new()
}
