pub mod vec2;

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the unix epoch.
///
/// Used for anything that outlives the process (chat timestamps, persisted
/// death times). Simulation timing uses `Instant` instead.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
