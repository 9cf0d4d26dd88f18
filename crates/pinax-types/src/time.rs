//! Thin wrapper around the wall clock so every durable row in the engine
//! stamps its timestamps the same way.

use chrono::Utc;

/// Milliseconds since the Unix epoch, used for `started_at`/`completed_at`
/// on [`crate::ChunkState`].
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
