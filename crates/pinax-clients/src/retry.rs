use std::time::Duration;

/// Transport-level retry budget shared by every object-store RPC. This is
/// independent of the CAS-with-refresh retry the chunk worker layers on top
/// of `append_version` — this one covers dropped connections, timeouts, and
/// the object store being transiently overloaded; that one covers a
/// succeeded-but-conflicting response.
pub const HTTP_RETRIES: usize = 8;
const BASE_BACKOFF_MS: u64 = 50;
const MAX_BACKOFF_MS: u64 = 800;
const MAX_RETRY_AFTER_MS: u64 = 5_000;

pub fn backoff_delay(attempt: u32) -> Duration {
    let ms = BASE_BACKOFF_MS.saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(ms.min(MAX_BACKOFF_MS))
}

/// Parses a `Retry-After` header (seconds, per RFC 7231) and clamps it to a
/// sane upper bound so a misbehaving upstream can't stall a worker pass
/// indefinitely.
pub fn retry_after_delay(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    let secs: u64 = raw.trim().parse().ok()?;
    Some(Duration::from_millis((secs * 1000).min(MAX_RETRY_AFTER_MS)))
}

pub fn should_retry_status(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}
