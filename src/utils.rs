//! Small helpers shared across the crate
//!
//! Time conversion for persisted expiry timestamps and UTF-8 safe truncation
//! of provider response bodies before they end up in errors or logs.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Maximum length for provider response bodies in error messages
pub const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Convert a point in time to Unix milliseconds, saturating at zero.
#[must_use]
pub fn to_unix_millis(time: SystemTime) -> u64 {
    let millis = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

/// Convert Unix milliseconds back to a point in time.
#[must_use]
pub fn from_unix_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

/// Convert Unix seconds (as found in JWT claims) to a point in time.
///
/// Negative values clamp to the epoch.
#[must_use]
pub fn from_unix_secs(secs: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(u64::try_from(secs).unwrap_or(0))
}

/// Time remaining until `deadline`, zero if it has passed.
#[must_use]
pub fn remaining_until(deadline: SystemTime, now: SystemTime) -> Duration {
    deadline.duration_since(now).unwrap_or(Duration::ZERO)
}

/// Safely truncate a string at a UTF-8 character boundary.
///
/// Returns a slice of at most `max_bytes` bytes.
///
/// # Example
/// ```
/// use session_auth::utils::safe_truncate;
///
/// let text = "Café";
/// assert_eq!(safe_truncate(text, 4), "Caf");
/// ```
#[inline]
#[must_use]
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let mut boundary = max_bytes;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }

    &s[..boundary]
}

/// Truncate a provider response body for inclusion in an error message.
#[must_use]
pub fn truncate_body(body: &str) -> String {
    let truncated = safe_truncate(body, MAX_ERROR_BODY_LENGTH);
    if truncated.len() < body.len() {
        format!("{truncated}... (truncated, {} total bytes)", body.len())
    } else {
        truncated.to_string()
    }
}
