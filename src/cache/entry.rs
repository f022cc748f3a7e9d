//! Cache Entry Module
//!
//! Defines the structure for individual settings entries with TTL support.

use serde_json::Value;

// == Cache Entry ==
/// A cached setting value with write and expiry timestamps.
///
/// Invariant: `expires_at = written_at + ttl`, except for a revived entry
/// which keeps its original `written_at` and lives `ttl` from revival.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The stored value
    pub value: Value,
    /// Write timestamp (Unix milliseconds), also used for last-write-wins
    pub written_at: u64,
    /// Expiration timestamp (Unix milliseconds)
    pub expires_at: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry written at `written_at` that lives for `ttl_ms`.
    pub fn new(value: Value, written_at: u64, ttl_ms: u64) -> Self {
        Self {
            value,
            written_at,
            expires_at: written_at.saturating_add(ttl_ms),
        }
    }

    /// Entry that keeps `written_at` but lives `ttl_ms` from now.
    pub fn renewed(value: Value, written_at: u64, ttl_ms: u64) -> Self {
        Self {
            value,
            written_at,
            expires_at: current_timestamp_ms().saturating_add(ttl_ms),
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time reaches `expires_at`.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, 0 once expired.
    pub fn ttl_remaining_ms(&self) -> u64 {
        self.expires_at.saturating_sub(current_timestamp_ms())
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
