//! The persisted credential record
//!
//! A single record per deployment. `expires_in` is the provider-declared
//! lifetime in seconds (a delta, not an absolute time); `saved_time` is the
//! unix-seconds anchor set locally when the record was issued or refreshed.
//! Validity is always derived from the pair, never stored.
//!
//! The anchor is wall clock so it survives restarts. A backward clock jump
//! makes an expired token look valid until the next natural check — bounded
//! staleness, not an early refresh.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// The stored token pair with its expiry anchor.
///
/// `refresh_token` is obtained once, during the authorization-code exchange,
/// and is never reissued by the provider in this flow — every refresh
/// carries it over unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds until expiry, counted from `saved_time`
    pub expires_in: u64,
    /// Unix timestamp (seconds) when the record was issued or last refreshed
    pub saved_time: u64,
}

impl Credential {
    /// Absolute expiry as unix seconds.
    pub fn expires_at(&self) -> u64 {
        self.saved_time.saturating_add(self.expires_in)
    }

    /// Whether the access token is still usable at `now`.
    pub fn is_valid_at(&self, now: u64) -> bool {
        now < self.expires_at()
    }

    /// Build the successor record after a refresh: new access token and
    /// lifetime, re-anchored at `now`, refresh token carried over.
    pub fn after_refresh(&self, access_token: String, expires_in: u64, now: u64) -> Credential {
        Credential {
            access_token,
            refresh_token: self.refresh_token.clone(),
            expires_in,
            saved_time: now,
        }
    }
}

/// Current wall-clock time as unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
