//! Presence: when a fingerprint was first and last seen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One logical session per identity key. `last_seen >= first_seen`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    #[serde(with = "hex::serde")]
    pub key: Vec<u8>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Presence {
    pub fn new(key: Vec<u8>, first_seen: DateTime<Utc>, last_seen: DateTime<Utc>) -> Self {
        Self {
            key,
            first_seen,
            last_seen: last_seen.max(first_seen),
        }
    }

    /// Active iff `now - last_seen < window`.
    pub fn is_active(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now.signed_duration_since(self.last_seen) < to_chrono(window)
    }
}

/// Convert a config-sized std duration for chrono arithmetic.
pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}
