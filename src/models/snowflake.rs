//! Snowflake: 64-bit, time-ordered identifiers.
//!
//! Bit layout, most significant first:
//!
//! | bits | field |
//! |------|-------|
//! | 41   | milliseconds since [`EPOCH_MILLIS`] |
//! | 5    | worker id (always zero in this deployment) |
//! | 5    | process id |
//! | 12   | per-millisecond sequence |

use crate::error::AppError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Custom epoch, 2015-01-01T00:00:00Z in unix milliseconds.
pub const EPOCH_MILLIS: i64 = 1_420_070_400_000;

pub const TIMESTAMP_SHIFT: u32 = 22;
pub const WORKER_SHIFT: u32 = 17;
pub const PROCESS_SHIFT: u32 = 12;

pub const WORKER_MASK: i64 = 0x1F;
pub const PROCESS_MASK: i64 = 0x1F;
pub const SEQUENCE_MASK: i64 = 0xFFF;
/// Largest sequence value before the counter wraps to zero.
pub const MAX_SEQUENCE: u16 = 0xFFF;

/// Sentinel for "absent".
pub const NIL_SNOWFLAKE: Snowflake = Snowflake(0);

/// A unique identifier. Text form is lowercase hexadecimal of the signed value,
/// JSON form is the same text quoted, binary form is 8 bytes big-endian.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct Snowflake(i64);

impl Snowflake {
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Pack the individual fields. Each field is masked to its width.
    pub const fn from_parts(delta_millis: i64, worker_id: u8, process_id: u8, sequence: u16) -> Self {
        Self(
            (delta_millis << TIMESTAMP_SHIFT)
                | ((worker_id as i64 & WORKER_MASK) << WORKER_SHIFT)
                | ((process_id as i64 & PROCESS_MASK) << PROCESS_SHIFT)
                | (sequence as i64 & SEQUENCE_MASK),
        )
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    pub const fn is_nil(self) -> bool {
        self.0 == 0
    }

    /// Creation time in unix milliseconds.
    pub const fn timestamp_millis(self) -> i64 {
        (self.0 >> TIMESTAMP_SHIFT) + EPOCH_MILLIS
    }

    /// Creation time. `None` only for values whose timestamp chrono cannot represent.
    pub fn time(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_millis()).single()
    }

    pub const fn worker_id(self) -> u8 {
        ((self.0 >> WORKER_SHIFT) & WORKER_MASK) as u8
    }

    pub const fn process_id(self) -> u8 {
        ((self.0 >> PROCESS_SHIFT) & PROCESS_MASK) as u8
    }

    /// The per-millisecond sequence counter.
    pub const fn increment(self) -> u16 {
        (self.0 & SEQUENCE_MASK) as u16
    }

    pub const fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub const fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(i64::from_be_bytes(bytes))
    }
}

impl From<i64> for Snowflake {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl From<Snowflake> for i64 {
    fn from(s: Snowflake) -> Self {
        s.0
    }
}

impl TryFrom<&[u8]> for Snowflake {
    type Error = AppError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; 8] = bytes.try_into().map_err(|_| {
            AppError::InvalidSnowflake(format!("expected 8 bytes, got {}", bytes.len()))
        })?;
        Ok(Self::from_be_bytes(bytes))
    }
}

impl fmt::LowerHex for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 0 {
            write!(f, "-{:x}", self.0.unsigned_abs())
        } else {
            write!(f, "{:x}", self.0)
        }
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(self, f)
    }
}

impl FromStr for Snowflake {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        i64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|e| AppError::InvalidSnowflake(format!("{:?}: {}", s, e)))
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
