//! Snowflake generation for one process.

use crate::models::snowflake::{Snowflake, EPOCH_MILLIS, MAX_SEQUENCE, PROCESS_MASK};
use crate::services::clock::Clock;
use parking_lot::Mutex;
use std::sync::Arc;

/// Generates time-ordered IDs. Uniqueness across processes relies on each
/// process being given a distinct `process_id`; nothing here coordinates that.
///
/// The sequence counter wraps to zero after 4095 within one millisecond instead
/// of waiting for the next tick, so bursts above 4096 IDs/ms can repeat values.
#[derive(Debug)]
pub struct SnowflakeGenerator {
    process_id: u8,
    clock: Arc<dyn Clock>,
    sequence: Mutex<u16>,
}

impl SnowflakeGenerator {
    pub fn new(process_id: u8, clock: Arc<dyn Clock>) -> Self {
        Self {
            process_id: (process_id as i64 & PROCESS_MASK) as u8,
            clock,
            sequence: Mutex::new(0),
        }
    }

    /// Process id taken from the OS pid, bounded into 5 bits.
    pub fn for_current_process(clock: Arc<dyn Clock>) -> Self {
        Self::new((std::process::id() & 0x1F) as u8, clock)
    }

    pub fn process_id(&self) -> u8 {
        self.process_id
    }

    pub fn next(&self) -> Snowflake {
        let mut seq = self.sequence.lock();
        let delta = self.clock.now().timestamp_millis() - EPOCH_MILLIS;
        *seq = if *seq >= MAX_SEQUENCE { 0 } else { *seq + 1 };
        Snowflake::from_parts(delta, 0, self.process_id, *seq)
    }
}
