use crate::{KeyGenerator, KeyGeneratorError};
use chrono::Utc;
use parking_lot::Mutex;

/// Milliseconds since the custom epoch 2020-01-01T00:00:00Z.
const EPOCH_MS: i64 = 1_577_836_800_000;

const SEQUENCE_BITS: u8 = 12;
const WORKER_ID_BITS: u8 = 5;
const DATACENTER_ID_BITS: u8 = 5;

const MAX_WORKER_ID: i64 = (1 << WORKER_ID_BITS) - 1;
const MAX_DATACENTER_ID: i64 = (1 << DATACENTER_ID_BITS) - 1;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;

const WORKER_SHIFT: u8 = SEQUENCE_BITS;
const DATACENTER_SHIFT: u8 = SEQUENCE_BITS + WORKER_ID_BITS;
const TIMESTAMP_SHIFT: u8 = SEQUENCE_BITS + WORKER_ID_BITS + DATACENTER_ID_BITS;

struct ClockState {
    sequence: i64,
    last_time_ms: i64,
}

/// Snowflake-style 64-bit id generator.
///
/// Layout: sign bit 0 | 41 bits of epoch-millis | 5 bits datacenter |
/// 5 bits worker | 12 bits sequence. `last_time_ms` is monotonically
/// non-decreasing; a wall-clock regression is refused rather than risked.
pub struct SnowflakeGenerator {
    worker_id: i64,
    datacenter_id: i64,
    state: Mutex<ClockState>,
}

impl SnowflakeGenerator {
    pub fn new(worker_id: i64, datacenter_id: i64) -> Result<Self, KeyGeneratorError> {
        if !(0..=MAX_WORKER_ID).contains(&worker_id) {
            return Err(KeyGeneratorError::InvalidConfig(format!(
                "worker_id {worker_id} outside [0, {MAX_WORKER_ID}]"
            )));
        }
        if !(0..=MAX_DATACENTER_ID).contains(&datacenter_id) {
            return Err(KeyGeneratorError::InvalidConfig(format!(
                "datacenter_id {datacenter_id} outside [0, {MAX_DATACENTER_ID}]"
            )));
        }
        Ok(Self {
            worker_id,
            datacenter_id,
            state: Mutex::new(ClockState {
                sequence: 0,
                last_time_ms: -1,
            }),
        })
    }

    fn current_millis() -> i64 {
        Utc::now().timestamp_millis() - EPOCH_MS
    }

    /// Spin until the wall clock ticks past `last_ms`. Only reached on
    /// sequence overflow within a single millisecond.
    fn wait_next_millis(last_ms: i64) -> i64 {
        let mut now = Self::current_millis();
        while now <= last_ms {
            std::hint::spin_loop();
            now = Self::current_millis();
        }
        now
    }
}

impl KeyGenerator for SnowflakeGenerator {
    fn next_id(&self) -> Result<i64, KeyGeneratorError> {
        let mut state = self.state.lock();
        let mut now = Self::current_millis();

        if now < state.last_time_ms {
            return Err(KeyGeneratorError::ClockMovedBackwards {
                last_ms: state.last_time_ms + EPOCH_MS,
                now_ms: now + EPOCH_MS,
            });
        }

        if now == state.last_time_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                now = Self::wait_next_millis(state.last_time_ms);
            }
        } else {
            state.sequence = 0;
        }
        state.last_time_ms = now;

        Ok((now << TIMESTAMP_SHIFT)
            | (self.datacenter_id << DATACENTER_SHIFT)
            | (self.worker_id << WORKER_SHIFT)
            | state.sequence)
    }
}
