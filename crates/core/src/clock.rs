use std::time::{SystemTime, UNIX_EPOCH};

use crate::CoreError;

/// Returns the current wall-clock time as milliseconds since Unix epoch.
pub fn now_ms() -> Result<i64, CoreError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .map_err(|_| CoreError::InvalidData("system clock before epoch".into()))
}

/// Millisecond clock for stamping local edits.
///
/// Never hands out the same value twice: a tick inside the same millisecond (or
/// after the wall clock stepped backwards) returns `last + 1`.
#[derive(Debug, Default)]
pub struct EditClock {
    last_ms: i64,
}

impl EditClock {
    pub fn new() -> Self {
        Self { last_ms: 0 }
    }

    pub fn tick(&mut self) -> Result<i64, CoreError> {
        let now = now_ms()?;
        self.last_ms = self.observe(now);
        Ok(self.last_ms)
    }

    /// Fold an externally observed timestamp into the clock.
    pub fn observe(&self, wall_ms: i64) -> i64 {
        if wall_ms > self.last_ms {
            wall_ms
        } else {
            self.last_ms + 1
        }
    }

    pub fn last(&self) -> i64 {
        self.last_ms
    }
}
