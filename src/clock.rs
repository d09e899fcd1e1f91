// src/clock.rs

//! Process-wide UTC clock that never runs backwards.
//!
//! The wall clock is read once when the clock is created; every later reading
//! is `anchor + Instant::elapsed()`. Adjustments to the system clock while the
//! service runs therefore cannot reorder events produced by this process.

use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    anchor_wall: DateTime<Utc>,
    anchor_mono: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            anchor_wall: Utc::now(),
            anchor_mono: Instant::now(),
        }
    }

    /// Current UTC time, monotonic with respect to previous calls on any copy
    /// of this clock.
    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = self.anchor_mono.elapsed();
        let delta = ChronoDuration::from_std(elapsed).unwrap_or_else(|_| ChronoDuration::zero());
        self.anchor_wall + delta
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
