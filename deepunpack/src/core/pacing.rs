//! Time-based pacing for long-running copy loops.
//!
//! Both helpers look at wall time rather than bytes, so a slow chunk and a
//! fast chunk reach the next suspension point within the same bound.

use std::time::{Duration, Instant};

/// Inserts a cooperative yield once `interval` of wall time has passed.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last_yield: Instant,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_yield: Instant::now(),
        }
    }

    /// Returns true when a yield was performed
    pub fn tick(&mut self) -> bool {
        if self.last_yield.elapsed() < self.interval {
            return false;
        }
        std::thread::yield_now();
        self.last_yield = Instant::now();
        true
    }
}

/// Rate limiter for progress reports.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    /// True when enough time has passed since the last accepted report.
    /// The first call always passes.
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }

    /// Record a report made outside the throttle (e.g. end of file)
    pub fn mark(&mut self) {
        self.last_emit = Some(Instant::now());
    }
}
