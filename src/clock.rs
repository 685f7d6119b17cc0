use std::time::Instant;

/// Source of millisecond timestamps for all protocol timers.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Milliseconds elapsed since creation, from a monotonic clock.
pub struct SystemClock {
    time_base: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            time_base: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.time_base.elapsed().as_millis() as u64
    }
}
