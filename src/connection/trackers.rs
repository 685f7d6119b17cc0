/// Paces connect requests and counts them.
pub struct ConnectingTracker {
    interval_ms: u64,
    max_attempts: u32,
    attempts: u32,
    last_attempt_ms: Option<u64>,
}

impl ConnectingTracker {
    pub fn new(interval_ms: u64, max_attempts: u32) -> Self {
        Self {
            interval_ms,
            max_attempts,
            attempts: 0,
            last_attempt_ms: None,
        }
    }

    pub fn time_to_attempt(&self, now_ms: u64) -> bool {
        match self.last_attempt_ms {
            Some(last_attempt_ms) => last_attempt_ms + self.interval_ms <= now_ms,
            None => true,
        }
    }

    pub fn max_attempts_reached(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn on_attempt(&mut self, now_ms: u64) {
        self.attempts += 1;
        self.last_attempt_ms = Some(now_ms);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Tracks the last time anything was received.
pub struct TimeoutTracker {
    duration_ms: u64,
    last_receive_ms: u64,
}

impl TimeoutTracker {
    pub fn new(duration_ms: u64, now_ms: u64) -> Self {
        Self {
            duration_ms,
            last_receive_ms: now_ms,
        }
    }

    pub fn set_receive_time(&mut self, now_ms: u64) {
        self.last_receive_ms = now_ms;
    }

    pub fn timed_out(&self, now_ms: u64) -> bool {
        self.last_receive_ms + self.duration_ms < now_ms
    }
}

/// Tracks the last time anything was sent.
pub struct KeepAliveTracker {
    interval_ms: u64,
    last_send_ms: u64,
}

impl KeepAliveTracker {
    pub fn new(interval_ms: u64, now_ms: u64) -> Self {
        Self {
            interval_ms,
            last_send_ms: now_ms,
        }
    }

    pub fn set_send_time(&mut self, now_ms: u64) {
        self.last_send_ms = now_ms;
    }

    pub fn time_to_send(&self, now_ms: u64) -> bool {
        self.last_send_ms + self.interval_ms < now_ms
    }
}

/// Holds a disconnected connection for a while so late packets from the remote are absorbed.
pub struct DisconnectedTracker {
    duration_ms: u64,
    disconnect_ms: Option<u64>,
}

impl DisconnectedTracker {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            disconnect_ms: None,
        }
    }

    pub fn on_disconnect(&mut self, now_ms: u64) {
        self.disconnect_ms = Some(now_ms);
    }

    pub fn time_to_remove(&self, now_ms: u64) -> bool {
        match self.disconnect_ms {
            Some(disconnect_ms) => disconnect_ms + self.duration_ms < now_ms,
            None => false,
        }
    }
}
