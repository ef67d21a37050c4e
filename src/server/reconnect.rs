use std::time::Duration;

pub const MAX_RECONNECT_ATTEMPTS: u32 = 30;
pub const BASE_DELAY: Duration = Duration::from_secs(1);
pub const MAX_DELAY: Duration = Duration::from_secs(10);

/// Backoff schedule clients follow when a terminal socket drops without a
/// normal close: doubled delays capped at ten seconds, giving up after
/// thirty attempts. Before each attempt the client re-checks the session
/// list; a missing session means the agent exited and reconnecting stops.
#[derive(Debug, Default, Clone)]
pub struct ReconnectPolicy {
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before the next attempt, or None once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= MAX_RECONNECT_ATTEMPTS {
            return None;
        }
        let exp = BASE_DELAY
            .checked_mul(1u32 << self.attempts.min(4))
            .unwrap_or(MAX_DELAY);
        self.attempts += 1;
        Some(exp.min(MAX_DELAY))
    }

    /// A successful connection restarts the schedule from the beginning.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= MAX_RECONNECT_ATTEMPTS
    }
}
