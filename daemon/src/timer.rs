use std::time::{Duration, Instant};

/// Autocycle timer.
///
/// Not a thread of its own: the control loop asks how long to sleep and
/// whether the timer is due. Restarting after every cycle keeps a manual cycle
/// from being followed by an automatic one moments later.
#[derive(Debug, Clone)]
pub struct AutocycleTimer {
    interval: Duration,
    last_reset: Instant,
    running: bool,
}

impl AutocycleTimer {
    /// Create a stopped timer
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_reset: Instant::now(),
            running: false,
        }
    }

    pub fn start(&mut self) {
        if !self.running {
            self.running = true;
            self.last_reset = Instant::now();
            log::debug!("Autocycle timer started ({}s)", self.interval.as_secs());
        }
    }

    pub fn stop(&mut self) {
        if self.running {
            self.running = false;
            log::debug!("Autocycle timer stopped");
        }
    }

    /// Restart the countdown from now; a stopped timer stays stopped.
    pub fn reset(&mut self) {
        self.last_reset = Instant::now();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
        self.reset();
    }

    /// Check if it's time to cycle
    pub fn is_due(&self) -> bool {
        self.running && self.last_reset.elapsed() >= self.interval
    }

    /// Time until the next tick, `None` while stopped.
    pub fn time_until_due(&self) -> Option<Duration> {
        if !self.running {
            return None;
        }
        Some(self.interval.saturating_sub(self.last_reset.elapsed()))
    }
}
