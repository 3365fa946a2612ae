//! Fixed-window counters backing the burst and gateway send guards.

use std::time::{Duration, Instant};

/// Counter that admits up to `limit` acquisitions per `window`, then refuses
/// until the window rolls over.
#[derive(Debug)]
pub(crate) struct FixedWindow {
    limit: u32,
    window: Duration,
    count: u32,
    started: Instant,
}

impl FixedWindow {
    pub(crate) fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            count: 0,
            started: Instant::now(),
        }
    }

    fn roll(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.started) >= self.window {
            self.count = 0;
            self.started = now;
        }
    }

    /// Consume one slot, returning whether the send is admitted.
    pub(crate) fn try_acquire(&mut self) -> bool {
        self.roll();
        if self.count < self.limit {
            self.count += 1;
            true
        } else {
            false
        }
    }

    /// Time until the current window rolls over (zero when capacity remains).
    pub(crate) fn retry_in(&mut self) -> Duration {
        self.roll();
        if self.count < self.limit {
            Duration::ZERO
        } else {
            self.window
                .checked_sub(self.started.elapsed())
                .unwrap_or(Duration::ZERO)
        }
    }
}
