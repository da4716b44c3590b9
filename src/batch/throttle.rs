use std::time::Duration;

use tokio::time::Instant;

/// Leading and trailing edge throttle over an explicit clock.
///
/// The first request in a quiet period fires at once. Requests inside the window after a
/// firing are folded into a single trailing firing at the end of that window.
#[derive(Debug, Clone)]
pub struct Throttle {
    wait: Duration,
    last_fired: Option<Instant>,
    pending: Option<Instant>,
}

impl Throttle {
    #[must_use]
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            last_fired: None,
            pending: None,
        }
    }

    #[must_use]
    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Change the window. The next request fires immediately; an already scheduled
    /// trailing firing keeps its deadline.
    pub fn set_wait(&mut self, wait: Duration) {
        self.wait = wait;
        self.last_fired = None;
    }

    /// Ask to fire at `now`. Returns `true` when the caller should fire right away,
    /// otherwise a trailing firing is scheduled (at most one).
    pub fn request(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_fired {
            let window_end = last + self.wait;
            if now < window_end {
                self.pending.get_or_insert(window_end);
                return false;
            }
        }

        self.pending = None;
        self.last_fired = Some(now);
        true
    }

    /// When the scheduled trailing firing is due.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.pending
    }

    /// Consume the trailing firing if it is due at `now`.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(at) if now >= at => {
                self.pending = None;
                self.last_fired = Some(now);
                true
            }
            _ => false,
        }
    }
}
