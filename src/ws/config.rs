#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::backoff::Backoff;

/// Wait before each consecutive reconnect attempt; the last entry repeats.
const DEFAULT_RECONNECT_SCHEDULE: [Duration; 6] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

/// Configuration for the resilient connection.
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Reconnection strategy configuration
    pub reconnect: ReconnectConfig,
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Ordered waits applied to consecutive failed attempts. The cursor saturates at
    /// the final entry and resets once a connection opens.
    pub schedule: Vec<Duration>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            schedule: DEFAULT_RECONNECT_SCHEDULE.to_vec(),
        }
    }
}

impl ReconnectConfig {
    /// Use a custom reconnect schedule. An empty schedule reconnects immediately.
    #[must_use]
    pub fn with_schedule(schedule: Vec<Duration>) -> Self {
        Self { schedule }
    }
}

impl From<ReconnectConfig> for ScheduledBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ScheduledBackoff::new(config.schedule)
    }
}

/// A [`Backoff`] that walks a fixed schedule of waits and then stays on the last one.
///
/// Never gives up: [`Backoff::next_backoff`] always returns `Some`.
#[derive(Debug, Clone)]
pub struct ScheduledBackoff {
    schedule: Vec<Duration>,
    cursor: usize,
}

impl ScheduledBackoff {
    #[must_use]
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self {
            schedule,
            cursor: 0,
        }
    }

    /// Index of the entry the next failed attempt will wait for.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

impl Backoff for ScheduledBackoff {
    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        let Some(last) = self.schedule.len().checked_sub(1) else {
            return Some(Duration::ZERO);
        };
        let wait = self.schedule.get(self.cursor.min(last)).copied();
        if self.cursor < last {
            self.cursor += 1;
        }
        wait
    }
}
