
use std::num::NonZeroUsize;
use std::time::Duration;

use crate::batch::DEFAULT_MAX_BATCH_WAIT;
use crate::ws::config::Config as ConnectionConfig;

/// Capacity of the broadcast channel feeding host listeners.
const DEFAULT_EVENT_CAPACITY: usize = 1024;

const DEFAULT_DROP_WARNING: &str =
    "Telemetry arrived faster than it could be processed and some of it was dropped.";
const DEFAULT_DROP_HINT: &str = "Reload the affected views to fetch the missing telemetry.";

/// Configuration for a [`Transport`](super::Transport).
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Reconnect behavior of the underlying connection
    pub connection: ConnectionConfig,
    /// Initial minimum gap between batches; changed at runtime with `set_rate`
    pub max_batch_wait: Duration,
    /// Initial per batch id size bound; `None` never drops messages
    pub max_batch_size: Option<NonZeroUsize>,
    /// How many events a slow listener may fall behind before it misses some
    pub event_capacity: usize,
    /// Text of the alert raised when a batch had to drop messages
    pub drop_warning: String,
    /// Hint shown with the drop alert
    pub drop_hint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            max_batch_wait: DEFAULT_MAX_BATCH_WAIT,
            max_batch_size: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            drop_warning: DEFAULT_DROP_WARNING.to_owned(),
            drop_hint: Some(DEFAULT_DROP_HINT.to_owned()),
        }
    }
}
