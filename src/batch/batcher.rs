#![expect(
    clippy::module_name_repetitions,
    reason = "Batcher types expose their domain in the name for clarity"
)]

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::mem;
use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use super::strategy::{BatchingStrategy, StrategyError};
use super::throttle::Throttle;
use crate::Result;
use crate::error::Error;

/// Default minimum gap between two emitted batches.
pub const DEFAULT_MAX_BATCH_WAIT: Duration = Duration::from_millis(1000);

/// Wire key of the [`Batch::dropped`] flag; no batch id may use it.
pub const DROPPED_KEY: &str = "dropped";

/// A set of batched messages released together.
///
/// Serializes as the batch id map itself, plus `"dropped": true` when messages were evicted
/// to respect the size bound: `{"<batchId>": [messages...], "dropped": true}`. The id
/// [`DROPPED_KEY`] is therefore reserved.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Messages per batch id, each in arrival order
    #[serde(flatten)]
    pub messages: HashMap<String, Vec<Value>>,
    /// Whether any batch id lost messages since the previous batch
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dropped: bool,
}

impl Batch {
    /// Messages grouped under `batch_id`.
    #[must_use]
    pub fn get(&self, batch_id: &str) -> Option<&[Value]> {
        self.messages.get(batch_id).map(Vec::as_slice)
    }

    /// Total number of messages across all batch ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.values().all(Vec::is_empty)
    }
}

/// Groups inbound messages per batch id and releases them at a controlled rate.
///
/// Nothing is emitted on a timer of its own: every operation that may release a batch
/// returns it, and the owner polls [`MessageBatcher::deadline`] /
/// [`MessageBatcher::flush_due`] for throttled releases.
///
/// A batch is released when the consumer has said it is ready (through
/// [`MessageBatcher::ready_for_next_batch`]) and the throttle allows it. Releasing hands
/// out everything accumulated so far and starts over with an empty batch.
pub struct MessageBatcher {
    strategy: Option<Box<dyn BatchingStrategy>>,
    batch: HashMap<String, VecDeque<Value>>,
    dropped: bool,
    max_batch_size: Option<NonZeroUsize>,
    ready_for_next_batch: bool,
    throttle: Throttle,
}

impl Default for MessageBatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BATCH_WAIT, None)
    }
}

impl MessageBatcher {
    /// Create a batcher. `max_batch_size` of `None` never drops messages.
    #[must_use]
    pub fn new(max_batch_wait: Duration, max_batch_size: Option<NonZeroUsize>) -> Self {
        Self {
            strategy: None,
            batch: HashMap::new(),
            dropped: false,
            max_batch_size,
            ready_for_next_batch: false,
            throttle: Throttle::new(max_batch_wait),
        }
    }

    /// Replace the strategy. Messages already batched stay where they are.
    pub fn set_batching_strategy<S: BatchingStrategy>(&mut self, strategy: S) {
        self.strategy = Some(Box::new(strategy));
    }

    /// Whether `message` should be batched. Always `false` without a strategy.
    #[must_use]
    pub fn should_batch_message(&self, message: &Value) -> bool {
        self.strategy
            .as_ref()
            .is_some_and(|strategy| strategy.should_batch_message(message))
    }

    /// Add `message` under the batch id the strategy assigns it.
    ///
    /// Evicts the oldest messages of that batch id while it is over the size bound and
    /// flags the whole batch as dropped. A batch id equal to [`DROPPED_KEY`] is rejected.
    /// Returns a batch when the consumer was waiting and the throttle lets it go out
    /// immediately.
    pub fn add_message_to_batch(&mut self, message: Value) -> Result<Option<Batch>> {
        let strategy = self
            .strategy
            .as_ref()
            .ok_or_else(|| Error::validation("no batching strategy configured"))?;
        let batch_id = strategy.batch_id(&message)?;
        if batch_id == DROPPED_KEY {
            return Err(StrategyError::ReservedKey(batch_id).into());
        }

        let messages = self.batch.entry(batch_id).or_default();
        messages.push_back(message);

        if let Some(max) = self.max_batch_size {
            while messages.len() > max.get() {
                messages.pop_front();
                self.dropped = true;
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    max_batch_size = max.get(),
                    "Batch size exceeded, dropping oldest message"
                );
            }
        }

        if self.ready_for_next_batch {
            Ok(self.request_emit())
        } else {
            Ok(None)
        }
    }

    /// Bound every batch id to `max` messages from now on. `None` removes the bound.
    pub fn set_max_batch_size(&mut self, max: Option<NonZeroUsize>) {
        self.max_batch_size = max;
    }

    /// Set the minimum gap between emitted batches.
    pub fn set_max_batch_wait(&mut self, wait: Duration) {
        self.throttle.set_wait(wait);
    }

    /// The consumer is ready for another batch.
    ///
    /// Emits now if anything is waiting and the throttle allows; otherwise the next
    /// message added is emitted as soon as the throttle allows.
    pub fn ready_for_next_batch(&mut self) -> Option<Batch> {
        if self.has_batch() {
            self.request_emit()
        } else {
            self.ready_for_next_batch = true;
            None
        }
    }

    /// When a throttled batch is due, if one is scheduled.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.throttle.deadline()
    }

    /// Release the throttled batch if its deadline has passed.
    pub fn flush_due(&mut self) -> Option<Batch> {
        if !self.throttle.take_due(Instant::now()) || !self.has_batch() {
            return None;
        }
        Some(self.take_batch())
    }

    #[must_use]
    pub fn max_batch_size(&self) -> Option<NonZeroUsize> {
        self.max_batch_size
    }

    #[must_use]
    pub fn max_batch_wait(&self) -> Duration {
        self.throttle.wait()
    }

    fn has_batch(&self) -> bool {
        !self.batch.is_empty()
    }

    fn request_emit(&mut self) -> Option<Batch> {
        if self.throttle.request(Instant::now()) {
            Some(self.take_batch())
        } else {
            #[cfg(feature = "tracing")]
            tracing::trace!(deadline = ?self.throttle.deadline(), "Batch held by throttle");
            None
        }
    }

    fn take_batch(&mut self) -> Batch {
        self.ready_for_next_batch = false;
        let messages = mem::take(&mut self.batch)
            .into_iter()
            .map(|(batch_id, messages)| (batch_id, Vec::from(messages)))
            .collect();

        Batch {
            messages,
            dropped: mem::take(&mut self.dropped),
        }
    }
}

impl fmt::Debug for MessageBatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBatcher")
            .field("has_strategy", &self.strategy.is_some())
            .field("batch_ids", &self.batch.len())
            .field("dropped", &self.dropped)
            .field("max_batch_size", &self.max_batch_size)
            .field("ready_for_next_batch", &self.ready_for_next_batch)
            .field("throttle", &self.throttle)
            .finish()
    }
}
