use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use super::parse_tagged;
use crate::Result;
use crate::batch::SerializedStrategy;

/// A command from the host to the transport worker.
///
/// Serializes with a `type` tag, for example `{"type":"connect","url":"wss://..."}` or
/// `{"type":"setMaxBatchSize","maxBatchSize":100}`.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    /// Open the connection
    Connect { url: String },
    /// Close the connection and stop reconnecting
    Disconnect,
    /// Queue an outbound message
    Message { message: String },
    /// Replace the batching strategy
    SetBatchingStrategy {
        serialized_strategy: SerializedStrategy,
    },
    /// Minimum gap between batches, in milliseconds
    SetRate { rate: u64 },
    /// Per batch id size bound; `null` removes the bound
    SetMaxBatchSize { max_batch_size: Option<NonZeroUsize> },
    /// Same as [`Command::SetRate`]
    SetMaxBatchWait { max_batch_wait: u64 },
    /// The host has handled the previous batch and can take another
    ReadyForNextBatch,
}

impl Command {
    /// Parse a command from its JSON form. Unknown `type` tags are a protocol error.
    pub fn from_json(text: &str) -> Result<Self> {
        parse_tagged(text)
    }
}
