//! Routes traffic between the host, the batcher and the connection.

use std::time::Duration;

use super::types::request::Command;
use super::types::response::{TransportEvent, parse_inbound};
use crate::Result;
use crate::batch::MessageBatcher;
use crate::ws::{Connector, ResilientConnection};

/// Decides whether an inbound message is batched or passed straight through.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct InboundRouter;

impl InboundRouter {
    /// Route one raw inbound text frame.
    ///
    /// Messages the strategy does not batch come back as [`TransportEvent::Message`]; the
    /// rest go into the batcher, which may release a batch right away.
    pub fn route(batcher: &mut MessageBatcher, raw: &str) -> Result<Option<TransportEvent>> {
        let message = parse_inbound(raw);

        if !batcher.should_batch_message(&message) {
            return Ok(Some(TransportEvent::Message { message }));
        }

        Ok(batcher
            .add_message_to_batch(message)?
            .map(|batch| TransportEvent::Batch { batch }))
    }
}

/// Applies host commands to the connection and the batcher.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct OutboundRouter;

impl OutboundRouter {
    /// Apply `command`. Returns an event when the command releases a batch.
    pub fn route<C: Connector>(
        command: Command,
        connection: &mut ResilientConnection<C>,
        batcher: &mut MessageBatcher,
    ) -> Result<Option<TransportEvent>> {
        match command {
            Command::Connect { url } => connection.connect(&url)?,
            Command::Disconnect => connection.disconnect(),
            Command::Message { message } => connection.enqueue_message(message),
            Command::SetBatchingStrategy {
                serialized_strategy,
            } => batcher.set_batching_strategy(serialized_strategy.reconstruct()?),
            Command::SetRate { rate: millis }
            | Command::SetMaxBatchWait {
                max_batch_wait: millis,
            } => batcher.set_max_batch_wait(Duration::from_millis(millis)),
            Command::SetMaxBatchSize { max_batch_size } => {
                batcher.set_max_batch_size(max_batch_size);
            }
            Command::ReadyForNextBatch => {
                return Ok(batcher
                    .ready_for_next_batch()
                    .map(|batch| TransportEvent::Batch { batch }));
            }
        }

        Ok(None)
    }
}
