//! Inbound message batching.
//!
//! - [`MessageBatcher`]: per batch id accumulation, size bound with drop-oldest, throttled release
//! - [`BatchingStrategy`]: decides what is batched and under which id
//! - [`SerializedStrategy`]: a strategy in a form that can cross the transport boundary

pub mod batcher;
pub mod strategy;
pub mod throttle;

pub use batcher::{Batch, DEFAULT_MAX_BATCH_WAIT, DROPPED_KEY, MessageBatcher};
pub use strategy::{
    BatchingStrategy, CompiledStrategy, FnStrategy, KeyExpr, Predicate, SerializedStrategy,
    StrategyError,
};
pub use throttle::Throttle;
