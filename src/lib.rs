#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod batch;
pub mod error;
pub mod transport;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

pub use batch::{Batch, BatchingStrategy, MessageBatcher, SerializedStrategy};
pub use transport::{Command, Transport, TransportEvent};
pub use ws::{ConnectionState, ResilientConnection};
