//! The transport facade and the isolated worker behind it.
//!
//! # Architecture
//!
//! - [`Transport`]: the handle the host holds; posts [`Command`]s and hands out events
//! - `Worker`: a tokio task owning the [`ResilientConnection`](crate::ws::ResilientConnection)
//!   and the [`MessageBatcher`](crate::batch::MessageBatcher)
//! - [`InboundRouter`] / [`OutboundRouter`]: dispatch inside the worker
//! - [`DropWarning`]: one user-visible alert per episode of dropped batches

mod client;
pub mod config;
pub mod notify;
pub mod router;
pub mod types;
mod worker;

pub use client::Transport;
pub use config::Config;
pub use notify::{AlertHandle, AlertOptions, DropWarning, LogNotifier, Notifier, Severity};
pub use router::{InboundRouter, OutboundRouter};
pub use types::request::Command;
pub use types::response::{TransportEvent, parse_inbound};
