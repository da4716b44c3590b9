//! Streams telemetry from a WebSocket endpoint and prints batches as they are released.
//!
//! The demo:
//! 1. Batches messages that carry a `channel` field, grouped by channel
//! 2. Passes everything else through individually
//! 3. Caps each channel at 500 messages per batch and releases at most two batches a second
//! 4. Reports reconnections
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,telemetry_transport=debug cargo run --example telemetry_stream --features tracing -- wss://telemetry.example.com/realtime
//! ```

use std::num::NonZeroUsize;
use std::time::Duration;

use futures::StreamExt as _;
use serde_json::json;
use telemetry_transport::Transport;
use telemetry_transport::batch::{KeyExpr, Predicate, SerializedStrategy};
use telemetry_transport::transport::Config;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "wss://telemetry.example.com/realtime".to_owned());

    let transport = Transport::new(Config::default());
    transport.set_batching_strategy(
        SerializedStrategy::builder()
            .should_batch_message(Predicate::exists("/channel"))
            .get_batch_id_from_message(KeyExpr::field("/channel"))
            .build(),
    )?;
    transport.set_max_batch_size(NonZeroUsize::new(500))?;
    transport.set_rate(Duration::from_millis(500))?;

    let mut batches = Box::pin(transport.batches());
    let mut messages = Box::pin(transport.messages());
    let mut reconnections = Box::pin(transport.reconnections());

    transport.connect(&url)?;
    transport.send(&json!({ "type": "subscribe", "channels": ["*"] }))?;
    transport.ready_for_next_batch()?;
    info!(%url, state = %transport.connection_state(), "Connecting");

    let mut released = 0;
    while released < 20 {
        let next = timeout(Duration::from_secs(30), async {
            tokio::select! {
                Some(batch) = batches.next() => Some(batch.map(Some)),
                Some(message) = messages.next() => Some(message.map(|message| {
                    debug!(%message, "Individual message");
                    None
                })),
                Some(reconnected) = reconnections.next() => Some(reconnected.map(|()| {
                    info!("Reconnected");
                    None
                })),
                else => None,
            }
        })
        .await;

        match next {
            Ok(Some(Ok(Some(batch)))) => {
                released += 1;
                for (channel, values) in &batch.messages {
                    info!(channel, count = values.len(), dropped = batch.dropped, "Batch");
                }
                transport.ready_for_next_batch()?;
            }
            Ok(Some(Ok(None))) => {}
            Ok(Some(Err(e))) => warn!(error = %e, "Listener fell behind"),
            Ok(None) => break,
            Err(_) => {
                info!(state = %transport.connection_state(), "No traffic in 30s");
            }
        }
    }

    transport.shutdown().await?;
    Ok(())
}
