use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_stream::stream;
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use super::config::Config;
use super::notify::{DropWarning, Notifier};
#[cfg(feature = "ws")]
use super::notify::LogNotifier;
use super::types::request::Command;
use super::types::response::TransportEvent;
use super::worker::{Control, Worker};
use crate::Result;
use crate::batch::{Batch, BatchingStrategy, MessageBatcher, SerializedStrategy};
use crate::error::{Error, Kind};
#[cfg(feature = "ws")]
use crate::ws::WsConnector;
use crate::ws::{ConnectionState, Connector, ResilientConnection, WsError};

/// Handle to a resilient, batching telemetry transport.
///
/// The connection and the batcher live on a dedicated worker task; every method here only
/// posts a command to it and returns. Results come back as [`TransportEvent`]s through
/// [`Transport::subscribe`] or the typed streams.
///
/// Cloning is cheap and every clone talks to the same worker. The worker stops when
/// [`Transport::shutdown`] is called, when the last clone is dropped, or when a command
/// turns out to be a caller error (connecting twice, an invalid strategy). After that,
/// commands fail with [`WsError::ConnectionClosed`].
///
/// # Examples
///
/// ```rust, no_run
/// use futures::StreamExt as _;
/// use telemetry_transport::Transport;
/// use telemetry_transport::batch::{KeyExpr, Predicate, SerializedStrategy};
/// use telemetry_transport::transport::Config;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let transport = Transport::new(Config::default());
///     transport.set_batching_strategy(SerializedStrategy::new(
///         Predicate::exists("/channel"),
///         KeyExpr::field("/channel"),
///     ))?;
///     transport.connect("wss://telemetry.example.com/realtime")?;
///
///     let mut batches = Box::pin(transport.batches());
///     transport.ready_for_next_batch()?;
///     while let Some(batch) = batches.next().await {
///         println!("{} messages", batch?.len());
///         transport.ready_for_next_batch()?;
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    control: mpsc::UnboundedSender<Control>,
    /// Kept only to hand out fresh receivers
    events: broadcast::Receiver<TransportEvent>,
    state: watch::Receiver<ConnectionState>,
    worker: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Drop for TransportInner {
    fn drop(&mut self) {
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = worker {
            handle.abort();
        }
    }
}

#[cfg(feature = "ws")]
impl Transport {
    /// Create a transport over real WebSocket connections, reporting dropped data through
    /// `tracing`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_connector(WsConnector, LogNotifier, config)
    }
}

impl Transport {
    /// Create a transport over sockets opened by `connector`, raising drop warnings through
    /// `notifier`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_connector<C: Connector, N: Notifier>(connector: C, notifier: N, config: Config) -> Self {
        let (connection, socket_events) = ResilientConnection::new(connector, config.connection);
        let state = connection.state_receiver();
        let batcher = MessageBatcher::new(config.max_batch_wait, config.max_batch_size);
        let drop_warning = DropWarning::new(notifier, config.drop_warning, config.drop_hint);

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = broadcast::channel(config.event_capacity.max(1));

        let worker = Worker::new(
            connection,
            socket_events,
            batcher,
            control_rx,
            events_tx,
            drop_warning,
        );
        let handle = tokio::spawn(worker.run());

        Self {
            inner: Arc::new(TransportInner {
                control: control_tx,
                events: events_rx,
                state,
                worker: Mutex::new(Some(handle)),
            }),
        }
    }

    /// Open the connection to `url`.
    pub fn connect(&self, url: &str) -> Result<()> {
        self.dispatch(Command::Connect {
            url: url.to_owned(),
        })
    }

    /// Close the connection. Queued messages stay queued for the next connect.
    pub fn disconnect(&self) -> Result<()> {
        self.dispatch(Command::Disconnect)
    }

    /// Queue a text message for the server.
    pub fn send_message<S: Into<String>>(&self, message: S) -> Result<()> {
        self.dispatch(Command::Message {
            message: message.into(),
        })
    }

    /// Queue `message` for the server as JSON text.
    pub fn send<R: Serialize>(&self, message: &R) -> Result<()> {
        self.send_message(serde_json::to_string(message)?)
    }

    /// Replace the batching strategy with one in its wire form.
    ///
    /// The strategy is validated inside the worker; an invalid one stops the worker.
    pub fn set_batching_strategy(&self, strategy: SerializedStrategy) -> Result<()> {
        self.dispatch(Command::SetBatchingStrategy {
            serialized_strategy: strategy,
        })
    }

    /// Replace the batching strategy with an in-process implementation.
    pub fn set_strategy<S: BatchingStrategy>(&self, strategy: S) -> Result<()> {
        self.post(Control::Strategy(Box::new(strategy)))
    }

    /// Set the minimum gap between two batches.
    pub fn set_rate(&self, rate: Duration) -> Result<()> {
        self.dispatch(Command::SetRate {
            rate: millis(rate),
        })
    }

    /// Same as [`Transport::set_rate`].
    pub fn set_max_batch_wait(&self, wait: Duration) -> Result<()> {
        self.dispatch(Command::SetMaxBatchWait {
            max_batch_wait: millis(wait),
        })
    }

    /// Bound every batch id to `max` messages, dropping the oldest beyond that. `None`
    /// removes the bound.
    pub fn set_max_batch_size(&self, max: Option<NonZeroUsize>) -> Result<()> {
        self.dispatch(Command::SetMaxBatchSize {
            max_batch_size: max,
        })
    }

    /// Tell the worker the previous batch has been handled.
    pub fn ready_for_next_batch(&self) -> Result<()> {
        self.dispatch(Command::ReadyForNextBatch)
    }

    /// Post a command to the worker.
    pub fn dispatch(&self, command: Command) -> Result<()> {
        self.post(Control::Command(command))
    }

    /// Post a command given in its JSON form. Unknown tags are rejected before reaching
    /// the worker.
    pub fn dispatch_json(&self, text: &str) -> Result<()> {
        self.dispatch(Command::from_json(text)?)
    }

    /// Receive every event the worker emits.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.resubscribe()
    }

    /// Stream of released batches.
    ///
    /// A listener that falls behind gets one [`WsError::Lagged`] item and then resumes
    /// with the oldest event still buffered.
    pub fn batches(&self) -> impl Stream<Item = Result<Batch>> + use<> {
        self.filtered(|event| match event {
            TransportEvent::Batch { batch } => Some(batch),
            _ => None,
        })
    }

    /// Stream of messages the strategy did not batch.
    pub fn messages(&self) -> impl Stream<Item = Result<Value>> + use<> {
        self.filtered(|event| match event {
            TransportEvent::Message { message } => Some(message),
            _ => None,
        })
    }

    /// Stream that yields each time the connection comes back after an unexpected drop.
    pub fn reconnections(&self) -> impl Stream<Item = Result<()>> + use<> {
        self.filtered(|event| matches!(event, TransportEvent::Reconnected).then_some(()))
    }

    /// Get the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    /// Disconnect, stop the worker and wait for it.
    ///
    /// Returns the error that stopped the worker early, if any. Calling it again returns
    /// `Ok(())`.
    pub async fn shutdown(&self) -> Result<()> {
        _ = self.inner.control.send(Control::Shutdown);

        let worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match worker {
            Some(handle) => handle
                .await
                .map_err(|e| Error::with_source(Kind::Internal, e))?,
            None => Ok(()),
        }
    }

    fn post(&self, control: Control) -> Result<()> {
        if self.inner.control.send(control).is_err() {
            return Err(WsError::ConnectionClosed.into());
        }
        Ok(())
    }

    fn filtered<T, F>(&self, select: F) -> impl Stream<Item = Result<T>> + use<T, F>
    where
        F: Fn(TransportEvent) -> Option<T>,
    {
        let mut rx = self.subscribe();

        stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Some(item) = select(event) {
                            yield Ok(item);
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Transport listener lagged, missed {n} events");
                        // Report the gap and keep listening.
                        yield Err(Error::from(WsError::Lagged { count: n }));
                    }
                    Err(RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("state", &self.connection_state())
            .field("stopped", &self.inner.control.is_closed())
            .finish_non_exhaustive()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
