//! The isolated context that owns the connection and the batcher.
//!
//! Everything in here runs on a single task: commands, socket events, inbound messages and
//! timers are handled one at a time, so no state is shared or locked.

use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, sleep_until};

use super::notify::DropWarning;
use super::router::{InboundRouter, OutboundRouter};
use super::types::request::Command;
use super::types::response::TransportEvent;
use crate::Result;
use crate::batch::{BatchingStrategy, MessageBatcher};
use crate::ws::{ConnectionEvent, Connector, ResilientConnection, TaggedEvent};

/// Messages from the facade to the worker.
pub(crate) enum Control {
    Command(Command),
    /// An in-process strategy, which has no wire form
    Strategy(Box<dyn BatchingStrategy>),
    Shutdown,
}

pub(crate) struct Worker<C: Connector> {
    connection: ResilientConnection<C>,
    batcher: MessageBatcher,
    socket_events: mpsc::UnboundedReceiver<TaggedEvent>,
    inbound: mpsc::UnboundedReceiver<String>,
    lifecycle: broadcast::Receiver<ConnectionEvent>,
    control: mpsc::UnboundedReceiver<Control>,
    events: broadcast::Sender<TransportEvent>,
    drop_warning: DropWarning,
}

impl<C: Connector> Worker<C> {
    pub(crate) fn new(
        mut connection: ResilientConnection<C>,
        socket_events: mpsc::UnboundedReceiver<TaggedEvent>,
        batcher: MessageBatcher,
        control: mpsc::UnboundedReceiver<Control>,
        events: broadcast::Sender<TransportEvent>,
        drop_warning: DropWarning,
    ) -> Self {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        connection.register_message_callback(move |text: &str| {
            _ = inbound_tx.send(text.to_owned());
        });
        let lifecycle = connection.lifecycle();

        Self {
            connection,
            batcher,
            socket_events,
            inbound,
            lifecycle,
            control,
            events,
            drop_warning,
        }
    }

    /// Run until shutdown, or until a caller error makes the context unusable.
    pub(crate) async fn run(mut self) -> Result<()> {
        let result = self.run_inner().await;

        #[cfg(feature = "tracing")]
        if let Err(e) = &result {
            tracing::error!(error = %e, "Transport worker stopped");
        }

        self.connection.disconnect();
        result
    }

    async fn run_inner(&mut self) -> Result<()> {
        loop {
            let reconnect_at = self.connection.reconnect_deadline();
            let batch_at = self.batcher.deadline();

            tokio::select! {
                control = self.control.recv() => match control {
                    Some(Control::Command(command)) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(?command, "Applying command");
                        if let Some(event) =
                            OutboundRouter::route(command, &mut self.connection, &mut self.batcher)?
                        {
                            self.emit(event);
                        }
                    }
                    Some(Control::Strategy(strategy)) => {
                        self.batcher.set_batching_strategy(strategy);
                    }
                    Some(Control::Shutdown) | None => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Transport worker shutting down");
                        return Ok(());
                    }
                },
                Some(event) = self.socket_events.recv() => {
                    self.connection.handle_socket_event(event);
                }
                Some(raw) = self.inbound.recv() => self.route_inbound(&raw),
                lifecycle = self.lifecycle.recv() => match lifecycle {
                    Ok(ConnectionEvent::Reconnected) => self.emit(TransportEvent::Reconnected),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(count, "Missed connection lifecycle events");
                        #[cfg(not(feature = "tracing"))]
                        let _ = count;
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },
                () = wait_until(reconnect_at) => self.connection.on_reconnect_due(),
                () = wait_until(batch_at) => {
                    if let Some(batch) = self.batcher.flush_due() {
                        self.emit(TransportEvent::Batch { batch });
                    }
                }
            }
        }
    }

    /// Route one inbound frame. A frame the strategy cannot key is logged and dropped: it
    /// comes from the remote peer, not from a caller bug.
    fn route_inbound(&mut self, raw: &str) {
        match InboundRouter::route(&mut self.batcher, raw) {
            Ok(Some(event)) => self.emit(event),
            Ok(None) => {}
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %e, message = %raw, "Dropping inbound message");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    fn emit(&self, event: TransportEvent) {
        if let TransportEvent::Batch { batch } = &event {
            #[cfg(feature = "tracing")]
            tracing::trace!(messages = batch.len(), dropped = batch.dropped, "Emitting batch");
            self.drop_warning.observe(batch);
        }

        // No listeners is fine: events are fire-and-forget.
        _ = self.events.send(event);
    }
}

/// Completes at `at`, or never when nothing is scheduled.
async fn wait_until(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{Value, json};
    use tokio::task::JoinHandle;
    use tokio::time::{advance, timeout};

    use super::*;
    use crate::batch::{KeyExpr, Predicate, SerializedStrategy};
    use crate::error::Kind;
    use crate::transport::notify::LogNotifier;
    use crate::ws::SocketEvent;
    use crate::ws::config::Config;
    use crate::ws::connection::testing::ScriptedConnector;

    const URL: &str = "wss://telemetry.example.com/realtime";

    struct Harness {
        connector: ScriptedConnector,
        control: mpsc::UnboundedSender<Control>,
        events: broadcast::Receiver<TransportEvent>,
        handle: JoinHandle<Result<()>>,
    }

    impl Harness {
        fn spawn() -> Self {
            let connector = ScriptedConnector::default();
            let (connection, socket_events) =
                ResilientConnection::new(connector.clone(), Config::default());
            let (control_tx, control_rx) = mpsc::unbounded_channel();
            let (events_tx, events) = broadcast::channel(64);
            let drop_warning = DropWarning::new(LogNotifier, "dropped".to_owned(), None);

            let worker = Worker::new(
                connection,
                socket_events,
                MessageBatcher::default(),
                control_rx,
                events_tx,
                drop_warning,
            );

            Self {
                connector,
                control: control_tx,
                events,
                handle: tokio::spawn(worker.run()),
            }
        }

        fn command(&self, command: Command) {
            self.control.send(Control::Command(command)).unwrap();
        }

        fn socket(&self, event: SocketEvent) {
            let sink = self.connector.wire.lock().unwrap().sinks.last().cloned().unwrap();
            sink.emit(event);
        }

        async fn settle(&self) {
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
        }

        async fn next(&mut self) -> TransportEvent {
            timeout(Duration::from_secs(60), self.events.recv())
                .await
                .unwrap()
                .unwrap()
        }
    }

    fn by_id() -> Command {
        Command::SetBatchingStrategy {
            serialized_strategy: SerializedStrategy::new(
                Predicate::exists("/id"),
                KeyExpr::field("/id"),
            ),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_messages_are_routed_in_order() {
        let mut harness = Harness::spawn();
        harness.command(by_id());
        harness.command(Command::Connect { url: URL.to_owned() });
        harness.settle().await;
        harness.socket(SocketEvent::Open);

        harness.command(Command::ReadyForNextBatch);
        harness.settle().await;
        harness.socket(SocketEvent::Message(r#"{"kind":"ping"}"#.to_owned()));
        harness.socket(SocketEvent::Message(r#"{"id":"a","v":1}"#.to_owned()));

        assert_eq!(
            harness.next().await,
            TransportEvent::Message {
                message: json!({ "kind": "ping" })
            }
        );
        let batch = harness.next().await;
        assert_eq!(batch.as_batch().unwrap().get("a").unwrap(), [json!({ "id": "a", "v": 1 })]);
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_batch_is_flushed_by_the_timer() {
        let mut harness = Harness::spawn();
        harness.command(by_id());
        harness.command(Command::Connect { url: URL.to_owned() });
        harness.settle().await;
        harness.socket(SocketEvent::Open);
        harness.command(Command::ReadyForNextBatch);
        harness.settle().await;

        harness.socket(SocketEvent::Message(r#"{"id":"a"}"#.to_owned()));
        let first = harness.next().await;
        assert_eq!(first.as_batch().unwrap().len(), 1);

        harness.command(Command::ReadyForNextBatch);
        harness.settle().await;
        harness.socket(SocketEvent::Message(r#"{"id":"b"}"#.to_owned()));
        harness.socket(SocketEvent::Message(r#"{"id":"b"}"#.to_owned()));
        harness.settle().await;
        assert!(harness.events.is_empty(), "held back by the throttle");

        let start = Instant::now();
        let second = harness.next().await;
        assert_eq!(second.as_batch().unwrap().get("b").unwrap().len(), 2);
        assert!(Instant::now() > start);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_is_reported_to_the_host() {
        let mut harness = Harness::spawn();
        harness.command(Command::Connect { url: URL.to_owned() });
        harness.settle().await;
        harness.socket(SocketEvent::Open);
        harness.socket(SocketEvent::Error("reset".to_owned()));
        harness.socket(SocketEvent::Close);
        harness.settle().await;
        assert_eq!(harness.connector.opened(), 1);

        advance(Duration::from_secs(1)).await;
        harness.settle().await;
        assert_eq!(harness.connector.opened(), 2);

        harness.command(Command::Message {
            message: "after".to_owned(),
        });
        harness.settle().await;
        harness.socket(SocketEvent::Open);

        assert_eq!(harness.next().await, TransportEvent::Reconnected);
        assert_eq!(harness.connector.sent(), ["after"]);
    }

    #[tokio::test(start_paused = true)]
    async fn double_connect_stops_the_worker() {
        let harness = Harness::spawn();
        harness.command(Command::Connect { url: URL.to_owned() });
        harness.command(Command::Connect { url: URL.to_owned() });

        let err = harness.handle.await.unwrap().unwrap_err();

        assert_eq!(err.kind(), Kind::Validation);
        assert!(harness.control.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn unkeyed_inbound_message_is_dropped_and_worker_keeps_running() {
        let mut harness = Harness::spawn();
        harness.command(Command::SetBatchingStrategy {
            serialized_strategy: SerializedStrategy::new(Predicate::Always, KeyExpr::field("/id")),
        });
        harness.command(Command::Connect { url: URL.to_owned() });
        harness.settle().await;
        harness.socket(SocketEvent::Open);
        harness.command(Command::ReadyForNextBatch);
        harness.settle().await;

        harness.socket(SocketEvent::Message(r#"{"v":1}"#.to_owned()));
        harness.settle().await;
        assert!(!harness.handle.is_finished());

        harness.command(Command::Message {
            message: "still here".to_owned(),
        });
        harness.socket(SocketEvent::Message(r#"{"id":"a","v":2}"#.to_owned()));

        let batch = harness.next().await;
        assert_eq!(batch.as_batch().unwrap().get("a").unwrap(), [json!({ "id": "a", "v": 2 })]);
        harness.settle().await;
        assert_eq!(harness.connector.sent(), ["still here"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_disconnects() {
        let harness = Harness::spawn();
        harness.command(Command::Connect { url: URL.to_owned() });
        harness.control.send(Control::Shutdown).unwrap();

        harness.handle.await.unwrap().unwrap();

        assert_eq!(harness.connector.wire.lock().unwrap().closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_json_text_is_delivered_as_a_string() {
        let mut harness = Harness::spawn();
        harness.command(Command::Connect { url: URL.to_owned() });
        harness.settle().await;
        harness.socket(SocketEvent::Open);
        harness.socket(SocketEvent::Message("plain text".to_owned()));

        assert_eq!(
            harness.next().await.as_message(),
            Some(&Value::String("plain text".to_owned()))
        );
    }
}
