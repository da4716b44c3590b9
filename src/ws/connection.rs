#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::collections::VecDeque;
use std::fmt;

use backoff::backoff::Backoff as _;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use url::Url;

use super::config::{Config, ScheduledBackoff};
use super::error::WsError;
use super::traits::{Connector, EventSink, Socket as _, SocketEvent, TaggedEvent, Unsent};
use crate::Result;

/// Broadcast channel capacity for lifecycle events.
const LIFECYCLE_CAPACITY: usize = 64;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// A socket has been opened and is waiting for its handshake
    Connecting,
    /// Successfully connected
    Connected {
        /// When the connection was established
        since: Instant,
    },
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Check if the connection is down, with no socket open or opening.
    #[must_use]
    pub const fn is_disconnected(self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

/// Transitions worth telling listeners about.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection went down, either on request or because the socket failed
    Disconnected,
    /// A socket opened again after one or more automatic reconnect attempts
    Reconnected,
}

/// Identifies a registered message callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type MessageCallback = Box<dyn FnMut(&str) + Send>;

/// A logical connection that survives drops of the physical socket.
///
/// Outbound messages are queued and written in order whenever a socket is open, and an
/// unexpected close schedules a reconnect following the [`ScheduledBackoff`] schedule.
///
/// The type is a state machine without its own task: socket events are fed in through
/// [`ResilientConnection::handle_socket_event`] from the receiver returned by
/// [`ResilientConnection::new`], and a due reconnect is triggered by calling
/// [`ResilientConnection::on_reconnect_due`] once [`ResilientConnection::reconnect_deadline`]
/// passes. The transport worker does both inside its event loop.
pub struct ResilientConnection<C: Connector> {
    connector: C,
    backoff: ScheduledBackoff,
    url: Option<String>,
    state_tx: watch::Sender<ConnectionState>,
    socket: Option<C::Socket>,
    /// Generation of the most recently opened socket
    generation: u64,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
    outbound: VecDeque<String>,
    listeners: Vec<(ListenerId, MessageCallback)>,
    next_listener_id: u64,
    reconnect_at: Option<Instant>,
    /// Set while recovering from an unexpected close, cleared once a socket opens
    reconnecting: bool,
    lifecycle_tx: broadcast::Sender<ConnectionEvent>,
}

impl<C: Connector> ResilientConnection<C> {
    /// Create a disconnected connection.
    ///
    /// The returned receiver yields every event reported by sockets this connection opens;
    /// pass each one back to [`ResilientConnection::handle_socket_event`].
    pub fn new(connector: C, config: Config) -> (Self, mpsc::UnboundedReceiver<TaggedEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (lifecycle_tx, _) = broadcast::channel(LIFECYCLE_CAPACITY);

        let connection = Self {
            connector,
            backoff: config.reconnect.into(),
            url: None,
            state_tx,
            socket: None,
            generation: 0,
            events_tx,
            outbound: VecDeque::new(),
            listeners: Vec::new(),
            next_listener_id: 0,
            reconnect_at: None,
            reconnecting: false,
            lifecycle_tx,
        };

        (connection, events_rx)
    }

    /// Open a socket to `url`.
    ///
    /// Fails if the connection is already connected or connecting: that is a caller bug,
    /// not a transient condition.
    pub fn connect(&mut self, url: &str) -> Result<()> {
        let state = self.state();
        if !state.is_disconnected() {
            return Err(WsError::AlreadyConnected(state).into());
        }
        Url::parse(url)?;

        self.reconnect_at = None;
        self.url = Some(url.to_owned());
        self.open_socket();
        Ok(())
    }

    /// Queue a message and write out the queue if a socket is open.
    pub fn enqueue_message(&mut self, message: String) {
        self.outbound.push_back(message);
        if self.state().is_connected() {
            self.flush();
        }
    }

    /// Close the connection and cancel any pending reconnect.
    ///
    /// Queued messages are kept and go out after the next successful connect.
    pub fn disconnect(&mut self) {
        self.reconnect_at = None;
        self.reconnecting = false;
        self.tear_down();
    }

    /// Register a callback invoked with every inbound text message.
    pub fn register_message_callback<F>(&mut self, callback: F) -> ListenerId
    where
        F: FnMut(&str) + Send + 'static,
    {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(callback)));
        id
    }

    /// Remove a callback. Returns `false` if it was not registered.
    pub fn unregister_message_callback(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener, _)| *listener != id);
        self.listeners.len() != before
    }

    /// Apply an event reported by a socket.
    ///
    /// Events from sockets that were already torn down are ignored, so an error followed by
    /// a close for the same failure only disconnects once.
    pub fn handle_socket_event(&mut self, tagged: TaggedEvent) {
        if tagged.generation != self.generation || self.socket.is_none() {
            #[cfg(feature = "tracing")]
            tracing::trace!(
                generation = tagged.generation,
                current = self.generation,
                event = ?tagged.event,
                "Ignoring event from stale socket"
            );
            return;
        }

        match tagged.event {
            SocketEvent::Open => self.on_open(),
            SocketEvent::Message(text) => {
                for (_, callback) in &mut self.listeners {
                    callback(&text);
                }
            }
            SocketEvent::Error(reason) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%reason, "WebSocket error");
                #[cfg(not(feature = "tracing"))]
                let _ = &reason;
                self.on_unexpected_close();
            }
            SocketEvent::Close => {
                #[cfg(feature = "tracing")]
                tracing::debug!("WebSocket closed by peer");
                self.on_unexpected_close();
            }
        }
    }

    /// When the pending reconnect is due, if one is scheduled.
    #[must_use]
    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Run the pending reconnect attempt.
    pub fn on_reconnect_due(&mut self) {
        if self.reconnect_at.take().is_none() || !self.state().is_disconnected() {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(url = ?self.url, "Attempting reconnect");
        self.open_socket();
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to [`ConnectionEvent`]s.
    #[must_use]
    pub fn lifecycle(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.lifecycle_tx.subscribe()
    }

    /// Number of messages waiting for an open socket.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.outbound.len()
    }

    fn open_socket(&mut self) {
        let Some(url) = self.url.as_deref() else {
            return;
        };

        self.generation += 1;
        let sink = EventSink::new(self.generation, self.events_tx.clone());
        self.socket = Some(self.connector.open(url, sink));
        self.set_state(ConnectionState::Connecting);
    }

    fn on_open(&mut self) {
        self.set_state(ConnectionState::Connected {
            since: Instant::now(),
        });
        self.backoff.reset();

        if self.reconnecting {
            self.reconnecting = false;
            #[cfg(feature = "tracing")]
            tracing::debug!("Reconnected");
            _ = self.lifecycle_tx.send(ConnectionEvent::Reconnected);
        }

        self.flush();
    }

    fn on_unexpected_close(&mut self) {
        self.tear_down();
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_at.is_some() || self.url.is_none() {
            return;
        }

        let wait = self.backoff.next_backoff().unwrap_or_default();
        self.reconnect_at = Some(Instant::now() + wait);
        self.reconnecting = true;

        #[cfg(feature = "tracing")]
        tracing::warn!(?wait, "Connection lost, scheduling reconnect");
    }

    /// Drop the socket and move to `Disconnected`, reporting the transition once.
    fn tear_down(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }

        if self.state().is_disconnected() {
            return;
        }

        self.set_state(ConnectionState::Disconnected);
        _ = self.lifecycle_tx.send(ConnectionEvent::Disconnected);
    }

    fn flush(&mut self) {
        let Some(socket) = self.socket.as_mut() else {
            return;
        };

        while let Some(text) = self.outbound.pop_front() {
            if let Err(Unsent(text)) = socket.send(text) {
                // Socket is failing; its error/close event will follow.
                self.outbound.push_front(text);
                break;
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        #[cfg(feature = "tracing")]
        tracing::debug!(%state, "Connection state changed");
        self.state_tx.send_replace(state);
    }
}

impl<C: Connector> Drop for ResilientConnection<C> {
    fn drop(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
    }
}

impl<C: Connector> fmt::Debug for ResilientConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientConnection")
            .field("url", &self.url)
            .field("state", &self.state())
            .field("generation", &self.generation)
            .field("queued", &self.outbound.len())
            .field("listeners", &self.listeners.len())
            .field("reconnect_at", &self.reconnect_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::ws::traits::Socket;

    /// Everything a scripted socket saw, shared with the test.
    #[derive(Debug, Default)]
    pub(crate) struct Wire {
        pub(crate) urls: Vec<String>,
        pub(crate) sent: Vec<String>,
        pub(crate) closed: usize,
        pub(crate) sinks: Vec<EventSink>,
    }

    /// In-memory connector whose sockets record writes and never open on their own.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct ScriptedConnector {
        pub(crate) wire: Arc<Mutex<Wire>>,
    }

    #[derive(Debug)]
    pub(crate) struct ScriptedSocket {
        wire: Arc<Mutex<Wire>>,
        open: bool,
    }

    impl ScriptedConnector {
        pub(crate) fn sent(&self) -> Vec<String> {
            self.wire.lock().unwrap().sent.clone()
        }

        pub(crate) fn opened(&self) -> usize {
            self.wire.lock().unwrap().urls.len()
        }

        /// Event for the most recently opened socket.
        pub(crate) fn event(&self, event: SocketEvent) -> TaggedEvent {
            let generation = self.wire.lock().unwrap().sinks.last().unwrap().generation();
            TaggedEvent { generation, event }
        }
    }

    impl Connector for ScriptedConnector {
        type Socket = ScriptedSocket;

        fn open(&mut self, url: &str, events: EventSink) -> ScriptedSocket {
            let mut wire = self.wire.lock().unwrap();
            wire.urls.push(url.to_owned());
            wire.sinks.push(events);
            ScriptedSocket {
                wire: Arc::clone(&self.wire),
                open: true,
            }
        }
    }

    impl Socket for ScriptedSocket {
        fn send(&mut self, text: String) -> std::result::Result<(), Unsent> {
            if !self.open {
                return Err(Unsent(text));
            }
            self.wire.lock().unwrap().sent.push(text);
            Ok(())
        }

        fn close(&mut self) {
            self.open = false;
            self.wire.lock().unwrap().closed += 1;
        }
    }
}
