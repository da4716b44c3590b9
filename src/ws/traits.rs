//! Seams between the resilient connection and the physical socket.
//!
//! A [`Connector`] opens sockets without blocking: the returned [`Socket`] accepts
//! outbound text right away, while open/message/error/close notifications arrive later
//! through the [`EventSink`] handed to [`Connector::open`]. This mirrors how a browser
//! WebSocket behaves and lets the connection be driven by scripted sockets in tests.

use tokio::sync::mpsc;

/// Something that happened on a physical socket.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// The socket finished its handshake and can carry traffic
    Open,
    /// A text frame arrived
    Message(String),
    /// The socket failed; usually followed by [`SocketEvent::Close`]
    Error(String),
    /// The socket closed, cleanly or not
    Close,
}

/// A [`SocketEvent`] tagged with the generation of the socket that produced it.
///
/// Each opened socket gets a fresh generation so late events from a replaced socket
/// can be told apart from events of the live one.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEvent {
    pub generation: u64,
    pub event: SocketEvent,
}

/// Sending half used by a socket to report its events.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSink {
    #[must_use]
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { generation, tx }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Events reported after the connection is gone are discarded.
    pub fn emit(&self, event: SocketEvent) {
        _ = self.tx.send(TaggedEvent {
            generation: self.generation,
            event,
        });
    }
}

/// Outbound text that a socket could not accept.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsent(pub String);

/// Writing half of a physical socket.
pub trait Socket: Send + 'static {
    /// Hand a text frame to the socket. On failure the text is returned so it can stay queued.
    fn send(&mut self, text: String) -> Result<(), Unsent>;

    /// Close the socket. Must not block.
    fn close(&mut self);
}

/// Opens physical sockets.
pub trait Connector: Send + 'static {
    type Socket: Socket;

    /// Begin opening a socket to `url` and return immediately.
    fn open(&mut self, url: &str, events: EventSink) -> Self::Socket;
}
