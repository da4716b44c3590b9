//! Physical sockets backed by `tokio-tungstenite`.

use std::pin::pin;

use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::traits::{Connector, EventSink, Socket, SocketEvent, Unsent};

/// Opens real WebSocket connections, one background task per socket.
///
/// Must be used from within a tokio runtime.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

/// Writing half of a socket opened by [`WsConnector`].
#[derive(Debug)]
pub struct WsSocket {
    outgoing: Option<mpsc::UnboundedSender<String>>,
}

impl Connector for WsConnector {
    type Socket = WsSocket;

    fn open(&mut self, url: &str, events: EventSink) -> WsSocket {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let url = url.to_owned();

        tokio::spawn(async move {
            run_socket(url, outgoing_rx, events).await;
        });

        WsSocket {
            outgoing: Some(outgoing_tx),
        }
    }
}

impl Socket for WsSocket {
    fn send(&mut self, text: String) -> Result<(), Unsent> {
        match &self.outgoing {
            Some(tx) => tx.send(text).map_err(|e| Unsent(e.0)),
            None => Err(Unsent(text)),
        }
    }

    fn close(&mut self) {
        // Dropping the sender makes the socket task abandon a pending handshake, or send a
        // close frame and exit.
        self.outgoing = None;
    }
}

/// Drive one physical connection, translating its lifetime into [`SocketEvent`]s.
///
/// Always finishes with [`SocketEvent::Close`], preceded by [`SocketEvent::Error`] when
/// the connection failed.
async fn run_socket(
    url: String,
    mut outgoing_rx: mpsc::UnboundedReceiver<String>,
    events: EventSink,
) {
    // Text handed over before the handshake finished; written first once it does.
    let mut early = Vec::new();
    let mut connecting = pin!(connect_async(url.as_str()));

    let connected = loop {
        tokio::select! {
            result = &mut connecting => break result,
            text = outgoing_rx.recv() => match text {
                Some(text) => early.push(text),
                None => {
                    // Closed by the owning connection while the handshake was in flight.
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%url, "Abandoning connection attempt");
                    events.emit(SocketEvent::Close);
                    return;
                }
            },
        }
    };

    let ws_stream = match connected {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(%url, error = %e, "Unable to connect");
            events.emit(SocketEvent::Error(e.to_string()));
            events.emit(SocketEvent::Close);
            return;
        }
    };

    events.emit(SocketEvent::Open);
    let (mut write, mut read) = ws_stream.split();

    for text in early {
        if let Err(e) = write.send(Message::Text(text.into())).await {
            events.emit(SocketEvent::Error(e.to_string()));
            events.emit(SocketEvent::Close);
            return;
        }
    }

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(%text, "Received WebSocket text message");
                        events.emit(SocketEvent::Message(text.to_string()));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        events.emit(SocketEvent::Message(
                            String::from_utf8_lossy(&bytes).into_owned(),
                        ));
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        events.emit(SocketEvent::Error(e.to_string()));
                        break;
                    }
                    Some(Ok(_)) => {
                        // PING/PONG frames are answered by tungstenite itself.
                    }
                }
            }

            text = outgoing_rx.recv() => {
                if let Some(text) = text {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        events.emit(SocketEvent::Error(e.to_string()));
                        break;
                    }
                } else {
                    // Closed by the owning connection.
                    _ = write.close().await;
                    break;
                }
            }
        }
    }

    events.emit(SocketEvent::Close);
}
