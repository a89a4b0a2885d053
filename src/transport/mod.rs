//! Duplex transport to the assistant backend.
//!
//! A [`Transport`] opens a [`Connection`]: an ordered stream of
//! [`TransportEvent`]s plus a non-blocking outbound side. Implementations
//! drive the real socket from a background task that holds the matching
//! [`RemoteEnd`].
//!
//! # Architecture
//!
//! - [`Connection`]: owned by the session; sends frames, receives events
//! - [`RemoteEnd`]: owned by the transport task (or a test)
//! - [`WebSocketTransport`]: `tokio-tungstenite` implementation
//!
//! # Example
//!
//! ```rust
//! use chatstream::transport::{Connection, Outbound, TransportEvent};
//!
//! # tokio_test_block(async {
//! let (mut conn, mut remote) = Connection::pair();
//! remote.emit(TransportEvent::Opened);
//! conn.send("{\"input\":\"hi\"}".to_string()).unwrap();
//!
//! assert_eq!(conn.next_event().await, Some(TransportEvent::Opened));
//! assert_eq!(
//!     remote.recv().await,
//!     Some(Outbound::Frame("{\"input\":\"hi\"}".to_string()))
//! );
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

mod websocket;

pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

use crate::identity::Credential;

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint address cannot be used by this transport.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Opening the connection failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The connection is gone; nothing can be sent.
    #[error("connection is closed")]
    Disconnected,
}

/// Events delivered by an open connection, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The channel is ready to carry frames.
    Opened,
    /// One inbound text frame.
    Frame(String),
    /// The channel reported a failure. A `Closed` event follows.
    Error(String),
    /// The channel is closed; no further events follow.
    Closed,
}

/// Commands from the session to the transport task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send one text frame.
    Frame(String),
    /// Close the channel.
    Close,
}

/// Session side of an open channel.
#[derive(Debug)]
pub struct Connection {
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Transport side of an open channel.
#[derive(Debug)]
pub struct RemoteEnd {
    outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Connection {
    /// Create a connected pair.
    #[must_use]
    pub fn pair() -> (Connection, RemoteEnd) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Connection {
                outbound: outbound_tx,
                events: events_rx,
            },
            RemoteEnd {
                outbound: outbound_rx,
                events: events_tx,
            },
        )
    }

    /// Queue one frame for sending. Never blocks.
    pub fn send(&self, payload: String) -> Result<(), TransportError> {
        self.outbound
            .send(Outbound::Frame(payload))
            .map_err(|_closed| TransportError::Disconnected)
    }

    /// Ask the transport to close. Safe to call on a dead connection.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    /// Wait for the next event. `None` once the transport task is gone.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Take an already-delivered event without waiting.
    pub fn try_next_event(&mut self) -> Option<TransportEvent> {
        self.events.try_recv().ok()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl RemoteEnd {
    /// Wait for the next outbound command. `None` once the connection is dropped.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Take a queued outbound command without waiting.
    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.outbound.try_recv().ok()
    }

    /// Deliver an event to the session. Returns `false` if nobody is listening.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Whether the session side has been dropped.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.events.is_closed()
    }
}

/// Opens connections to the backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a channel to `endpoint`, attaching `credential` as a connection
    /// parameter. The returned connection reports `Opened` once ready.
    async fn connect(
        &self,
        endpoint: &Url,
        credential: &Credential,
    ) -> Result<Connection, TransportError>;
}
