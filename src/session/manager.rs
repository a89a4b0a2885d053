//! Streaming session manager.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use super::transcript::{ChunkOutcome, Message, Transcript};
use crate::identity::{IdentityError, IdentityProvider};
use crate::transport::{Connection, Transport, TransportError, TransportEvent};
use crate::wire::{FrameError, InboundFrame, OutboundFrame, Terminators};

/// Shown when a message is submitted without an open connection.
pub const UNAVAILABLE_NOTICE: &str = "Sorry, I'm not connected at the moment.";

/// Shown when an inbound frame cannot be decoded.
pub const PARSE_FAILURE_NOTICE: &str = "Error: Failed to parse message from server.";

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, `connect()` not yet called.
    Disconnected,
    /// Fetching a credential or waiting for the transport to open.
    Connecting,
    /// Frames can flow.
    Open,
    /// Closed by either side. Terminal.
    Closed,
    /// Connecting failed. Terminal.
    Failed,
}

impl SessionState {
    /// Whether no further transitions (other than `close()`) can happen.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Session errors.
///
/// `MalformedFrame` and `RemoteError` never reach callers; they are logged and
/// shown in the transcript.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No credential could be obtained; no connection was attempted.
    #[error("authentication unavailable: {0}")]
    AuthUnavailable(#[source] IdentityError),

    /// The transport could not be opened.
    #[error("failed to connect: {0}")]
    ConnectFailed(#[source] TransportError),

    /// A message was submitted while the session was not open.
    #[error("transport unavailable (session is {0})")]
    TransportUnavailable(SessionState),

    /// An inbound frame could not be decoded.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] FrameError),

    /// The backend reported an error for the current turn.
    #[error("remote error: {0}")]
    RemoteError(String),

    /// The operation is not valid in the current state.
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// State at the time of the call.
        state: SessionState,
    },
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Tunables for a session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Chunk values that end a turn.
    pub terminators: Terminators,
}

/// Read-only view of a session for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Connection state.
    pub state: SessionState,
    /// Whether a response is pending.
    pub typing: bool,
    /// Transcript in display order.
    pub messages: Vec<Message>,
}

/// Owns one backend connection and the transcript it feeds.
///
/// Every mutation goes through `&mut self`: local calls ([`submit`],
/// [`close`]) and transport events ([`handle_event`]) are applied one at a
/// time, in order.
///
/// [`submit`]: SessionManager::submit
/// [`close`]: SessionManager::close
/// [`handle_event`]: SessionManager::handle_event
pub struct SessionManager {
    id: Uuid,
    endpoint: Url,
    identity: Arc<dyn IdentityProvider>,
    transport: Arc<dyn Transport>,
    options: SessionOptions,
    state: SessionState,
    typing: bool,
    transcript: Transcript,
    connection: Option<Connection>,
    updates: watch::Sender<SessionSnapshot>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint.as_str())
            .field("state", &self.state)
            .field("typing", &self.typing)
            .field("messages", &self.transcript.len())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a disconnected session with default options.
    #[must_use]
    pub fn new(
        endpoint: Url,
        identity: Arc<dyn IdentityProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::with_options(endpoint, identity, transport, SessionOptions::default())
    }

    /// Create a disconnected session.
    #[must_use]
    pub fn with_options(
        endpoint: Url,
        identity: Arc<dyn IdentityProvider>,
        transport: Arc<dyn Transport>,
        options: SessionOptions,
    ) -> Self {
        let (updates, _) = watch::channel(SessionSnapshot {
            state: SessionState::Disconnected,
            typing: false,
            messages: Vec::new(),
        });

        Self {
            id: Uuid::new_v4(),
            endpoint,
            identity,
            transport,
            options,
            state: SessionState::Disconnected,
            typing: false,
            transcript: Transcript::new(),
            connection: None,
            updates,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read side
    // ─────────────────────────────────────────────────────────────────────────

    /// Unique id, attached to every log event of this session.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a response is pending.
    #[must_use]
    pub fn is_typing(&self) -> bool {
        self.typing
    }

    /// Transcript in display order.
    #[must_use]
    pub fn transcript(&self) -> &[Message] {
        self.transcript.messages()
    }

    /// Owned copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            typing: self.typing,
            messages: self.transcript.messages().to_vec(),
        }
    }

    /// Receive a fresh snapshot after every change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        // Snapshots are not built while nobody listens, so the stored one may
        // be stale.
        if self.updates.receiver_count() == 0 {
            self.updates.send_replace(self.snapshot());
        }
        self.updates.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch a credential and open the transport.
    ///
    /// Returns once the transport has accepted the connection; the session
    /// becomes `Open` when the transport's `Opened` event is handled (see
    /// [`wait_until_open`](Self::wait_until_open)). Only valid from
    /// `Disconnected`, so at most one attempt is ever in flight.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != SessionState::Disconnected {
            return Err(SessionError::InvalidState {
                operation: "connect",
                state: self.state,
            });
        }

        self.set_state(SessionState::Connecting);
        info!(
            name: "session.connect.started",
            session_id = %self.id,
            endpoint = %self.endpoint.host_str().unwrap_or_default(),
            "Connecting session"
        );

        let credential = match self.identity.get_credential().await {
            Ok(credential) => credential,
            Err(e) => {
                warn!(
                    name: "session.connect.auth_unavailable",
                    session_id = %self.id,
                    error = %e,
                    "No credential available, not connecting"
                );
                self.set_state(SessionState::Failed);
                return Err(SessionError::AuthUnavailable(e));
            }
        };

        match self.transport.connect(&self.endpoint, &credential).await {
            Ok(connection) => {
                // close() may not run while we were awaiting (&mut self), so
                // the state is still Connecting here.
                self.connection = Some(connection);
                Ok(())
            }
            Err(e) => {
                error!(
                    name: "session.connect.failed",
                    session_id = %self.id,
                    error = %e,
                    "Transport failed to open"
                );
                self.set_state(SessionState::Failed);
                Err(SessionError::ConnectFailed(e))
            }
        }
    }

    /// Handle transport events until the session leaves `Connecting`.
    pub async fn wait_until_open(&mut self) -> Result<()> {
        while self.state == SessionState::Connecting {
            match self.next_event().await {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }

        match self.state {
            SessionState::Open => Ok(()),
            SessionState::Failed => Err(SessionError::ConnectFailed(TransportError::Connect(
                "connection closed before opening".into(),
            ))),
            state => Err(SessionError::InvalidState {
                operation: "wait for open",
                state,
            }),
        }
    }

    /// Wait for the next transport event.
    ///
    /// Returns `None` when there is no connection. A transport that vanishes
    /// without reporting `Closed` yields one synthesized `Closed`.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        let connection = self.connection.as_mut()?;
        Some(
            connection
                .next_event()
                .await
                .unwrap_or(TransportEvent::Closed),
        )
    }

    /// Handle events until the connection is gone.
    pub async fn run_until_closed(&mut self) {
        while let Some(event) = self.next_event().await {
            self.handle_event(event);
        }
    }

    /// Close the session. Idempotent; releases the connection if held.
    pub fn close(&mut self) {
        let had_connection = self.release_connection();
        if self.state == SessionState::Closed && !had_connection {
            return;
        }

        info!(
            name: "session.closed",
            session_id = %self.id,
            from = %self.state,
            "Session closed"
        );
        self.typing = false;
        self.state = SessionState::Closed;
        self.publish();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Submit user text.
    ///
    /// Blank text is ignored. Otherwise the text is recorded as a user message
    /// and sent as exactly one frame. If the session is not open, an
    /// unavailability notice is appended and `TransportUnavailable` returned;
    /// the session stays usable.
    pub fn submit(&mut self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }

        let turn = self.transcript.begin_turn(text);
        self.typing = true;

        let sent = match (&self.connection, self.state) {
            (Some(connection), SessionState::Open) => connection
                .send(OutboundFrame::new(text).encode())
                .is_ok(),
            _ => false,
        };

        if sent {
            debug!(
                name: "session.submit.sent",
                session_id = %self.id,
                turn,
                chars = text.chars().count(),
                "Message sent"
            );
            self.publish();
            return Ok(());
        }

        warn!(
            name: "session.submit.unavailable",
            session_id = %self.id,
            state = %self.state,
            "Not connected, message not sent"
        );
        self.transcript.push_notice(UNAVAILABLE_NOTICE);
        self.transcript.complete_turn();
        self.typing = false;
        self.publish();
        Err(SessionError::TransportUnavailable(self.state))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply one transport event.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                if self.state == SessionState::Connecting {
                    info!(name: "session.opened", session_id = %self.id, "Session open");
                    self.set_state(SessionState::Open);
                } else {
                    debug!(name: "session.opened.ignored", session_id = %self.id, state = %self.state, "Ignoring open event");
                }
            }
            TransportEvent::Frame(raw) => {
                if self.state == SessionState::Open {
                    self.on_frame(&raw);
                } else {
                    debug!(name: "session.frame.ignored", session_id = %self.id, state = %self.state, "Ignoring frame outside open state");
                }
            }
            TransportEvent::Error(cause) => {
                warn!(name: "session.transport.error", session_id = %self.id, state = %self.state, cause = %cause, "Transport error");
                if self.state == SessionState::Connecting {
                    self.release_connection();
                    self.set_state(SessionState::Failed);
                }
            }
            TransportEvent::Closed => {
                self.release_connection();
                let next = match self.state {
                    SessionState::Open => SessionState::Closed,
                    SessionState::Connecting => SessionState::Failed,
                    other => other,
                };
                info!(name: "session.transport.closed", session_id = %self.id, state = %next, "Transport closed");
                self.typing = false;
                self.set_state(next);
            }
        }
    }

    /// Apply one inbound frame to the transcript.
    ///
    /// Decoding failures never propagate: they become a transcript notice and
    /// the session stays open.
    pub fn on_frame(&mut self, raw: &str) {
        let frame = match InboundFrame::decode(raw, &self.options.terminators) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(name: "session.frame.empty", session_id = %self.id, "Ignoring empty frame");
                return;
            }
            Err(e) => {
                let err = SessionError::MalformedFrame(e);
                warn!(name: "session.frame.malformed", session_id = %self.id, error = %err, raw = %raw, "Failed to decode frame");
                self.transcript.push_notice(PARSE_FAILURE_NOTICE);
                self.typing = false;
                self.publish();
                return;
            }
        };

        match frame {
            InboundFrame::Chunk(text) => match self.transcript.append_chunk(&text) {
                ChunkOutcome::Dropped => {
                    warn!(name: "session.frame.dropped", session_id = %self.id, chars = text.chars().count(), "Fragment outside an open turn dropped");
                    return;
                }
                ChunkOutcome::Empty => return,
                ChunkOutcome::Started(index) | ChunkOutcome::Appended(index) => {
                    debug!(name: "session.frame.chunk", session_id = %self.id, index, "Fragment appended");
                }
            },
            InboundFrame::Done => {
                let was_open = self.transcript.complete_turn();
                if !was_open && !self.typing {
                    return;
                }
                debug!(name: "session.turn.completed", session_id = %self.id, "Turn complete");
                self.typing = false;
            }
            InboundFrame::Error(message) => {
                self.transcript.push_notice(format!("Error: {message}"));
                let err = SessionError::RemoteError(message);
                warn!(name: "session.frame.remote_error", session_id = %self.id, error = %err, "Backend reported an error");
                self.transcript.complete_turn();
                self.typing = false;
            }
        }

        self.publish();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(name: "session.state.changed", session_id = %self.id, from = %self.state, to = %state, "State changed");
            self.state = state;
        }
        self.publish();
    }

    /// Drop the connection; dropping it asks the transport to close. Returns
    /// whether one was held.
    fn release_connection(&mut self) -> bool {
        self.connection.take().is_some()
    }

    fn publish(&self) {
        if self.updates.receiver_count() > 0 {
            self.updates.send_replace(self.snapshot());
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if self.release_connection() {
            debug!(name: "session.dropped", session_id = %self.id, "Connection released on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Credential, StaticToken};
    use crate::transport::{Outbound, RemoteEnd};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Hands out pre-built connections and keeps the remote ends for the test.
    #[derive(Default)]
    struct PairTransport {
        open_immediately: bool,
        remotes: Mutex<Vec<RemoteEnd>>,
    }

    #[async_trait]
    impl Transport for PairTransport {
        async fn connect(
            &self,
            _endpoint: &Url,
            _credential: &Credential,
        ) -> std::result::Result<Connection, TransportError> {
            let (connection, remote) = Connection::pair();
            if self.open_immediately {
                remote.emit(TransportEvent::Opened);
            }
            self.remotes.lock().unwrap().push(remote);
            Ok(connection)
        }
    }

    fn manager(transport: Arc<PairTransport>) -> SessionManager {
        SessionManager::new(
            Url::parse("ws://localhost/chat").unwrap(),
            Arc::new(StaticToken::new("token")),
            transport,
        )
    }

    async fn open_manager() -> (SessionManager, RemoteEnd) {
        let transport = Arc::new(PairTransport {
            open_immediately: true,
            ..Default::default()
        });
        let mut session = manager(Arc::clone(&transport));
        session.connect().await.unwrap();
        session.wait_until_open().await.unwrap();
        let remote = transport.remotes.lock().unwrap().pop().unwrap();
        (session, remote)
    }

    #[tokio::test]
    async fn test_connect_then_open() {
        let (session, _remote) = open_manager().await;
        assert_eq!(session.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let (mut session, _remote) = open_manager().await;
        let err = session.connect().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                operation: "connect",
                state: SessionState::Open
            }
        ));
    }

    #[tokio::test]
    async fn test_submit_sends_one_frame() {
        let (mut session, mut remote) = open_manager().await;

        session.submit("hi").unwrap();
        assert!(session.is_typing());
        assert_eq!(
            remote.try_recv(),
            Some(Outbound::Frame(r#"{"input":"hi"}"#.to_string()))
        );
        assert_eq!(remote.try_recv(), None);
    }

    #[tokio::test]
    async fn test_submit_when_remote_gone_reports_unavailable() {
        let (mut session, remote) = open_manager().await;
        drop(remote);

        let err = session.submit("hi").unwrap_err();
        assert!(matches!(
            err,
            SessionError::TransportUnavailable(SessionState::Open)
        ));
        assert_eq!(session.transcript().len(), 2);
        assert_eq!(session.transcript()[1].content, UNAVAILABLE_NOTICE);
        assert!(!session.is_typing());
    }

    #[tokio::test]
    async fn test_frames_before_open_are_ignored() {
        let transport = Arc::new(PairTransport::default());
        let mut session = manager(Arc::clone(&transport));
        session.connect().await.unwrap();
        assert_eq!(session.state(), SessionState::Connecting);

        session.handle_event(TransportEvent::Frame(r#"{"chunk":"x"}"#.into()));
        assert!(session.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_error_while_connecting_fails() {
        let transport = Arc::new(PairTransport::default());
        let mut session = manager(Arc::clone(&transport));
        session.connect().await.unwrap();

        {
            let remotes = transport.remotes.lock().unwrap();
            remotes[0].emit(TransportEvent::Error("refused".into()));
        }
        assert!(matches!(
            session.wait_until_open().await,
            Err(SessionError::ConnectFailed(_))
        ));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_close_while_connecting_fails() {
        let transport = Arc::new(PairTransport::default());
        let mut session = manager(Arc::clone(&transport));
        session.connect().await.unwrap();

        {
            let remotes = transport.remotes.lock().unwrap();
            remotes[0].emit(TransportEvent::Closed);
        }
        assert!(matches!(
            session.wait_until_open().await,
            Err(SessionError::ConnectFailed(_))
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_transport_gone_while_connecting_fails() {
        let transport = Arc::new(PairTransport::default());
        let mut session = manager(Arc::clone(&transport));
        session.connect().await.unwrap();
        transport.remotes.lock().unwrap().clear();

        assert!(session.wait_until_open().await.is_err());
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_remote_close_clears_typing() {
        let (mut session, remote) = open_manager().await;
        session.submit("hi").unwrap();

        remote.emit(TransportEvent::Closed);
        session.run_until_closed().await;

        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_typing());
        assert!(session.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_vanished_transport_synthesizes_close() {
        let (mut session, remote) = open_manager().await;
        drop(remote);

        assert_eq!(session.next_event().await, Some(TransportEvent::Closed));
    }

    #[tokio::test]
    async fn test_close_releases_connection() {
        let (mut session, mut remote) = open_manager().await;
        session.close();

        assert_eq!(remote.recv().await, Some(Outbound::Close));
        assert_eq!(remote.recv().await, None);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_drop_releases_connection() {
        let (session, mut remote) = open_manager().await;
        drop(session);

        assert_eq!(remote.recv().await, Some(Outbound::Close));
        assert!(remote.is_detached());
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let (mut session, _remote) = open_manager().await;
        let mut updates = session.subscribe();

        session.submit("hi").unwrap();
        session.on_frame(r#"{"chunk":"Hello"}"#);

        assert!(updates.has_changed().unwrap());
        let snapshot = updates.borrow_and_update().clone();
        assert_eq!(snapshot.state, SessionState::Open);
        assert!(snapshot.typing);
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[1].content, "Hello");
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_current_state() {
        let (mut session, _remote) = open_manager().await;
        session.submit("hi").unwrap();
        session.on_frame(r#"{"chunk":"Hel"}"#);

        let updates = session.subscribe();
        assert_eq!(*updates.borrow(), session.snapshot());
        drop(updates);

        session.on_frame(r#"{"chunk":"lo"}"#);
        session.on_frame(r#"{"chunk":"[DONE]"}"#);

        let updates = session.subscribe();
        let snapshot = updates.borrow().clone();
        assert!(!snapshot.typing);
        assert_eq!(snapshot.messages[1].content, "Hello");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Connecting.to_string(), "connecting");
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Open.is_terminal());
    }
}
