//! WebSocket transport built on `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use super::{Connection, Outbound, RemoteEnd, Transport, TransportError, TransportEvent};
use crate::identity::Credential;

/// Query parameter carrying the credential unless configured otherwise.
pub const DEFAULT_TOKEN_PARAM: &str = "token";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens `ws://` / `wss://` connections, passing the credential as a query
/// parameter on the upgrade request.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    token_param: String,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_PARAM)
    }
}

impl WebSocketTransport {
    /// Create a transport that sends the credential under `token_param`.
    #[must_use]
    pub fn new(token_param: impl Into<String>) -> Self {
        Self {
            token_param: token_param.into(),
        }
    }

    /// Build the upgrade URL with the credential attached.
    pub fn connect_url(&self, endpoint: &Url, credential: &Credential) -> Result<Url, TransportError> {
        match endpoint.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(TransportError::InvalidEndpoint(format!(
                    "unsupported scheme `{other}`, expected ws or wss"
                )));
            }
        }

        let mut url = endpoint.clone();
        url.query_pairs_mut()
            .append_pair(&self.token_param, credential.expose());
        Ok(url)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(
        &self,
        endpoint: &Url,
        credential: &Credential,
    ) -> Result<Connection, TransportError> {
        let url = self.connect_url(endpoint, credential)?;

        // The endpoint is logged without the credential-bearing query.
        debug!(
            name: "transport.ws.connecting",
            host = endpoint.host_str().unwrap_or_default(),
            path = endpoint.path(),
            "Opening WebSocket"
        );

        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        info!(
            name: "transport.ws.opened",
            status = response.status().as_u16(),
            "WebSocket connection established"
        );

        let (connection, remote) = Connection::pair();
        tokio::spawn(pump(stream, remote));
        Ok(connection)
    }
}

/// Shuttle frames between the socket and the session until either side ends.
///
/// Always finishes by emitting `Closed`, then drops the socket.
async fn pump(stream: WsStream, mut remote: RemoteEnd) {
    let (mut write, mut read) = stream.split();
    remote.emit(TransportEvent::Opened);

    loop {
        tokio::select! {
            command = remote.recv() => match command {
                Some(Outbound::Frame(payload)) => {
                    if let Err(e) = write.send(Message::Text(payload.into())).await {
                        warn!(name: "transport.ws.send_failed", error = %e, "WebSocket send failed");
                        remote.emit(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
                // Explicit close, or the session dropped its connection.
                Some(Outbound::Close) | None => {
                    if let Err(e) = write.close().await {
                        debug!(name: "transport.ws.close_failed", error = %e, "WebSocket close handshake failed");
                    }
                    break;
                }
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    remote.emit(TransportEvent::Frame(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    remote.emit(TransportEvent::Frame(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(name: "transport.ws.remote_close", frame = ?frame, "Server closed WebSocket");
                    break;
                }
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(name: "transport.ws.read_failed", error = %e, "WebSocket read failed");
                    remote.emit(TransportEvent::Error(e.to_string()));
                    break;
                }
                None => break,
            },
        }
    }

    remote.emit(TransportEvent::Closed);
    info!(name: "transport.ws.closed", "WebSocket connection closed");
}
