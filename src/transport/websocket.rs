//! WebSocket transport.
//!
//! Carries channel frames over a WebSocket when Host and Client run in
//! separate processes. The origin of the remote side is fixed when the
//! socket is established:
//!
//! - server side ([`PendingServer::accept`]): the `Origin` header of the
//!   upgrade request;
//! - client side ([`WebSocketTransport::connect`]): the origin of the URL
//!   that was dialed.
//!
//! # Connection Flow
//!
//! 1. Host binds a server to `localhost:0` (random port)
//! 2. The embedded side connects, sending its `Origin`
//! 3. Host wraps the socket and runs the handshake over it

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as UpgradeRequest, Response as UpgradeResponse,
};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};

use super::{InboundFrame, OutboundFrame, Transport};

// ============================================================================
// Constants
// ============================================================================

/// Timeout for waiting for the embedded side to connect.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Origin reported when the upgrade request carried none. Never matches.
const OPAQUE_ORIGIN: &str = "null";

// ============================================================================
// WebSocketTransport
// ============================================================================

/// Frame transport over an established WebSocket.
pub struct WebSocketTransport<S> {
    stream: WebSocketStream<S>,
    peer_origin: String,
}

impl<S> std::fmt::Debug for WebSocketTransport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("peer_origin", &self.peer_origin)
            .finish_non_exhaustive()
    }
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps an established stream whose remote side has `peer_origin`.
    #[must_use]
    pub fn new(stream: WebSocketStream<S>, peer_origin: impl Into<String>) -> Self {
        Self {
            stream,
            peer_origin: peer_origin.into(),
        }
    }

    /// Returns the origin of the remote side.
    #[inline]
    #[must_use]
    pub fn peer_origin(&self) -> &str {
        &self.peer_origin
    }
}

impl WebSocketTransport<MaybeTlsStream<TcpStream>> {
    /// Connects to `url`, presenting `local_origin` in the `Origin` header.
    ///
    /// The peer origin is the origin of `url`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidOrigin`] if `url` or `local_origin` is unusable
    /// - [`Error::WebSocket`] if the connection or upgrade fails
    pub async fn connect(url: &str, local_origin: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| Error::invalid_origin(url, e.to_string()))?;
        let peer_origin = parsed.origin();
        if !peer_origin.is_tuple() {
            return Err(Error::invalid_origin(url, "URL has an opaque origin"));
        }

        let mut request = url.into_client_request()?;
        let header = HeaderValue::from_str(local_origin)
            .map_err(|e| Error::invalid_origin(local_origin, e.to_string()))?;
        request.headers_mut().insert("Origin", header);

        let (stream, _) = tokio_tungstenite::connect_async(request).await?;
        debug!(%url, "WebSocket connected");

        Ok(Self::new(stream, peer_origin.ascii_serialization()))
    }
}

#[async_trait]
impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, frame: OutboundFrame) -> Result<()> {
        if frame.target_origin != self.peer_origin {
            trace!(
                target_origin = %frame.target_origin,
                peer_origin = %self.peer_origin,
                "Dropping frame for non-matching target origin"
            );
            return Ok(());
        }

        self.stream.send(Message::Text(frame.data.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<InboundFrame> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(InboundFrame::new(
                        self.peer_origin.clone(),
                        text.as_str().to_owned(),
                    ));
                }

                Some(Ok(Message::Close(_))) => {
                    debug!("WebSocket closed by remote");
                    return None;
                }

                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    return None;
                }

                None => {
                    debug!("WebSocket stream ended");
                    return None;
                }

                // Ignore Binary, Ping, Pong
                Some(Ok(_)) => {}
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

// ============================================================================
// PendingServer
// ============================================================================

/// A WebSocket server that is bound but not yet connected.
///
/// # Example
///
/// ```ignore
/// use std::net::{IpAddr, Ipv4Addr};
/// use frame_channel::transport::PendingServer;
///
/// let server = PendingServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?;
/// let ws_url = server.ws_url();
///
/// // Hand ws_url to the embedded side...
///
/// let transport = server.accept().await?;
/// ```
pub struct PendingServer {
    /// TCP listener for incoming connections.
    listener: TcpListener,
    /// Address the listener is bound to.
    addr: SocketAddr,
}

impl PendingServer {
    /// Binds a WebSocket server to the specified address and port.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(ip: IpAddr, port: u16) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(ip, port)).await?;
        let addr = listener.local_addr()?;

        debug!(%addr, "WebSocket server bound");

        Ok(Self { listener, addr })
    }

    /// Returns the port the server is bound to.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Returns the WebSocket URL for this server.
    ///
    /// Format: `ws://{ip}:{port}`, with IPv6 addresses bracketed.
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Returns the local socket address.
    #[inline]
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Accepts one connection and upgrades it, recording its `Origin`.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if nothing connects within 30s or the upgrade fails
    /// - [`Error::Io`] if accepting the TCP connection fails
    pub async fn accept(self) -> Result<WebSocketTransport<TcpStream>> {
        let (stream, addr) = timeout(CONNECTION_TIMEOUT, self.listener.accept())
            .await
            .map_err(|_| {
                Error::connection(format!(
                    "no connection within {}ms",
                    CONNECTION_TIMEOUT.as_millis()
                ))
            })??;

        debug!(?addr, "TCP connection accepted");

        let captured = Arc::new(Mutex::new(None::<String>));
        let slot = Arc::clone(&captured);
        let callback = move |request: &UpgradeRequest,
                             response: UpgradeResponse|
              -> std::result::Result<UpgradeResponse, ErrorResponse> {
            *slot.lock() = request
                .headers()
                .get("origin")
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            Ok(response)
        };

        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        let peer_origin = captured
            .lock()
            .take()
            .unwrap_or_else(|| OPAQUE_ORIGIN.to_string());

        info!(addr = %self.addr, %peer_origin, "WebSocket connection established");

        Ok(WebSocketTransport::new(ws_stream, peer_origin))
    }
}

// ============================================================================
// Tests
// ============================================================================
