//! A single streaming connection and its age.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};

use crate::error::WsError;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A live WebSocket connection plus the time it was opened.
///
/// Rotation replaces a connection with a freshly dialed one; a connection is
/// never re-dialed in place.
pub struct Connection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    opened_at: Instant,
    id: u64,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("age", &self.age())
            .finish()
    }
}

impl Connection {
    /// Dial `url` and send the optional handshake frame.
    #[instrument(skip(handshake), fields(url = %url))]
    pub async fn dial(
        url: &str,
        handshake: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self, WsError> {
        let (mut stream, _) = tokio::time::timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| WsError::ConnectionFailed(format!("timed out after {connect_timeout:?}")))?
            .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;

        if let Some(frame) = handshake {
            stream
                .send(Message::Text(frame))
                .await
                .map_err(|e| WsError::SendFailed(e.to_string()))?;
        }

        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        info!(connection = id, "Connected to stream");

        Ok(Self {
            stream,
            opened_at: Instant::now(),
            id,
        })
    }

    /// Time since this connection was opened.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Process-unique connection id, for logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next text frame.
    ///
    /// Control frames are skipped. Returns `Ok(None)` once the peer closes
    /// the stream cleanly.
    pub async fn next_text(&mut self) -> Result<Option<String>, WsError> {
        while let Some(msg) = self.stream.next().await {
            match msg? {
                Message::Text(text) => return Ok(Some(text)),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => warn!(connection = self.id, "Dropping non-utf8 binary frame"),
                },
                Message::Ping(_) | Message::Pong(_) => {
                    // tungstenite answers pings itself
                    debug!(connection = self.id, "Control frame");
                }
                Message::Close(frame) => {
                    warn!(connection = self.id, frame = ?frame, "Stream closed by peer");
                    return Err(WsError::ConnectionClosed {
                        code: frame.as_ref().map(|f| u16::from(f.code)),
                        reason: frame.map(|f| f.reason.into_owned()).unwrap_or_default(),
                    });
                }
                Message::Frame(_) => {}
            }
        }
        Ok(None)
    }

    /// Like [`next_text`](Self::next_text), failing if nothing arrives
    /// within `idle_timeout`.
    pub async fn next_text_within(
        &mut self,
        idle_timeout: Duration,
    ) -> Result<Option<String>, WsError> {
        tokio::time::timeout(idle_timeout, self.next_text())
            .await
            .map_err(|_| WsError::ReadTimeout(idle_timeout))?
    }

    /// Close the connection, ignoring errors from an already-dead peer.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(connection = self.id, error = %e, "Error closing connection");
        }
        info!(connection = self.id, age_s = self.age().as_secs(), "Connection closed");
    }
}
