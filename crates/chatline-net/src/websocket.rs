//! WebSocket implementation of [`RealtimeTransport`] on tokio-tungstenite.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::transport::{FrameSink, FrameSource, Incoming, RealtimeTransport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to a fixed `ws://` / `wss://` endpoint, authenticating with a
/// bearer token in the upgrade request.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl RealtimeTransport for WsTransport {
    async fn open(
        &self,
        auth_token: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(map_ws_error)?;
        let bearer = HeaderValue::from_str(&format!("Bearer {auth_token}"))
            .map_err(|e| TransportError::WebSocket(format!("invalid token header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(map_ws_error)?;

        debug!(url = %self.url, status = %response.status(), "WebSocket handshake complete");

        let (sink, source) = stream.split();
        Ok((Box::new(WsSink { inner: sink }), Box::new(WsSource { inner: source })))
    }
}

struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(map_ws_error)
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.inner
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(map_ws_error)
    }

    async fn close(&mut self) {
        if let Err(e) = self.inner.close().await {
            trace!(error = %e, "Ignoring error while closing WebSocket");
        }
    }
}

struct WsSource {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Option<Result<Incoming, TransportError>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Incoming::Text(text))),
                Ok(Message::Binary(bytes)) => {
                    return Some(String::from_utf8(bytes).map(Incoming::Text).map_err(|_| {
                        TransportError::WebSocket("binary frame is not UTF-8".to_string())
                    }))
                }
                // Answering pings is queued by tungstenite itself while reading.
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    trace!("heartbeat");
                    return Some(Ok(Incoming::Heartbeat));
                }
                Ok(Message::Frame(_)) => trace!("raw frame"),
                Ok(Message::Close(frame)) => {
                    debug!(frame = ?frame, "WebSocket closed by peer");
                    return None;
                }
                Err(e) => return Some(Err(map_ws_error(e))),
            }
        }
    }
}

/// Collapse tungstenite's error space into [`TransportError`].
pub(crate) fn map_ws_error(err: WsError) -> TransportError {
    match err {
        WsError::ConnectionClosed => TransportError::Closed("connection closed".to_string()),
        WsError::AlreadyClosed => TransportError::Closed("already closed".to_string()),
        WsError::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => TransportError::Timeout,
        WsError::Io(e) => TransportError::Unreachable(e.to_string()),
        WsError::Tls(e) => TransportError::Tls(e.to_string()),
        WsError::Http(response) => TransportError::Rejected(response.status().as_u16()),
        other => TransportError::WebSocket(other.to_string()),
    }
}
