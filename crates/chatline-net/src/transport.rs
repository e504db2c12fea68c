//! The realtime transport seam.
//!
//! A transport opens one authenticated, bidirectional text-frame connection.
//! Control frames stay inside the transport; sources only report that one
//! arrived ([`Incoming::Heartbeat`]) so the caller can tell a live peer from
//! a dead one, and sinks expose an explicit [`FrameSink::ping`].

use async_trait::async_trait;

use crate::error::TransportError;

/// Opens realtime connections.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Open a connection authenticated with `auth_token`.
    async fn open(
        &self,
        auth_token: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), TransportError>;
}

/// Write half of an open connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one application frame.  Completion is the transport-level
    /// acknowledgement.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a keep-alive ping.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Close the connection gracefully.  Errors are ignored.
    async fn close(&mut self);
}

/// What a [`FrameSource`] yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// One application frame.
    Text(String),
    /// A ping or pong from the peer.
    Heartbeat,
}

/// Read half of an open connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame; `None` once the peer closed the connection.
    async fn next_frame(&mut self) -> Option<Result<Incoming, TransportError>>;
}
