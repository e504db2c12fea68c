use thiserror::Error;

/// Failures of the realtime transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// DNS failure, refused connection or other I/O failure reaching the host.
    #[error("Host unreachable: {0}")]
    Unreachable(String),

    #[error("Timed out")]
    Timeout,

    /// The server answered the handshake with a non-upgrade HTTP status.
    #[error("Handshake rejected with HTTP {0}")]
    Rejected(u16),

    /// The connection was closed (by either side) while in use.
    #[error("Connection closed: {0}")]
    Closed(String),

    #[error("TLS error: {0}")]
    Tls(String),

    /// Any other WebSocket-level failure (bad URL, protocol violation, ...).
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

/// Failures of the request/response chat service.
#[derive(Error, Debug)]
pub enum ApiError {
    /// No credentials are available, or the server rejected them.
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Not found")]
    NotFound,

    #[error("Server returned HTTP {0}")]
    Status(u16),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
}
