//! Maps connection failures onto a small taxonomy.
//!
//! The mapping is total: every [`ConnectionFailure`] yields exactly one
//! [`ErrorClass`], and every class yields one terminal [`ConnectionState`].
//! Both matches are exhaustive so a new transport error variant will not
//! compile until it is classified.

use chatline_net::TransportError;
use chatline_shared::ProtocolError;

use crate::state::ConnectionState;

/// Anything that can end a connection attempt or an established link.
#[derive(Debug)]
pub enum ConnectionFailure {
    Transport(TransportError),
    /// An inbound frame could not be decoded.
    Protocol { error: ProtocolError, raw: String },
}

impl From<TransportError> for ConnectionFailure {
    fn from(e: TransportError) -> Self {
        ConnectionFailure::Transport(e)
    }
}

impl std::fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionFailure::Transport(e) => write!(f, "{e}"),
            ConnectionFailure::Protocol { error, .. } => write!(f, "undecodable frame: {error}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    NoConnectivity,
    Timeout,
    /// Protocol mismatch; retrying cannot help.
    Serialization,
    /// Credentials were rejected; the session has to be renewed upstream.
    Unauthorized,
    Unknown,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        match self {
            ErrorClass::NoConnectivity | ErrorClass::Timeout | ErrorClass::Unknown => true,
            ErrorClass::Serialization | ErrorClass::Unauthorized => false,
        }
    }

    /// State to publish once this class stops automatic reconnecting.
    pub fn terminal_state(self) -> ConnectionState {
        match self {
            ErrorClass::NoConnectivity | ErrorClass::Timeout => ConnectionState::ErrorNetwork,
            ErrorClass::Serialization | ErrorClass::Unauthorized | ErrorClass::Unknown => {
                ConnectionState::ErrorUnknown
            }
        }
    }
}

pub fn classify(failure: &ConnectionFailure) -> ErrorClass {
    match failure {
        ConnectionFailure::Transport(e) => match e {
            TransportError::Unreachable(_) | TransportError::Closed(_) => {
                ErrorClass::NoConnectivity
            }
            TransportError::Timeout => ErrorClass::Timeout,
            TransportError::Rejected(401) | TransportError::Rejected(403) => {
                ErrorClass::Unauthorized
            }
            TransportError::Rejected(_) | TransportError::Tls(_) | TransportError::WebSocket(_) => {
                ErrorClass::Unknown
            }
        },
        ConnectionFailure::Protocol { .. } => ErrorClass::Serialization,
    }
}
