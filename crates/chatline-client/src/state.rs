//! Connection state shared by every consumer of the realtime link.

use std::fmt;

/// The single authoritative state of the realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection, and none wanted (signed out or in the background).
    Disconnected,
    /// An open attempt is in flight or a retry is pending.
    Connecting,
    Connected,
    /// Gave up because the network is unavailable.
    ErrorNetwork,
    /// Gave up for any other reason (protocol mismatch, rejected session,
    /// too many unexplained failures).
    ErrorUnknown,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    /// CONNECTING or CONNECTED: a live link is wanted and being worked on.
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::ErrorNetwork => "ERROR_NETWORK",
            ConnectionState::ErrorUnknown => "ERROR_UNKNOWN",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
