use thiserror::Error;

use chatline_net::{ApiError, TransportError};
use chatline_shared::{ChatId, MessageId, ProtocolError};
use chatline_store::{DeliveryStatus, StoreError};

/// Outcome of a failed client operation.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The realtime connection is not in the CONNECTED state.
    #[error("Not connected")]
    NotConnected,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("Chat not found: {0}")]
    ChatNotFound(ChatId),

    #[error("Message {id} is {status:?}, which does not allow this operation")]
    InvalidDeliveryState { id: MessageId, status: DeliveryStatus },

    /// Writing the frame failed after the connection accepted it.
    #[error("Transmission failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Chat service error: {0}")]
    Api(#[from] ApiError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
