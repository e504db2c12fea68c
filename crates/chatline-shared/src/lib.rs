//! Types shared by every chatline crate: identifiers, the realtime wire
//! protocol and the REST payloads exchanged with the chat service.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{
    ChatDto, ChatParticipantsChanged, InboundEvent, MessageDeleted, MessageDto, NewMessage,
    OutboundFrame, ParticipantDto, ProfilePictureUpdated, SendMessage, WireFrame,
};
pub use types::{ChatId, MessageId, UserId};
