use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{
    FRAME_CHAT_PARTICIPANTS_CHANGED, FRAME_MESSAGE_DELETED, FRAME_NEW_MESSAGE,
    FRAME_PROFILE_PICTURE_UPDATED, FRAME_SEND_MESSAGE,
};
use crate::error::ProtocolError;
use crate::types::{ChatId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Frame envelope
// ---------------------------------------------------------------------------

/// Envelope of every application frame on the realtime connection.
///
/// `payload` is itself a JSON document, encoded as a string, whose shape is
/// selected by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: String,
}

// ---------------------------------------------------------------------------
// Inbound events
// ---------------------------------------------------------------------------

/// All events pushed by the server over the realtime connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A message was posted in a chat (possibly our own, echoed back)
    NewMessage(NewMessage),

    /// A message was deleted for all parties
    MessageDeleted(MessageDeleted),

    /// A user changed their profile picture
    ProfilePictureUpdated(ProfilePictureUpdated),

    /// The roster of a chat changed; the chat must be re-fetched
    ChatParticipantsChanged(ChatParticipantsChanged),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeleted {
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePictureUpdated {
    pub user_id: UserId,
    pub new_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatParticipantsChanged {
    pub chat_id: ChatId,
}

impl InboundEvent {
    /// Decode one text frame received from the server.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let frame: WireFrame = serde_json::from_str(text)?;
        let payload = frame.payload.as_str();

        match frame.kind.as_str() {
            FRAME_NEW_MESSAGE => Ok(Self::NewMessage(serde_json::from_str(payload)?)),
            FRAME_MESSAGE_DELETED => Ok(Self::MessageDeleted(serde_json::from_str(payload)?)),
            FRAME_PROFILE_PICTURE_UPDATED => {
                Ok(Self::ProfilePictureUpdated(serde_json::from_str(payload)?))
            }
            FRAME_CHAT_PARTICIPANTS_CHANGED => {
                Ok(Self::ChatParticipantsChanged(serde_json::from_str(payload)?))
            }
            other => Err(ProtocolError::UnknownEventType(other.to_string())),
        }
    }

    /// Encode into the text form the server sends. Used by tests and tooling.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let (kind, payload) = match self {
            Self::NewMessage(e) => (FRAME_NEW_MESSAGE, serde_json::to_string(e)?),
            Self::MessageDeleted(e) => (FRAME_MESSAGE_DELETED, serde_json::to_string(e)?),
            Self::ProfilePictureUpdated(e) => {
                (FRAME_PROFILE_PICTURE_UPDATED, serde_json::to_string(e)?)
            }
            Self::ChatParticipantsChanged(e) => {
                (FRAME_CHAT_PARTICIPANTS_CHANGED, serde_json::to_string(e)?)
            }
        };

        let frame = WireFrame {
            kind: kind.to_string(),
            payload,
        };
        Ok(serde_json::to_string(&frame)?)
    }
}

// ---------------------------------------------------------------------------
// Outbound frames
// ---------------------------------------------------------------------------

/// Frames the client writes to the realtime connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    SendMessage(SendMessage),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub content: String,
}

impl OutboundFrame {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let frame = match self {
            Self::SendMessage(m) => WireFrame {
                kind: FRAME_SEND_MESSAGE.to_string(),
                payload: serde_json::to_string(m)?,
            },
        };
        Ok(serde_json::to_string(&frame)?)
    }
}

// ---------------------------------------------------------------------------
// REST payloads
// ---------------------------------------------------------------------------

/// A participant as returned by the chat service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantDto {
    pub user_id: UserId,
    pub username: String,
    pub profile_picture_url: Option<String>,
}

/// A message as returned by the chat service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Authoritative chat state as returned by the chat service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatDto {
    pub id: ChatId,
    pub participants: Vec<ParticipantDto>,
    pub last_activity_at: DateTime<Utc>,
    pub last_message: Option<MessageDto>,
}

impl From<NewMessage> for MessageDto {
    fn from(m: NewMessage) -> Self {
        Self {
            id: m.id,
            chat_id: m.chat_id,
            sender_id: m.sender_id,
            content: m.content,
            created_at: m.created_at,
        }
    }
}
