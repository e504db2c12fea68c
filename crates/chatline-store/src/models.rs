//! Domain model structs persisted in the local SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to a UI layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chatline_shared::{ChatDto, ChatId, MessageDto, MessageId, ParticipantDto, UserId};

use crate::error::StoreError;

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// A user taking part in one or more chats.  Identity is `user_id`; the other
/// fields are updated in place by push events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub user_id: UserId,
    pub username: String,
    pub profile_picture_url: Option<String>,
}

impl From<ParticipantDto> for Participant {
    fn from(p: ParticipantDto) -> Self {
        Self {
            user_id: p.user_id,
            username: p.username,
            profile_picture_url: p.profile_picture_url,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Delivery state of a message.  Only meaningful for locally authored
/// messages; everything received from the server is `Sent`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sending => "SENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "SENDING" => Ok(Self::Sending),
            "SENT" => Ok(Self::Sent),
            "FAILED" => Ok(Self::Failed),
            other => Err(StoreError::InvalidValue(format!("delivery status {other}"))),
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Globally unique; client generated for outbound messages.
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    /// Server timestamp once confirmed, local clock while pending.
    pub created_at: DateTime<Utc>,
    pub delivery_status: DeliveryStatus,
}

impl Message {
    /// Build a message received from the server.
    pub fn from_remote(dto: MessageDto) -> Self {
        Self {
            id: dto.id,
            chat_id: dto.chat_id,
            sender_id: dto.sender_id,
            content: dto.content,
            created_at: dto.created_at,
            delivery_status: DeliveryStatus::Sent,
        }
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Cached summary of the newest message of a chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A conversation row, without its roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub last_activity_at: DateTime<Utc>,
    pub last_message: Option<LastMessage>,
}

/// A chat joined with its current participant roster, in roster order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatWithParticipants {
    pub chat: Chat,
    pub participants: Vec<Participant>,
}

impl ChatWithParticipants {
    pub fn id(&self) -> &ChatId {
        &self.chat.id
    }
}

impl From<ChatDto> for ChatWithParticipants {
    fn from(dto: ChatDto) -> Self {
        let last_message = dto.last_message.map(|m| LastMessage {
            id: m.id,
            sender_id: m.sender_id,
            content: m.content,
            created_at: m.created_at,
        });

        Self {
            chat: Chat {
                id: dto.id,
                last_activity_at: dto.last_activity_at,
                last_message,
            },
            participants: dto.participants.into_iter().map(Participant::from).collect(),
        }
    }
}
