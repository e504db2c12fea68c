//! Outbound messages: optimistic write, transmission, delivery tracking.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use chatline_net::ChatApi;
use chatline_shared::{ChatId, MessageId, OutboundFrame, SendMessage};
use chatline_store::{ChatStore, DeliveryStatus, Message};

use crate::error::{ClientError, Result};
use crate::signals::SessionContext;
use crate::supervisor::ConnectionHandle;

#[derive(Clone)]
pub struct OutboundMessageSender {
    store: ChatStore,
    api: Arc<dyn ChatApi>,
    connection: ConnectionHandle,
    context: SessionContext,
}

impl OutboundMessageSender {
    pub fn new(
        store: ChatStore,
        api: Arc<dyn ChatApi>,
        connection: ConnectionHandle,
        context: SessionContext,
    ) -> Self {
        Self {
            store,
            api,
            connection,
            context,
        }
    }

    /// Store `content` as a SENDING message and transmit it.
    ///
    /// Transmission problems do not surface as errors: the returned message
    /// carries the resulting delivery status (SENT or FAILED).  Errors are
    /// reserved for a missing session, an unknown chat or a store failure.
    pub async fn send(&self, chat_id: ChatId, content: String) -> Result<Message> {
        let credentials = self
            .context
            .credentials
            .current()
            .ok_or(ClientError::NotAuthenticated)?;
        if !self.store.chat_exists(chat_id.clone()).await? {
            return Err(ClientError::ChatNotFound(chat_id));
        }

        let message = Message {
            id: MessageId::new(),
            chat_id,
            sender_id: credentials.user_id,
            content,
            created_at: Utc::now(),
            delivery_status: DeliveryStatus::Sending,
        };
        self.store.upsert_message(message.clone()).await?;
        debug!(message = %message.id, chat = %message.chat_id, "Message queued");

        self.transmit(message).await
    }

    /// Transmit a FAILED message again with its original id and content.
    pub async fn retry(&self, id: MessageId) -> Result<Message> {
        let message = self.load(&id).await?;
        if message.delivery_status != DeliveryStatus::Failed {
            return Err(ClientError::InvalidDeliveryState {
                id,
                status: message.delivery_status,
            });
        }

        let claimed = self
            .store
            .transition_delivery_status(id.clone(), DeliveryStatus::Failed, DeliveryStatus::Sending)
            .await?;
        if !claimed {
            // Confirmed or retried concurrently.
            let current = self.load(&id).await?;
            return Err(ClientError::InvalidDeliveryState {
                id,
                status: current.delivery_status,
            });
        }

        self.transmit(Message {
            delivery_status: DeliveryStatus::Sending,
            ..message
        })
        .await
    }

    /// Delete a SENT message for everyone.  The local row is removed once the
    /// service confirms; a `MessageDeleted` push may remove it first.
    pub async fn delete(&self, id: MessageId) -> Result<()> {
        let message = self.load(&id).await?;
        if message.delivery_status != DeliveryStatus::Sent {
            return Err(ClientError::InvalidDeliveryState {
                id,
                status: message.delivery_status,
            });
        }

        self.api.delete_message(&id).await?;
        self.store.delete_message(id).await?;
        Ok(())
    }

    async fn load(&self, id: &MessageId) -> Result<Message> {
        self.store
            .get_message(id.clone())
            .await?
            .ok_or_else(|| ClientError::MessageNotFound(id.clone()))
    }

    async fn transmit(&self, message: Message) -> Result<Message> {
        let frame = OutboundFrame::SendMessage(SendMessage {
            id: message.id.clone(),
            chat_id: message.chat_id.clone(),
            content: message.content.clone(),
        });

        let result = match frame.encode() {
            Ok(text) => self.connection.send_frame(text).await,
            Err(e) => Err(e.into()),
        };

        let outcome = match result {
            Ok(()) => DeliveryStatus::Sent,
            Err(e) => {
                warn!(message = %message.id, error = %e, "Message not delivered");
                DeliveryStatus::Failed
            }
        };

        // Only moves SENDING rows, so an echo that already confirmed the
        // message is never downgraded.
        self.store
            .transition_delivery_status(message.id.clone(), DeliveryStatus::Sending, outcome)
            .await?;

        Ok(self
            .store
            .get_message(message.id.clone())
            .await?
            .unwrap_or(Message {
                delivery_status: outcome,
                ..message
            }))
    }
}
