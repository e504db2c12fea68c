//! Chat list and message read models, plus the chat-level remote actions.

use std::sync::Arc;

use tracing::{debug, info};

use chatline_net::ChatApi;
use chatline_shared::{ChatId, MessageId, UserId};
use chatline_store::{ChatStore, ChatWithParticipants, LiveQuery, Message, Participant};

use crate::error::Result;
use crate::history::ChatHistory;

#[derive(Clone)]
pub struct ChatService {
    store: ChatStore,
    api: Arc<dyn ChatApi>,
    page_size: u32,
}

impl ChatService {
    pub fn new(store: ChatStore, api: Arc<dyn ChatApi>, page_size: u32) -> Self {
        Self {
            store,
            api,
            page_size,
        }
    }

    /// Pull the chat list from the service into the store.  Returns how many
    /// chats were received.
    pub async fn refresh_chats(&self) -> Result<usize> {
        let chats = self.api.list_chats().await?;
        let count = chats.len();
        for chat in chats {
            self.store
                .upsert_chat_with_participants(ChatWithParticipants::from(chat))
                .await?;
        }
        info!(count, "Chat list refreshed");
        Ok(count)
    }

    pub async fn create_chat(&self, other_user_ids: Vec<UserId>) -> Result<ChatWithParticipants> {
        let chat = ChatWithParticipants::from(self.api.create_chat(&other_user_ids).await?);
        self.store.upsert_chat_with_participants(chat.clone()).await?;
        debug!(chat = %chat.id(), "Chat created");
        Ok(chat)
    }

    /// Leave a chat.  The local copy, its roster and its messages are
    /// removed once the service acknowledges.
    pub async fn leave_chat(&self, chat_id: ChatId) -> Result<()> {
        self.api.leave_chat(&chat_id).await?;
        self.store.delete_chat(chat_id.clone()).await?;
        info!(chat = %chat_id, "Left chat");
        Ok(())
    }

    /// Look a user up on the service and cache the result locally.
    pub async fn search_participant(&self, query: &str) -> Result<Participant> {
        let participant = Participant::from(self.api.search_participant(query).await?);
        self.store.upsert_participant(participant.clone()).await?;
        Ok(participant)
    }

    pub async fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        Ok(self.store.get_message(id).await?)
    }

    /// Chats with their rosters, most recently active first.
    pub fn watch_chats(&self) -> LiveQuery<Vec<ChatWithParticipants>> {
        self.store.watch_chats()
    }

    /// The newest `limit` messages of a chat, newest first.
    pub fn watch_messages(&self, chat_id: ChatId, limit: u32) -> LiveQuery<Vec<Message>> {
        self.store.watch_messages(chat_id, limit)
    }

    /// A pager that loads older messages of `chat_id` into the store.
    pub fn history(&self, chat_id: ChatId) -> ChatHistory {
        ChatHistory::new(self.api.clone(), self.store.clone(), chat_id, self.page_size)
    }
}
