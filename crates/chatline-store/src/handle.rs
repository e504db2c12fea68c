//! Async, cloneable access to the [`Database`].
//!
//! Every call runs on tokio's blocking pool so SQLite I/O never stalls an
//! executor thread.  Writes publish a [`StoreChange`] which the live queries
//! returned by [`ChatStore::watch_chats`] and [`ChatStore::watch_messages`]
//! use to re-run themselves.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;

use chatline_shared::{ChatId, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{ChatWithParticipants, DeliveryStatus, Message, Participant};

const CHANGE_BUFFER: usize = 256;

/// What a write touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// Chat rows, rosters or participants changed.
    Chats,
    /// Messages of one chat changed.
    Messages(ChatId),
}

/// A live query: yields the current result immediately, then a fresh result
/// after every relevant write.
pub type LiveQuery<T> = BoxStream<'static, Result<T>>;

#[derive(Clone)]
pub struct ChatStore {
    db: Arc<Mutex<Database>>,
    changes: broadcast::Sender<StoreChange>,
}

impl ChatStore {
    pub fn new(db: Database) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            db: Arc::new(Mutex::new(db)),
            changes,
        }
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Subscribe to raw change notifications.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = db.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    fn notify(&self, change: StoreChange) {
        // No receivers simply means nobody is watching.
        let _ = self.changes.send(change);
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    pub async fn upsert_chat_with_participants(&self, chat: ChatWithParticipants) -> Result<()> {
        let chat_id = chat.chat.id.clone();
        self.run(move |db| db.upsert_chat_with_participants(&chat))
            .await?;
        tracing::debug!(chat = %chat_id, "chat upserted");
        self.notify(StoreChange::Chats);
        Ok(())
    }

    pub async fn delete_chat(&self, chat_id: ChatId) -> Result<bool> {
        let id = chat_id.clone();
        let deleted = self.run(move |db| db.delete_chat(&id)).await?;
        if deleted {
            self.notify(StoreChange::Chats);
            self.notify(StoreChange::Messages(chat_id));
        }
        Ok(deleted)
    }

    pub async fn upsert_message(&self, message: Message) -> Result<()> {
        let chat_id = message.chat_id.clone();
        self.run(move |db| db.upsert_message(&message)).await?;
        self.notify(StoreChange::Messages(chat_id));
        self.notify(StoreChange::Chats);
        Ok(())
    }

    pub async fn upsert_messages(&self, messages: Vec<Message>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut chat_ids: Vec<ChatId> = messages.iter().map(|m| m.chat_id.clone()).collect();
        chat_ids.sort();
        chat_ids.dedup();

        self.run(move |db| db.upsert_messages(&messages)).await?;
        for chat_id in chat_ids {
            self.notify(StoreChange::Messages(chat_id));
        }
        self.notify(StoreChange::Chats);
        Ok(())
    }

    pub async fn delete_message(&self, id: MessageId) -> Result<bool> {
        let chat_id = self
            .get_message(id.clone())
            .await?
            .map(|m| m.chat_id);
        let deleted = self.run(move |db| db.delete_message(&id)).await?;
        if deleted {
            if let Some(chat_id) = chat_id {
                self.notify(StoreChange::Messages(chat_id));
            }
            self.notify(StoreChange::Chats);
        }
        Ok(deleted)
    }

    pub async fn transition_delivery_status(
        &self,
        id: MessageId,
        from: DeliveryStatus,
        to: DeliveryStatus,
    ) -> Result<bool> {
        let lookup = id.clone();
        let changed = self
            .run(move |db| db.transition_delivery_status(&id, from, to))
            .await?;
        if changed {
            if let Some(message) = self.get_message(lookup).await? {
                self.notify(StoreChange::Messages(message.chat_id));
            }
        }
        Ok(changed)
    }

    pub async fn upsert_participant(&self, participant: Participant) -> Result<()> {
        self.run(move |db| db.upsert_participant(&participant))
            .await?;
        self.notify(StoreChange::Chats);
        Ok(())
    }

    pub async fn update_participant_picture(
        &self,
        user_id: UserId,
        url: Option<String>,
    ) -> Result<bool> {
        let updated = self
            .run(move |db| db.update_participant_picture(&user_id, url.as_deref()))
            .await?;
        if updated {
            self.notify(StoreChange::Chats);
        }
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn chat_exists(&self, chat_id: ChatId) -> Result<bool> {
        self.run(move |db| db.chat_exists(&chat_id)).await
    }

    pub async fn get_chat(&self, chat_id: ChatId) -> Result<Option<ChatWithParticipants>> {
        self.run(move |db| db.get_chat(&chat_id)).await
    }

    pub async fn list_chats(&self) -> Result<Vec<ChatWithParticipants>> {
        self.run(|db| db.list_chats_with_participants()).await
    }

    pub async fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        self.run(move |db| db.get_message(&id)).await
    }

    pub async fn get_participant(&self, user_id: UserId) -> Result<Option<Participant>> {
        self.run(move |db| db.get_participant(&user_id)).await
    }

    pub async fn messages_for_chat(
        &self,
        chat_id: ChatId,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        self.run(move |db| db.get_messages_for_chat(&chat_id, limit, before))
            .await
    }

    // ------------------------------------------------------------------
    // Live queries
    // ------------------------------------------------------------------

    /// All chats with their current rosters, most recently active first.
    pub fn watch_chats(&self) -> LiveQuery<Vec<ChatWithParticipants>> {
        self.live(
            |change| matches!(change, StoreChange::Chats),
            |store| async move { store.list_chats().await },
        )
    }

    /// The newest `limit` messages of a chat, newest first.
    pub fn watch_messages(&self, chat_id: ChatId, limit: u32) -> LiveQuery<Vec<Message>> {
        let watched = chat_id.clone();
        self.live(
            move |change| matches!(change, StoreChange::Messages(id) if *id == watched),
            move |store| {
                let chat_id = chat_id.clone();
                async move { store.messages_for_chat(chat_id, limit, None).await }
            },
        )
    }

    fn live<T, R, Q, Fut>(&self, relevant: R, query: Q) -> LiveQuery<T>
    where
        T: Send + 'static,
        R: Fn(&StoreChange) -> bool + Send + 'static,
        Q: Fn(ChatStore) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        // Subscribe before the first query so no write can slip in between.
        let rx = self.changes.subscribe();
        let store = self.clone();

        stream::unfold(
            (store, rx, relevant, query, true),
            |(store, mut rx, relevant, query, first)| async move {
                if !first {
                    loop {
                        match rx.recv().await {
                            Ok(change) if relevant(&change) => break,
                            Ok(_) => continue,
                            // Missed notifications: re-query to catch up.
                            Err(broadcast::error::RecvError::Lagged(_)) => break,
                            Err(broadcast::error::RecvError::Closed) => return None,
                        }
                    }
                }
                let result = query(store.clone()).await;
                Some((result, (store, rx, relevant, query, false)))
            },
        )
        .boxed()
    }
}
