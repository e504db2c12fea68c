//! Backward loading of one chat's message history into the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use chatline_net::ChatApi;
use chatline_shared::{ChatId, MessageDto};
use chatline_store::{ChatStore, Message};

use crate::error::ClientError;
use crate::paginator::{LoadOutcome, PaginationState, Paginator};

pub type HistoryState = PaginationState<DateTime<Utc>, ClientError>;

/// Pages of a chat's history, oldest-first cursor on `createdAt`.  Loaded
/// pages land in the store; read them back through the live message query.
pub struct ChatHistory {
    pager: Paginator<DateTime<Utc>, MessageDto, ClientError>,
}

impl ChatHistory {
    pub fn new(api: Arc<dyn ChatApi>, store: ChatStore, chat_id: ChatId, page_size: u32) -> Self {
        let pager = Paginator::new(
            move |before: Option<DateTime<Utc>>| {
                let api = api.clone();
                let chat_id = chat_id.clone();
                async move {
                    api.list_messages(&chat_id, before, page_size)
                        .await
                        .map_err(ClientError::from)
                }
            },
            move |page: Vec<MessageDto>| {
                let store = store.clone();
                async move {
                    let messages = page.into_iter().map(Message::from_remote).collect();
                    store.upsert_messages(messages).await.map_err(ClientError::from)
                }
            },
            |page: &[MessageDto]| page.iter().map(|m| m.created_at).min(),
        );

        Self { pager }
    }

    pub async fn load_more(&self) -> LoadOutcome {
        self.pager.load_next_items().await
    }

    pub fn state(&self) -> HistoryState {
        self.pager.state()
    }

    pub fn watch(&self) -> watch::Receiver<HistoryState> {
        self.pager.watch()
    }

    pub fn reset(&self) {
        self.pager.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{chat_dto, message_dto, FakeApi};

    async fn setup() -> (FakeApi, ChatStore) {
        let api = FakeApi::new();
        let store = ChatStore::in_memory().unwrap();
        store
            .upsert_chat_with_participants(chat_dto("c1", &["me", "u2"]).into())
            .await
            .unwrap();
        api.add_messages(vec![
            message_dto("m1", "c1", "2024-05-01T01:00:00Z"),
            message_dto("m2", "c1", "2024-05-01T02:00:00Z"),
            message_dto("m3", "c1", "2024-05-01T03:00:00Z"),
        ]);
        (api, store)
    }

    #[tokio::test]
    async fn pages_land_in_the_store_oldest_last() {
        let (api, store) = setup().await;
        let history = ChatHistory::new(Arc::new(api.clone()), store.clone(), ChatId::from("c1"), 2);

        assert_eq!(history.load_more().await, LoadOutcome::Loaded(2));
        assert_eq!(
            history.state().cursor,
            Some(crate::testing::ts("2024-05-01T02:00:00Z"))
        );
        assert_eq!(history.load_more().await, LoadOutcome::Loaded(1));
        assert_eq!(history.load_more().await, LoadOutcome::EndReached);
        assert_eq!(history.load_more().await, LoadOutcome::Skipped);
        assert_eq!(api.calls("list_messages"), 3);

        let stored = store
            .messages_for_chat(ChatId::from("c1"), 10, None)
            .await
            .unwrap();
        let ids: Vec<&str> = stored.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m2", "m1"]);
    }

    #[tokio::test]
    async fn service_failure_is_recorded_and_retryable() {
        let (api, store) = setup().await;
        let history = ChatHistory::new(Arc::new(api.clone()), store, ChatId::from("c1"), 2);

        api.set_failing(true);
        assert_eq!(history.load_more().await, LoadOutcome::Failed);
        assert!(history.state().error.is_some());
        assert_eq!(history.state().cursor, None);

        api.set_failing(false);
        assert_eq!(history.load_more().await, LoadOutcome::Loaded(2));
    }
}
