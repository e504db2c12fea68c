//! Applies inbound realtime events to the local store.
//!
//! Events are handled one at a time in arrival order. A failing event is
//! logged and skipped; the loop itself only ends when the event stream does.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use chatline_net::ChatApi;
use chatline_shared::{
    ChatId, ChatParticipantsChanged, InboundEvent, MessageDeleted, MessageDto, NewMessage,
    ProfilePictureUpdated,
};
use chatline_store::{ChatStore, ChatWithParticipants, Message};

use crate::error::{ClientError, Result};
use crate::signals::SessionContext;

#[derive(Clone)]
pub struct SyncReconciler {
    store: ChatStore,
    api: Arc<dyn ChatApi>,
    context: SessionContext,
}

impl SyncReconciler {
    pub fn new(store: ChatStore, api: Arc<dyn ChatApi>, context: SessionContext) -> Self {
        Self {
            store,
            api,
            context,
        }
    }

    pub fn spawn(self, events: mpsc::Receiver<InboundEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    /// Apply events until every sender is gone.
    pub async fn run(self, mut events: mpsc::Receiver<InboundEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.apply(event).await {
                match e {
                    ClientError::Store(e) => error!(error = %e, "Failed to store inbound event"),
                    other => warn!(error = %other, "Failed to reconcile inbound event"),
                }
            }
        }
        info!("Inbound event stream ended, reconciler stopping");
    }

    /// Apply a single event.
    pub async fn apply(&self, event: InboundEvent) -> Result<()> {
        match event {
            InboundEvent::NewMessage(m) => self.on_new_message(m).await,
            InboundEvent::MessageDeleted(MessageDeleted { message_id }) => {
                if !self.store.delete_message(message_id.clone()).await? {
                    debug!(message = %message_id, "Deleted message was not stored");
                }
                Ok(())
            }
            InboundEvent::ProfilePictureUpdated(ProfilePictureUpdated { user_id, new_url }) => {
                self.store
                    .update_participant_picture(user_id.clone(), new_url.clone())
                    .await?;
                if self.context.mirror_profile_picture(&user_id, new_url.as_deref()) {
                    debug!("Updated local profile picture");
                }
                Ok(())
            }
            InboundEvent::ChatParticipantsChanged(ChatParticipantsChanged { chat_id }) => {
                self.refresh_chat(&chat_id).await
            }
        }
    }

    async fn on_new_message(&self, message: NewMessage) -> Result<()> {
        if !self.store.chat_exists(message.chat_id.clone()).await? {
            if let Err(e) = self.refresh_chat(&message.chat_id).await {
                warn!(
                    chat = %message.chat_id,
                    message = %message.id,
                    error = %e,
                    "Dropping message for a chat that could not be fetched"
                );
                return Ok(());
            }
        }

        debug!(chat = %message.chat_id, message = %message.id, "Storing inbound message");
        self.store
            .upsert_message(Message::from_remote(MessageDto::from(message)))
            .await?;
        Ok(())
    }

    /// Overwrite the chat and its roster with the remote state.
    async fn refresh_chat(&self, chat_id: &ChatId) -> Result<()> {
        let chat = self.api.get_chat(chat_id).await?;
        self.store
            .upsert_chat_with_participants(ChatWithParticipants::from(chat))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chatline_shared::{MessageId, UserId};
    use chatline_store::DeliveryStatus;

    use super::*;
    use crate::testing::{chat_dto, context, message_dto, ts, FakeApi};

    fn new_message(id: &str, chat_id: &str) -> InboundEvent {
        InboundEvent::NewMessage(NewMessage {
            id: MessageId::from(id),
            chat_id: ChatId::from(chat_id),
            sender_id: UserId::from("u2"),
            content: "hi".into(),
            created_at: ts("2024-05-01T10:00:00Z"),
        })
    }

    fn deleted(id: &str) -> InboundEvent {
        InboundEvent::MessageDeleted(MessageDeleted {
            message_id: MessageId::from(id),
        })
    }

    fn reconciler(api: &FakeApi) -> (SyncReconciler, ChatStore) {
        let store = ChatStore::in_memory().unwrap();
        let r = SyncReconciler::new(store.clone(), Arc::new(api.clone()), context(true, true, true));
        (r, store)
    }

    #[tokio::test]
    async fn unknown_chat_is_fetched_before_the_message() {
        let api = FakeApi::new();
        api.add_chat(chat_dto("c1", &["me", "u2"]));
        let (r, store) = reconciler(&api);

        r.apply(new_message("m1", "c1")).await.unwrap();

        assert_eq!(api.calls("get_chat"), 1);
        let chat = store.get_chat(ChatId::from("c1")).await.unwrap().unwrap();
        assert_eq!(chat.participants.len(), 2);
        assert_eq!(chat.chat.last_message.unwrap().id, MessageId::from("m1"));

        // Known now: no second fetch.
        r.apply(new_message("m2", "c1")).await.unwrap();
        assert_eq!(api.calls("get_chat"), 1);
    }

    #[tokio::test]
    async fn applying_the_same_message_twice_stores_one_row() {
        let api = FakeApi::new();
        api.add_chat(chat_dto("c1", &["me", "u2"]));
        let (r, store) = reconciler(&api);

        r.apply(new_message("m1", "c1")).await.unwrap();
        r.apply(new_message("m1", "c1")).await.unwrap();

        let messages = store
            .messages_for_chat(ChatId::from("c1"), 50, None)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].delivery_status, DeliveryStatus::Sent);
    }

    #[tokio::test]
    async fn message_for_unfetchable_chat_is_dropped() {
        let api = FakeApi::new();
        let (r, store) = reconciler(&api);

        r.apply(new_message("m1", "missing")).await.unwrap();
        assert!(store.get_message(MessageId::from("m1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_before_create_is_a_noop_and_create_still_lands() {
        let api = FakeApi::new();
        api.add_chat(chat_dto("c1", &["me", "u2"]));
        let (r, store) = reconciler(&api);

        r.apply(deleted("m1")).await.unwrap();
        r.apply(new_message("m1", "c1")).await.unwrap();
        assert!(store.get_message(MessageId::from("m1")).await.unwrap().is_some());

        r.apply(deleted("m1")).await.unwrap();
        assert!(store.get_message(MessageId::from("m1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn roster_change_replaces_participants() {
        let api = FakeApi::new();
        api.add_chat(chat_dto("c1", &["me", "u2", "u3"]));
        let (r, store) = reconciler(&api);
        r.apply(new_message("m1", "c1")).await.unwrap();

        api.add_chat(chat_dto("c1", &["me", "u4"]));
        r.apply(InboundEvent::ChatParticipantsChanged(ChatParticipantsChanged {
            chat_id: ChatId::from("c1"),
        }))
        .await
        .unwrap();

        let chat = store.get_chat(ChatId::from("c1")).await.unwrap().unwrap();
        let ids: Vec<&str> = chat.participants.iter().map(|p| p.user_id.as_str()).collect();
        assert_eq!(ids, vec!["me", "u4"]);
    }

    #[tokio::test]
    async fn own_profile_picture_updates_the_session_mirror() {
        let api = FakeApi::new();
        api.add_chat(chat_dto("c1", &["me", "u2"]));
        let (r, store) = reconciler(&api);
        r.apply(new_message("m1", "c1")).await.unwrap();

        r.apply(InboundEvent::ProfilePictureUpdated(ProfilePictureUpdated {
            user_id: UserId::from("me"),
            new_url: Some("https://cdn/me.png".into()),
        }))
        .await
        .unwrap();

        let me = store.get_participant(UserId::from("me")).await.unwrap().unwrap();
        assert_eq!(me.profile_picture_url.as_deref(), Some("https://cdn/me.png"));
        let creds = r.context.credentials.current().unwrap();
        assert_eq!(creds.profile_picture_url.as_deref(), Some("https://cdn/me.png"));
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_loop() {
        let api = FakeApi::new();
        api.add_chat(chat_dto("c1", &["me", "u2"]));
        let (r, store) = reconciler(&api);

        let (tx, events) = mpsc::channel(8);
        // The roster refresh fails (unknown chat), the message after it lands.
        tx.send(InboundEvent::ChatParticipantsChanged(ChatParticipantsChanged {
            chat_id: ChatId::from("gone"),
        }))
        .await
        .unwrap();
        tx.send(new_message("m1", "c1")).await.unwrap();
        drop(tx);

        r.clone().run(events).await;
        assert!(store.get_message(MessageId::from("m1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn burst_larger_than_the_replay_buffer_is_stored_completely() {
        let api = FakeApi::new();
        api.add_chat(chat_dto("c1", &["me", "u2"]));
        let (r, store) = reconciler(&api);

        let burst = crate::config::ClientConfig::default().replay_capacity * 2;
        let (tx, events) = mpsc::channel(8);
        let producer = tokio::spawn(async move {
            for i in 0..burst {
                tx.send(new_message(&format!("m{i}"), "c1")).await.unwrap();
            }
        });

        r.clone().run(events).await;
        producer.await.unwrap();

        let stored = store
            .messages_for_chat(ChatId::from("c1"), 1_000, None)
            .await
            .unwrap();
        assert_eq!(stored.len(), burst);
    }

    #[tokio::test]
    async fn roster_refresh_keeps_the_newer_local_summary() {
        let api = FakeApi::new();
        let mut remote = chat_dto("c1", &["me", "u2"]);
        remote.last_message = Some(message_dto("old", "c1", "2024-05-01T09:00:00Z"));
        api.add_chat(remote);
        let (r, store) = reconciler(&api);

        r.apply(new_message("new", "c1")).await.unwrap();
        r.apply(InboundEvent::ChatParticipantsChanged(ChatParticipantsChanged {
            chat_id: ChatId::from("c1"),
        }))
        .await
        .unwrap();

        let chat = store.get_chat(ChatId::from("c1")).await.unwrap().unwrap();
        assert_eq!(chat.chat.last_message.unwrap().id, MessageId::from("new"));
    }
}
