//! # chatline-client
//!
//! The realtime connection and offline-first sync core.
//!
//! [`ChatClient::start`] spawns the long-lived tasks: the
//! [`ConnectionSupervisor`] that owns the realtime link and the
//! [`SyncReconciler`] that applies its events to the store. UI-facing reads
//! go through [`ChatService`] live queries; writes go through
//! [`OutboundMessageSender`].

pub mod bus;
pub mod chats;
pub mod classify;
pub mod config;
pub mod error;
pub mod history;
pub mod paginator;
pub mod push;
pub mod reconciler;
pub mod retry;
pub mod sender;
pub mod signals;
pub mod state;
pub mod supervisor;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use chatline_net::{ChatApi, RealtimeTransport};
use chatline_shared::ChatId;
use chatline_store::ChatStore;

pub use chats::ChatService;
pub use classify::{classify, ConnectionFailure, ErrorClass};
pub use config::{ClientConfig, RetryConfig};
pub use error::{ClientError, Result};
pub use history::ChatHistory;
pub use paginator::{LoadOutcome, PaginationState, Paginator};
pub use push::PushTokenRegistrar;
pub use reconciler::SyncReconciler;
pub use retry::{RetryDecision, RetryPolicy};
pub use sender::OutboundMessageSender;
pub use signals::{
    ConnectivitySignal, CredentialSignal, Credentials, ForegroundSignal, SessionContext, Signal,
};
pub use state::ConnectionState;
pub use supervisor::{ConnectionHandle, ConnectionSupervisor, SessionInvalidated};

/// A running client: supervisor and reconciler tasks plus the services that
/// sit on top of them.
pub struct ChatClient {
    context: SessionContext,
    connection: ConnectionHandle,
    sender: OutboundMessageSender,
    chats: ChatService,
    push: PushTokenRegistrar,
    supervisor_task: JoinHandle<()>,
    background: Vec<JoinHandle<()>>,
}

impl ChatClient {
    pub fn start(
        context: SessionContext,
        store: ChatStore,
        api: Arc<dyn ChatApi>,
        transport: Arc<dyn RealtimeTransport>,
        config: ClientConfig,
        platform: &str,
    ) -> Self {
        let page_size = config.page_size;
        let (feed_tx, feed_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (connection, supervisor_task) =
            ConnectionSupervisor::spawn_with_feed(context.clone(), transport, config, feed_tx);

        let reconciler =
            SyncReconciler::new(store.clone(), api.clone(), context.clone()).spawn(feed_rx);

        let push = PushTokenRegistrar::new(api.clone(), context.clone(), platform);
        let push_task = push.clone().spawn();

        let sender = OutboundMessageSender::new(
            store.clone(),
            api.clone(),
            connection.clone(),
            context.clone(),
        );
        let chats = ChatService::new(store, api, page_size);

        info!("Chat client started");
        Self {
            context,
            connection,
            sender,
            chats,
            push,
            supervisor_task,
            background: vec![reconciler, push_task],
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn sender(&self) -> &OutboundMessageSender {
        &self.sender
    }

    pub fn chats(&self) -> &ChatService {
        &self.chats
    }

    pub fn history(&self, chat_id: ChatId) -> ChatHistory {
        self.chats.history(chat_id)
    }

    pub fn push(&self) -> &PushTokenRegistrar {
        &self.push
    }

    /// Close the connection and stop every background task.
    pub async fn shutdown(self) {
        self.connection.shutdown().await;
        let _ = self.supervisor_task.await;
        for task in self.background {
            task.abort();
        }
        info!("Chat client stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chatline_shared::{InboundEvent, MessageId, NewMessage, UserId};
    use chatline_store::DeliveryStatus;
    use futures::StreamExt;

    use super::*;
    use crate::testing::{chat_dto, context, fast_config, ts, wait_for_state, FakeApi, FakeTransport};

    #[tokio::test]
    async fn pushed_message_for_unknown_chat_ends_up_in_the_store() {
        let api = FakeApi::new();
        api.add_chat(chat_dto("c1", &["me", "u2"]));
        let transport = FakeTransport::new();
        transport.hold_opens();
        let store = ChatStore::in_memory().unwrap();
        let client = ChatClient::start(
            context(true, true, true),
            store.clone(),
            Arc::new(api.clone()),
            Arc::new(transport.clone()),
            fast_config(),
            "linux",
        );

        wait_for_state(client.connection(), ConnectionState::Connecting).await;
        transport.release_opens();
        wait_for_state(client.connection(), ConnectionState::Connected).await;

        let mut messages = client.chats().watch_messages(ChatId::from("c1"), 20);
        assert!(messages.next().await.unwrap().unwrap().is_empty());

        transport.push_event(&InboundEvent::NewMessage(NewMessage {
            id: MessageId::from("m1"),
            chat_id: ChatId::from("c1"),
            sender_id: UserId::from("u2"),
            content: "hello".into(),
            created_at: ts("2024-05-01T10:00:00Z"),
        }));

        let page = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let page = messages.next().await.unwrap().unwrap();
                if !page.is_empty() {
                    return page;
                }
            }
        })
        .await
        .expect("message should be stored");

        assert_eq!(page[0].id, MessageId::from("m1"));
        assert_eq!(page[0].delivery_status, DeliveryStatus::Sent);
        assert_eq!(api.calls("get_chat"), 1);
        let chat = store.get_chat(ChatId::from("c1")).await.unwrap().unwrap();
        assert_eq!(chat.participants.len(), 2);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn every_event_of_a_burst_is_stored() {
        let api = FakeApi::new();
        api.add_chat(chat_dto("c1", &["me", "u2"]));
        let transport = FakeTransport::new();
        let store = ChatStore::in_memory().unwrap();
        let config = ClientConfig {
            replay_capacity: 4,
            channel_capacity: 8,
            ..fast_config()
        };
        let client = ChatClient::start(
            context(true, true, true),
            store.clone(),
            Arc::new(api.clone()),
            Arc::new(transport.clone()),
            config,
            "linux",
        );
        wait_for_state(client.connection(), ConnectionState::Connected).await;

        for i in 0..100 {
            transport.push_event(&InboundEvent::NewMessage(NewMessage {
                id: MessageId::from(format!("m{i}").as_str()),
                chat_id: ChatId::from("c1"),
                sender_id: UserId::from("u2"),
                content: format!("burst {i}"),
                created_at: ts("2024-05-01T10:00:00Z"),
            }));
        }

        let stored = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let stored = store
                    .messages_for_chat(ChatId::from("c1"), 1_000, None)
                    .await
                    .unwrap()
                    .len();
                if stored == 100 {
                    return stored;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("whole burst should be stored");
        assert_eq!(stored, 100);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn credentials_gate_the_connection_for_any_signal_mix() {
        let transport = FakeTransport::new();
        let ctx = context(false, false, false);
        let client = ChatClient::start(
            ctx.clone(),
            ChatStore::in_memory().unwrap(),
            Arc::new(FakeApi::new()),
            Arc::new(transport.clone()),
            fast_config(),
            "linux",
        );

        for step in 0..8u8 {
            ctx.connectivity.set(step & 1 != 0);
            ctx.foreground.set(step & 2 != 0);
            if step & 4 != 0 {
                ctx.credentials.set(Some(crate::testing::credentials("t1")));
                ctx.credentials.set(None);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(client.state(), ConnectionState::Disconnected, "step {step}");
        }

        client.shutdown().await;
    }
}
