//! Scripted stand-ins for the network collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};

use chatline_net::{
    ApiError, ChatApi, FrameSink, FrameSource, Incoming, RealtimeTransport, TransportError,
};
use chatline_shared::{ChatDto, ChatId, InboundEvent, MessageDto, MessageId, ParticipantDto, UserId};

use crate::config::{ClientConfig, RetryConfig};
use crate::signals::{Credentials, SessionContext, Signal};
use crate::state::ConnectionState;
use crate::supervisor::ConnectionHandle;

pub(crate) fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

pub(crate) fn credentials(token: &str) -> Credentials {
    Credentials {
        token: token.to_string(),
        user_id: UserId::from("me"),
        username: "me".to_string(),
        profile_picture_url: None,
    }
}

pub(crate) fn context(signed_in: bool, online: bool, foreground: bool) -> SessionContext {
    SessionContext::new(
        Signal::new(signed_in.then(|| credentials("t1"))),
        Signal::new(online),
        Signal::new(foreground),
    )
}

pub(crate) fn fast_config() -> ClientConfig {
    ClientConfig {
        retry: RetryConfig {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            jitter: 0.5,
            max_unknown_attempts: 5,
        },
        keepalive_interval: None,
        send_timeout: Duration::from_secs(1),
        ..ClientConfig::default()
    }
}

pub(crate) async fn wait_for_state(handle: &ConnectionHandle, state: ConnectionState) {
    let mut rx = handle.watch_state();
    let reached = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == state))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);
    assert!(reached, "expected {state}, still {}", handle.state());
}

pub(crate) fn participant(id: &str) -> ParticipantDto {
    ParticipantDto {
        user_id: UserId::from(id),
        username: format!("user-{id}"),
        profile_picture_url: None,
    }
}

pub(crate) fn chat_dto(id: &str, members: &[&str]) -> ChatDto {
    ChatDto {
        id: ChatId::from(id),
        participants: members.iter().map(|m| participant(m)).collect(),
        last_activity_at: ts("2024-05-01T00:00:00Z"),
        last_message: None,
    }
}

pub(crate) fn message_dto(id: &str, chat_id: &str, at: &str) -> MessageDto {
    MessageDto {
        id: MessageId::from(id),
        chat_id: ChatId::from(chat_id),
        sender_id: UserId::from("other"),
        content: format!("body of {id}"),
        created_at: ts(at),
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TransportState {
    opens: usize,
    last_token: Option<String>,
    failures: VecDeque<TransportError>,
    link: Option<mpsc::UnboundedSender<Result<Incoming, TransportError>>>,
    sent: Vec<String>,
    fail_sends: bool,
    silent_peer: bool,
}

/// In-process transport: tests push inbound frames and inspect what was
/// written.
#[derive(Clone)]
pub(crate) struct FakeTransport {
    state: Arc<Mutex<TransportState>>,
    gate: Arc<watch::Sender<bool>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            state: Arc::new(Mutex::new(TransportState::default())),
            gate: Arc::new(gate),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn opens(&self) -> usize {
        self.lock().opens
    }

    pub(crate) fn last_token(&self) -> Option<String> {
        self.lock().last_token.clone()
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    /// Make the next open attempt fail with `error`.
    pub(crate) fn fail_next_open(&self, error: TransportError) {
        self.lock().failures.push_back(error);
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    /// Park open attempts until [`release_opens`](Self::release_opens).
    pub(crate) fn hold_opens(&self) {
        self.gate.send_replace(false);
    }

    pub(crate) fn release_opens(&self) {
        self.gate.send_replace(true);
    }

    pub(crate) fn push_frame(&self, text: &str) {
        if let Some(link) = &self.lock().link {
            let _ = link.send(Ok(Incoming::Text(text.to_string())));
        }
    }

    /// Keep the link open but stop answering pings.
    pub(crate) fn silence_peer(&self) {
        self.lock().silent_peer = true;
    }

    pub(crate) fn push_event(&self, event: &InboundEvent) {
        self.push_frame(&event.encode().unwrap());
    }

    /// Close the current link from the server side.
    pub(crate) fn drop_link(&self) {
        self.lock().link = None;
    }
}

#[async_trait]
impl RealtimeTransport for FakeTransport {
    async fn open(
        &self,
        auth_token: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), TransportError> {
        {
            let mut state = self.lock();
            state.opens += 1;
            state.last_token = Some(auth_token.to_string());
        }

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let mut state = self.lock();
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.link = Some(tx);
        Ok((
            Box::new(FakeSink {
                state: self.state.clone(),
            }),
            Box::new(FakeSource { rx }),
        ))
    }
}

struct FakeSink {
    state: Arc<Mutex<TransportState>>,
}

#[async_trait]
impl FrameSink for FakeSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sends {
            return Err(TransportError::Closed("write failed".to_string()));
        }
        state.sent.push(text);
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        let state = self.state.lock().unwrap();
        if !state.silent_peer {
            if let Some(link) = &state.link {
                let _ = link.send(Ok(Incoming::Heartbeat));
            }
        }
        Ok(())
    }

    async fn close(&mut self) {}
}

struct FakeSource {
    rx: mpsc::UnboundedReceiver<Result<Incoming, TransportError>>,
}

#[async_trait]
impl FrameSource for FakeSource {
    async fn next_frame(&mut self) -> Option<Result<Incoming, TransportError>> {
        self.rx.recv().await
    }
}

// ---------------------------------------------------------------------------
// Chat service
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ApiState {
    chats: HashMap<ChatId, ChatDto>,
    messages: HashMap<ChatId, Vec<MessageDto>>,
    participants: Vec<ParticipantDto>,
    devices: Vec<(String, String)>,
    calls: HashMap<&'static str, usize>,
    failing: bool,
    next_chat: usize,
}

/// In-memory chat service that counts calls per operation.
#[derive(Clone, Default)]
pub(crate) struct FakeApi {
    state: Arc<Mutex<ApiState>>,
}

impl FakeApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ApiState> {
        self.state.lock().unwrap()
    }

    fn call(&self, name: &'static str) -> Result<MutexGuard<'_, ApiState>, ApiError> {
        let mut state = self.lock();
        *state.calls.entry(name).or_default() += 1;
        if state.failing {
            return Err(ApiError::Status(503));
        }
        Ok(state)
    }

    pub(crate) fn calls(&self, name: &str) -> usize {
        self.lock().calls.get(name).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    pub(crate) fn add_chat(&self, chat: ChatDto) {
        self.lock().chats.insert(chat.id.clone(), chat);
    }

    pub(crate) fn add_participant(&self, participant: ParticipantDto) {
        self.lock().participants.push(participant);
    }

    pub(crate) fn add_messages(&self, messages: Vec<MessageDto>) {
        let mut state = self.lock();
        for m in messages {
            state.messages.entry(m.chat_id.clone()).or_default().push(m);
        }
    }

    pub(crate) fn has_message(&self, id: &MessageId) -> bool {
        self.lock()
            .messages
            .values()
            .any(|ms| ms.iter().any(|m| m.id == *id))
    }

    pub(crate) fn devices(&self) -> Vec<(String, String)> {
        self.lock().devices.clone()
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn create_chat(&self, other_user_ids: &[UserId]) -> Result<ChatDto, ApiError> {
        let mut state = self.call("create_chat")?;
        state.next_chat += 1;
        let mut members: Vec<&str> = vec!["me"];
        members.extend(other_user_ids.iter().map(|u| u.as_str()));
        let chat = chat_dto(&format!("chat-{}", state.next_chat), &members);
        state.chats.insert(chat.id.clone(), chat.clone());
        Ok(chat)
    }

    async fn list_chats(&self) -> Result<Vec<ChatDto>, ApiError> {
        let state = self.call("list_chats")?;
        let mut chats: Vec<ChatDto> = state.chats.values().cloned().collect();
        chats.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(chats)
    }

    async fn get_chat(&self, chat_id: &ChatId) -> Result<ChatDto, ApiError> {
        let state = self.call("get_chat")?;
        state.chats.get(chat_id).cloned().ok_or(ApiError::NotFound)
    }

    async fn leave_chat(&self, chat_id: &ChatId) -> Result<(), ApiError> {
        let mut state = self.call("leave_chat")?;
        state.chats.remove(chat_id).map(|_| ()).ok_or(ApiError::NotFound)
    }

    async fn list_messages(
        &self,
        chat_id: &ChatId,
        before: Option<DateTime<Utc>>,
        page_size: u32,
    ) -> Result<Vec<MessageDto>, ApiError> {
        let state = self.call("list_messages")?;
        let mut page: Vec<MessageDto> = state
            .messages
            .get(chat_id)
            .into_iter()
            .flatten()
            .filter(|m| before.map_or(true, |b| m.created_at < b))
            .cloned()
            .collect();
        page.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        page.truncate(page_size as usize);
        Ok(page)
    }

    async fn delete_message(&self, message_id: &MessageId) -> Result<(), ApiError> {
        let mut state = self.call("delete_message")?;
        for messages in state.messages.values_mut() {
            if let Some(pos) = messages.iter().position(|m| m.id == *message_id) {
                messages.remove(pos);
                return Ok(());
            }
        }
        Err(ApiError::NotFound)
    }

    async fn search_participant(&self, query: &str) -> Result<ParticipantDto, ApiError> {
        let state = self.call("search_participant")?;
        state
            .participants
            .iter()
            .find(|p| p.username == query)
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn register_device_token(&self, token: &str, platform: &str) -> Result<(), ApiError> {
        let mut state = self.call("register_device_token")?;
        state.devices.retain(|(t, _)| t != token);
        state.devices.push((token.to_string(), platform.to_string()));
        Ok(())
    }

    async fn unregister_device_token(&self, token: &str) -> Result<(), ApiError> {
        let mut state = self.call("unregister_device_token")?;
        state.devices.retain(|(t, _)| t != token);
        Ok(())
    }
}
