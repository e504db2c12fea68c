//! Request/response access to the remote chat service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use tracing::debug;

use chatline_shared::{ChatDto, ChatId, MessageDto, MessageId, ParticipantDto, UserId};

use crate::error::ApiError;

/// Supplies the bearer token for each request.
pub trait TokenSource: Send + Sync {
    fn current_token(&self) -> Option<String>;
}

/// Operations offered by the chat service.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn create_chat(&self, other_user_ids: &[UserId]) -> Result<ChatDto, ApiError>;

    async fn list_chats(&self) -> Result<Vec<ChatDto>, ApiError>;

    async fn get_chat(&self, chat_id: &ChatId) -> Result<ChatDto, ApiError>;

    async fn leave_chat(&self, chat_id: &ChatId) -> Result<(), ApiError>;

    /// Messages strictly older than `before` (newest first), or the newest
    /// page when `before` is `None`.
    async fn list_messages(
        &self,
        chat_id: &ChatId,
        before: Option<DateTime<Utc>>,
        page_size: u32,
    ) -> Result<Vec<MessageDto>, ApiError>;

    async fn delete_message(&self, message_id: &MessageId) -> Result<(), ApiError>;

    async fn search_participant(&self, query: &str) -> Result<ParticipantDto, ApiError>;

    async fn register_device_token(&self, token: &str, platform: &str) -> Result<(), ApiError>;

    async fn unregister_device_token(&self, token: &str) -> Result<(), ApiError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateChatRequest<'a> {
    other_user_ids: &'a [UserId],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceTokenRequest<'a> {
    token: &'a str,
    platform: &'a str,
}

/// [`ChatApi`] over HTTPS + JSON.
#[derive(Clone)]
pub struct HttpChatApi {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl HttpChatApi {
    pub fn new(
        base_url: &str,
        tokens: Arc<dyn TokenSource>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        let token = self
            .tokens
            .current_token()
            .ok_or(ApiError::Unauthenticated)?;
        Ok(request.bearer_auth(token))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = self.authorized(request)?.send().await?;
        debug!(url = %response.url(), status = %response.status(), "chat service response");
        check_status(response.status())?;
        Ok(response)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn create_chat(&self, other_user_ids: &[UserId]) -> Result<ChatDto, ApiError> {
        let request = self
            .client
            .post(self.url("chats"))
            .json(&CreateChatRequest { other_user_ids });
        Ok(self.execute(request).await?.json().await?)
    }

    async fn list_chats(&self) -> Result<Vec<ChatDto>, ApiError> {
        let request = self.client.get(self.url("chats"));
        Ok(self.execute(request).await?.json().await?)
    }

    async fn get_chat(&self, chat_id: &ChatId) -> Result<ChatDto, ApiError> {
        let request = self.client.get(self.url(&format!("chats/{chat_id}")));
        Ok(self.execute(request).await?.json().await?)
    }

    async fn leave_chat(&self, chat_id: &ChatId) -> Result<(), ApiError> {
        let request = self.client.post(self.url(&format!("chats/{chat_id}/leave")));
        self.execute(request).await?;
        Ok(())
    }

    async fn list_messages(
        &self,
        chat_id: &ChatId,
        before: Option<DateTime<Utc>>,
        page_size: u32,
    ) -> Result<Vec<MessageDto>, ApiError> {
        let mut query = vec![("pageSize", page_size.to_string())];
        if let Some(before) = before {
            query.push(("before", cursor_param(&before)));
        }

        let request = self
            .client
            .get(self.url(&format!("chats/{chat_id}/messages")))
            .query(&query);
        Ok(self.execute(request).await?.json().await?)
    }

    async fn delete_message(&self, message_id: &MessageId) -> Result<(), ApiError> {
        let request = self.client.delete(self.url(&format!("messages/{message_id}")));
        self.execute(request).await?;
        Ok(())
    }

    async fn search_participant(&self, query: &str) -> Result<ParticipantDto, ApiError> {
        let request = self
            .client
            .get(self.url("participants/search"))
            .query(&[("query", query)]);
        Ok(self.execute(request).await?.json().await?)
    }

    async fn register_device_token(&self, token: &str, platform: &str) -> Result<(), ApiError> {
        let request = self
            .client
            .post(self.url("devices"))
            .json(&DeviceTokenRequest { token, platform });
        self.execute(request).await?;
        Ok(())
    }

    async fn unregister_device_token(&self, token: &str) -> Result<(), ApiError> {
        let request = self.client.delete(self.url(&format!("devices/{token}")));
        self.execute(request).await?;
        Ok(())
    }
}

/// Exact cursor text; truncating it would skip messages at the page boundary.
fn cursor_param(before: &DateTime<Utc>) -> String {
    before.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn check_status(status: StatusCode) -> Result<(), ApiError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ApiError::Unauthenticated),
        StatusCode::NOT_FOUND => Err(ApiError::NotFound),
        s => Err(ApiError::Status(s.as_u16())),
    }
}
