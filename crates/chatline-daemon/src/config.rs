//! Daemon configuration loaded from environment variables.
//!
//! Everything has a default so the daemon starts against a local
//! development server with zero configuration.

use std::path::PathBuf;
use std::time::Duration;

use chatline_client::{ClientConfig, Credentials, RetryConfig};
use chatline_shared::constants::{
    DEFAULT_PAGE_SIZE, DEFAULT_RETRY_BASE_MS, DEFAULT_RETRY_MAX_MS, MAX_PAGE_SIZE,
};
use chatline_shared::UserId;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Base URL of the chat service REST API.
    /// Env: `CHATLINE_API_URL`
    /// Default: `http://localhost:8080/api`
    pub api_url: String,

    /// Realtime endpoint.
    /// Env: `CHATLINE_WS_URL`
    /// Default: `ws://localhost:8080/ws`
    pub ws_url: String,

    /// Session token. Without it the daemon stays disconnected.
    /// Env: `CHATLINE_AUTH_TOKEN`
    pub auth_token: Option<String>,

    /// Env: `CHATLINE_USER_ID`
    pub user_id: String,

    /// Env: `CHATLINE_USERNAME`
    pub username: String,

    /// SQLite database path.
    /// Env: `CHATLINE_DB_PATH`
    /// Default: the platform data directory.
    pub db_path: Option<PathBuf>,

    /// Env: `CHATLINE_PAGE_SIZE`, at most `MAX_PAGE_SIZE`.
    pub page_size: u32,

    /// Env: `CHATLINE_RETRY_BASE_MS`
    pub retry_base_ms: u64,

    /// Env: `CHATLINE_RETRY_MAX_MS`
    pub retry_max_ms: u64,

    /// Device push token to register once signed in.
    /// Env: `CHATLINE_PUSH_TOKEN`
    pub push_token: Option<String>,

    /// Platform name sent along with the push token.
    /// Env: `CHATLINE_PLATFORM`
    /// Default: the host OS name.
    pub platform: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080/api".to_string(),
            ws_url: "ws://localhost:8080/ws".to_string(),
            auth_token: None,
            user_id: "local".to_string(),
            username: "local".to_string(),
            db_path: None,
            page_size: DEFAULT_PAGE_SIZE,
            retry_base_ms: DEFAULT_RETRY_BASE_MS,
            retry_max_ms: DEFAULT_RETRY_MAX_MS,
            push_token: None,
            platform: std::env::consts::OS.to_string(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("CHATLINE_API_URL") {
            config.api_url = url;
        }
        if let Some(url) = non_empty("CHATLINE_WS_URL") {
            config.ws_url = url;
        }
        config.auth_token = non_empty("CHATLINE_AUTH_TOKEN");
        if let Some(id) = non_empty("CHATLINE_USER_ID") {
            config.user_id = id;
        }
        if let Some(name) = non_empty("CHATLINE_USERNAME") {
            config.username = name;
        }
        config.db_path = non_empty("CHATLINE_DB_PATH").map(PathBuf::from);

        if let Some(val) = non_empty("CHATLINE_PAGE_SIZE") {
            match val.parse::<u32>() {
                Ok(n) if (1..=MAX_PAGE_SIZE).contains(&n) => config.page_size = n,
                _ => tracing::warn!(value = %val, "Invalid CHATLINE_PAGE_SIZE, using default"),
            }
        }
        if let Some(val) = non_empty("CHATLINE_RETRY_BASE_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => config.retry_base_ms = ms,
                _ => tracing::warn!(value = %val, "Invalid CHATLINE_RETRY_BASE_MS, using default"),
            }
        }
        if let Some(val) = non_empty("CHATLINE_RETRY_MAX_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => config.retry_max_ms = ms,
                _ => tracing::warn!(value = %val, "Invalid CHATLINE_RETRY_MAX_MS, using default"),
            }
        }
        if config.retry_max_ms < config.retry_base_ms {
            tracing::warn!(
                base_ms = config.retry_base_ms,
                max_ms = config.retry_max_ms,
                "Retry maximum below base delay, raising it"
            );
            config.retry_max_ms = config.retry_base_ms;
        }

        config.push_token = non_empty("CHATLINE_PUSH_TOKEN");
        if let Some(platform) = non_empty("CHATLINE_PLATFORM") {
            config.platform = platform;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    /// The session to start with, if a token was configured.
    pub fn credentials(&self) -> Option<Credentials> {
        self.auth_token.as_ref().map(|token| Credentials {
            token: token.clone(),
            user_id: UserId(self.user_id.clone()),
            username: self.username.clone(),
            profile_picture_url: None,
        })
    }

    pub fn client_config(&self) -> ClientConfig {
        let defaults = ClientConfig::default();
        ClientConfig {
            retry: RetryConfig {
                base_delay: Duration::from_millis(self.retry_base_ms),
                max_delay: Duration::from_millis(self.retry_max_ms),
                ..defaults.retry.clone()
            },
            page_size: self.page_size,
            ..defaults
        }
    }
}
