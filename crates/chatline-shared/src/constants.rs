/// Application name
pub const APP_NAME: &str = "chatline";

/// Default number of messages requested per history page
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Hard upper bound for a history page
pub const MAX_PAGE_SIZE: u32 = 100;

/// Reconnect backoff defaults (milliseconds)
pub const DEFAULT_RETRY_BASE_MS: u64 = 1_000;
pub const DEFAULT_RETRY_MAX_MS: u64 = 30_000;

/// Consecutive UNKNOWN failures tolerated before giving up
pub const DEFAULT_MAX_UNKNOWN_ATTEMPTS: u32 = 5;

/// WebSocket keep-alive ping interval in seconds
pub const KEEPALIVE_INTERVAL_SECS: u64 = 15;

/// Timeout for opening the realtime connection, in seconds
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Timeout for a single outbound frame write, in seconds
pub const SEND_TIMEOUT_SECS: u64 = 10;

/// Inbound events retained for late subscribers
pub const EVENT_REPLAY_CAPACITY: usize = 64;

/// Frame type discriminators
pub const FRAME_NEW_MESSAGE: &str = "NEW_MESSAGE";
pub const FRAME_MESSAGE_DELETED: &str = "MESSAGE_DELETED";
pub const FRAME_PROFILE_PICTURE_UPDATED: &str = "PROFILE_PICTURE_UPDATED";
pub const FRAME_CHAT_PARTICIPANTS_CHANGED: &str = "CHAT_PARTICIPANTS_CHANGED";
pub const FRAME_SEND_MESSAGE: &str = "SEND_MESSAGE";
