//! Tunables of the client core.
//!
//! Everything has a default suitable for a mobile/desktop client; the daemon
//! overrides selected values from the environment.

use std::time::Duration;

use chatline_shared::constants::{
    DEFAULT_MAX_UNKNOWN_ATTEMPTS, DEFAULT_PAGE_SIZE, DEFAULT_RETRY_BASE_MS, DEFAULT_RETRY_MAX_MS,
    EVENT_REPLAY_CAPACITY, KEEPALIVE_INTERVAL_SECS, SEND_TIMEOUT_SECS,
};

/// Reconnect backoff settings.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Fraction of the computed delay that may be shaved off at random
    /// (0.0 = no jitter, 1.0 = anywhere between zero and the full delay).
    pub jitter: f64,

    /// Consecutive UNKNOWN failures after which reconnecting stops.
    pub max_unknown_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_MS),
            jitter: 0.5,
            max_unknown_attempts: DEFAULT_MAX_UNKNOWN_ATTEMPTS,
        }
    }
}

/// Client core configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub retry: RetryConfig,

    /// Interval between keep-alive pings on an open connection.
    /// `None` disables pings.
    pub keepalive_interval: Option<Duration>,

    /// Upper bound for writing one outbound frame.
    pub send_timeout: Duration,

    /// Inbound events kept for subscribers that join late.
    pub replay_capacity: usize,

    /// Capacity of internal command/event channels.
    pub channel_capacity: usize,

    /// Messages requested per history page.
    pub page_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            keepalive_interval: Some(Duration::from_secs(KEEPALIVE_INTERVAL_SECS)),
            send_timeout: Duration::from_secs(SEND_TIMEOUT_SECS),
            replay_capacity: EVENT_REPLAY_CAPACITY,
            channel_capacity: 256,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}
