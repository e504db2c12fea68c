use thiserror::Error;

/// Failure to decode (or encode) a realtime frame.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}
