// Network collaborators of the chat client: the realtime frame transport
// (WebSocket) and the request/response chat service (HTTP).

pub mod api;
pub mod error;
pub mod transport;
pub mod websocket;

pub use api::{ChatApi, HttpChatApi, TokenSource};
pub use error::{ApiError, TransportError};
pub use transport::{FrameSink, FrameSource, Incoming, RealtimeTransport};
pub use websocket::WsTransport;
