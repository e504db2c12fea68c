//! # chatline-store
//!
//! Local durable cache for chatline, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed upsert/query helpers for chats,
//! participants and messages, and an async [`ChatStore`] handle that runs
//! those helpers on the blocking pool and turns every write into a change
//! notification so readers can follow live query streams.

pub mod chats;
pub mod database;
pub mod handle;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod participants;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use handle::{ChatStore, LiveQuery, StoreChange};
pub use models::*;
