//! v001 -- Initial schema creation.
//!
//! Creates `participants`, `chats`, the `chat_participants` join table and
//! `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Participants
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS participants (
    user_id             TEXT PRIMARY KEY NOT NULL,
    username            TEXT NOT NULL,
    profile_picture_url TEXT
);

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id                      TEXT PRIMARY KEY NOT NULL,
    last_activity_at        TEXT NOT NULL,    -- RFC-3339, millisecond precision
    last_message_id         TEXT,
    last_message_sender_id  TEXT,
    last_message_content    TEXT,
    last_message_created_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_chats_last_activity
    ON chats(last_activity_at DESC);

-- ----------------------------------------------------------------
-- Chat <-> participant roster, replaced wholesale per chat
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_participants (
    chat_id  TEXT NOT NULL,
    user_id  TEXT NOT NULL,
    position INTEGER NOT NULL,

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES participants(user_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chat_participants_user
    ON chat_participants(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,
    chat_id         TEXT NOT NULL,
    sender_id       TEXT NOT NULL,
    content         TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    delivery_status TEXT NOT NULL,            -- SENDING | SENT | FAILED

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_created
    ON messages(chat_id, created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
