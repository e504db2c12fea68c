//! Upserts and queries for [`Chat`] records and their participant rosters.

use rusqlite::{params, Connection, OptionalExtension};

use chatline_shared::{ChatId, MessageId, UserId};

use crate::database::{ts_from_sql, ts_to_sql, Database};
use crate::error::Result;
use crate::models::{Chat, ChatWithParticipants, LastMessage};
use crate::participants::{participants_for_chat, upsert_participant};

const CHAT_COLUMNS: &str = "id, last_activity_at, last_message_id, last_message_sender_id,
     last_message_content, last_message_created_at";

impl Database {
    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Upsert a chat, its participants and its roster in one transaction.
    ///
    /// The roster is replaced wholesale: cross-reference rows for users no
    /// longer listed are removed.  Participant rows themselves are kept since
    /// they may be shared with other chats.
    pub fn upsert_chat_with_participants(&mut self, chat: &ChatWithParticipants) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        for participant in &chat.participants {
            upsert_participant(&tx, participant)?;
        }
        upsert_chat_row(&tx, &chat.chat)?;

        tx.execute(
            "DELETE FROM chat_participants WHERE chat_id = ?1",
            params![chat.chat.id.as_str()],
        )?;
        for (position, participant) in chat.participants.iter().enumerate() {
            tx.execute(
                "INSERT OR IGNORE INTO chat_participants (chat_id, user_id, position)
                 VALUES (?1, ?2, ?3)",
                params![
                    chat.chat.id.as_str(),
                    participant.user_id.as_str(),
                    position as i64
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Delete a chat together with its roster and messages.  Returns `true`
    /// if a row was deleted.
    pub fn delete_chat(&self, id: &ChatId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM chats WHERE id = ?1", params![id.as_str()])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn chat_exists(&self, id: &ChatId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM chats WHERE id = ?1",
                params![id.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Fetch a single chat with its roster.
    pub fn get_chat(&self, id: &ChatId) -> Result<Option<ChatWithParticipants>> {
        let chat = self
            .conn()
            .query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
                params![id.as_str()],
                row_to_chat,
            )
            .optional()?;

        match chat {
            Some(chat) => {
                let participants = participants_for_chat(self.conn(), &chat.id)?;
                Ok(Some(ChatWithParticipants { chat, participants }))
            }
            None => Ok(None),
        }
    }

    /// List all chats with their current rosters, most recently active first.
    pub fn list_chats_with_participants(&self) -> Result<Vec<ChatWithParticipants>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats ORDER BY last_activity_at DESC, id ASC"
        ))?;

        let rows = stmt.query_map([], row_to_chat)?;

        let mut chats = Vec::new();
        for row in rows {
            let chat = row?;
            let participants = participants_for_chat(self.conn(), &chat.id)?;
            chats.push(ChatWithParticipants { chat, participants });
        }
        Ok(chats)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

// The incoming summary only wins when it is at least as new as the stored one.
const INCOMING_SUMMARY_IS_NEWER: &str = "excluded.last_message_created_at IS NOT NULL
     AND (chats.last_message_created_at IS NULL
          OR excluded.last_message_created_at >= chats.last_message_created_at)";

fn upsert_chat_row(conn: &Connection, chat: &Chat) -> rusqlite::Result<usize> {
    let last = chat.last_message.as_ref();
    let newer = INCOMING_SUMMARY_IS_NEWER;
    conn.execute(
        &format!(
            "INSERT INTO chats (id, last_activity_at, last_message_id, last_message_sender_id,
                                last_message_content, last_message_created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 last_activity_at = MAX(chats.last_activity_at, excluded.last_activity_at),
                 last_message_id = CASE WHEN {newer}
                     THEN excluded.last_message_id ELSE chats.last_message_id END,
                 last_message_sender_id = CASE WHEN {newer}
                     THEN excluded.last_message_sender_id ELSE chats.last_message_sender_id END,
                 last_message_content = CASE WHEN {newer}
                     THEN excluded.last_message_content ELSE chats.last_message_content END,
                 last_message_created_at = CASE WHEN {newer}
                     THEN excluded.last_message_created_at ELSE chats.last_message_created_at END"
        ),
        params![
            chat.id.as_str(),
            ts_to_sql(&chat.last_activity_at),
            last.map(|m| m.id.as_str()),
            last.map(|m| m.sender_id.as_str()),
            last.map(|m| m.content.as_str()),
            last.map(|m| ts_to_sql(&m.created_at)),
        ],
    )
}

/// Map a `rusqlite::Row` selected with `CHAT_COLUMNS` to a [`Chat`].
fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let id: String = row.get(0)?;
    let activity_str: String = row.get(1)?;
    let last_id: Option<String> = row.get(2)?;
    let last_sender: Option<String> = row.get(3)?;
    let last_content: Option<String> = row.get(4)?;
    let last_created: Option<String> = row.get(5)?;

    let last_message = match (last_id, last_sender, last_content, last_created) {
        (Some(id), Some(sender), Some(content), Some(created)) => Some(LastMessage {
            id: MessageId(id),
            sender_id: UserId(sender),
            content,
            created_at: ts_from_sql(5, &created)?,
        }),
        _ => None,
    };

    Ok(Chat {
        id: ChatId(id),
        last_activity_at: ts_from_sql(1, &activity_str)?,
        last_message,
    })
}
