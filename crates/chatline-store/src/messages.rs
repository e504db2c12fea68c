use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use chatline_shared::{ChatId, MessageId, UserId};

use crate::database::{ts_from_sql, ts_to_sql, Database};
use crate::error::{Result, StoreError};
use crate::models::{DeliveryStatus, Message};

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, content, created_at, delivery_status";

impl Database {
    /// Insert or overwrite a message by id, refreshing the owning chat's
    /// last-message summary when this message is the newest.
    ///
    /// Upserting the same message twice leaves exactly one row.
    pub fn upsert_message(&mut self, message: &Message) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        upsert_message_row(&tx, message)?;
        bump_chat_summary(&tx, message)?;
        tx.commit()?;
        Ok(())
    }

    /// Upsert a page of messages in a single transaction.
    pub fn upsert_messages(&mut self, messages: &[Message]) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        for message in messages {
            upsert_message_row(&tx, message)?;
            bump_chat_summary(&tx, message)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let message = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.as_str()],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Messages of a chat, newest first, optionally strictly older than
    /// `before`.
    pub fn get_messages_for_chat(
        &self,
        chat_id: &ChatId,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE chat_id = ?1 AND (?2 IS NULL OR created_at < ?2)
             ORDER BY created_at DESC, id DESC
             LIMIT ?3"
        ))?;

        let rows = stmt.query_map(
            params![chat_id.as_str(), before.as_ref().map(ts_to_sql), limit],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Delete a message by id.  Returns `false` when it was already absent.
    ///
    /// If the message was the chat's cached last message, the summary is
    /// recomputed from the remaining rows.
    pub fn delete_message(&mut self, id: &MessageId) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;

        let chat_id: Option<String> = tx
            .query_row(
                "SELECT chat_id FROM messages WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(chat_id) = chat_id else {
            return Ok(false);
        };

        tx.execute("DELETE FROM messages WHERE id = ?1", params![id.as_str()])?;
        tx.execute(
            "UPDATE chats SET
                 (last_message_id, last_message_sender_id,
                  last_message_content, last_message_created_at) =
                 (SELECT id, sender_id, content, created_at
                  FROM messages WHERE chat_id = ?1
                  ORDER BY created_at DESC, id DESC LIMIT 1)
             WHERE id = ?1 AND last_message_id = ?2",
            params![chat_id, id.as_str()],
        )?;

        tx.commit()?;
        Ok(true)
    }

    /// Move a message from `from` to `to`.  Returns `false` (and changes
    /// nothing) when the message is missing or not currently in `from`.
    pub fn transition_delivery_status(
        &self,
        id: &MessageId,
        from: DeliveryStatus,
        to: DeliveryStatus,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET delivery_status = ?3 WHERE id = ?1 AND delivery_status = ?2",
            params![id.as_str(), from.as_str(), to.as_str()],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn upsert_message_row(conn: &Connection, m: &Message) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO messages (id, chat_id, sender_id, content, created_at, delivery_status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
             chat_id = excluded.chat_id,
             sender_id = excluded.sender_id,
             content = excluded.content,
             created_at = excluded.created_at,
             delivery_status = excluded.delivery_status",
        params![
            m.id.as_str(),
            m.chat_id.as_str(),
            m.sender_id.as_str(),
            m.content,
            ts_to_sql(&m.created_at),
            m.delivery_status.as_str(),
        ],
    )
}

fn bump_chat_summary(conn: &Connection, m: &Message) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE chats SET
             last_activity_at = MAX(last_activity_at, ?2),
             last_message_id = ?3,
             last_message_sender_id = ?4,
             last_message_content = ?5,
             last_message_created_at = ?2
         WHERE id = ?1
           AND (last_message_created_at IS NULL
                OR last_message_created_at <= ?2
                OR last_message_id = ?3)",
        params![
            m.chat_id.as_str(),
            ts_to_sql(&m.created_at),
            m.id.as_str(),
            m.sender_id.as_str(),
            m.content,
        ],
    )
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let created_str: String = row.get(4)?;
    let status_str: String = row.get(5)?;

    let delivery_status = DeliveryStatus::parse(&status_str).map_err(|e: StoreError| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Message {
        id: MessageId(row.get(0)?),
        chat_id: ChatId(row.get(1)?),
        sender_id: UserId(row.get(2)?),
        content: row.get(3)?,
        created_at: ts_from_sql(4, &created_str)?,
        delivery_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chats::tests::{chat, ts};

    fn message(id: &str, chat_id: &str, at: &str, status: DeliveryStatus) -> Message {
        Message {
            id: MessageId::from(id),
            chat_id: ChatId::from(chat_id),
            sender_id: UserId::from("u1"),
            content: format!("body of {id}"),
            created_at: ts(at),
            delivery_status: status,
        }
    }

    fn db_with_chat() -> Database {
        let mut db = Database::open_in_memory().unwrap();
        db.upsert_chat_with_participants(&chat("c1", &["u1", "u2"], "2024-05-01T00:00:00Z"))
            .unwrap();
        db
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut db = db_with_chat();
        let m = message("m1", "c1", "2024-05-01T10:00:00Z", DeliveryStatus::Sent);
        db.upsert_message(&m).unwrap();
        db.upsert_message(&m).unwrap();

        let all = db.get_messages_for_chat(&ChatId::from("c1"), 50, None).unwrap();
        assert_eq!(all, vec![m]);
    }

    #[test]
    fn newest_message_becomes_chat_summary() {
        let mut db = db_with_chat();
        db.upsert_message(&message("m2", "c1", "2024-05-02T00:00:00Z", DeliveryStatus::Sent))
            .unwrap();
        db.upsert_message(&message("m1", "c1", "2024-05-01T12:00:00Z", DeliveryStatus::Sent))
            .unwrap();

        let c = db.get_chat(&ChatId::from("c1")).unwrap().unwrap();
        let last = c.chat.last_message.unwrap();
        assert_eq!(last.id, MessageId::from("m2"));
        assert_eq!(c.chat.last_activity_at, ts("2024-05-02T00:00:00Z"));
    }

    #[test]
    fn deleting_summary_message_recomputes_it() {
        let mut db = db_with_chat();
        db.upsert_message(&message("m1", "c1", "2024-05-01T12:00:00Z", DeliveryStatus::Sent))
            .unwrap();
        db.upsert_message(&message("m2", "c1", "2024-05-02T00:00:00Z", DeliveryStatus::Sent))
            .unwrap();

        assert!(db.delete_message(&MessageId::from("m2")).unwrap());
        let c = db.get_chat(&ChatId::from("c1")).unwrap().unwrap();
        assert_eq!(c.chat.last_message.unwrap().id, MessageId::from("m1"));

        assert!(db.delete_message(&MessageId::from("m1")).unwrap());
        let c = db.get_chat(&ChatId::from("c1")).unwrap().unwrap();
        assert!(c.chat.last_message.is_none());
    }

    #[test]
    fn delete_of_absent_message_is_a_noop() {
        let mut db = db_with_chat();
        assert!(!db.delete_message(&MessageId::from("ghost")).unwrap());
    }

    #[test]
    fn pages_strictly_before_cursor() {
        let mut db = db_with_chat();
        for (id, at) in [
            ("m1", "2024-05-01T01:00:00Z"),
            ("m2", "2024-05-01T02:00:00Z"),
            ("m3", "2024-05-01T03:00:00Z"),
        ] {
            db.upsert_message(&message(id, "c1", at, DeliveryStatus::Sent))
                .unwrap();
        }

        let page = db
            .get_messages_for_chat(&ChatId::from("c1"), 10, Some(ts("2024-05-01T03:00:00Z")))
            .unwrap();
        let ids: Vec<&str> = page.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m1"]);
    }

    #[test]
    fn status_transition_requires_expected_state() {
        let mut db = db_with_chat();
        let id = MessageId::from("m1");
        db.upsert_message(&message("m1", "c1", "2024-05-01T01:00:00Z", DeliveryStatus::Sending))
            .unwrap();

        assert!(db
            .transition_delivery_status(&id, DeliveryStatus::Sending, DeliveryStatus::Sent)
            .unwrap());
        // Already SENT: a late failure must not downgrade it.
        assert!(!db
            .transition_delivery_status(&id, DeliveryStatus::Sending, DeliveryStatus::Failed)
            .unwrap());
        assert_eq!(
            db.get_message(&id).unwrap().unwrap().delivery_status,
            DeliveryStatus::Sent
        );
    }

    #[test]
    fn message_for_unknown_chat_is_rejected() {
        let mut db = Database::open_in_memory().unwrap();
        let err = db
            .upsert_message(&message("m1", "nope", "2024-05-01T01:00:00Z", DeliveryStatus::Sent))
            .unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
    }
}
