//! Upserts and lookups for [`Participant`] records.

use rusqlite::{params, Connection, OptionalExtension};

use chatline_shared::{ChatId, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::Participant;

impl Database {
    /// Insert a participant or refresh its mutable fields.
    pub fn upsert_participant(&self, participant: &Participant) -> Result<()> {
        upsert_participant(self.conn(), participant)?;
        Ok(())
    }

    /// Replace a participant's profile picture.  Returns `false` when the
    /// participant is not known locally.
    pub fn update_participant_picture(&self, user_id: &UserId, url: Option<&str>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE participants SET profile_picture_url = ?2 WHERE user_id = ?1",
            params![user_id.as_str(), url],
        )?;
        Ok(affected > 0)
    }

    pub fn get_participant(&self, user_id: &UserId) -> Result<Option<Participant>> {
        let participant = self
            .conn()
            .query_row(
                "SELECT user_id, username, profile_picture_url
                 FROM participants WHERE user_id = ?1",
                params![user_id.as_str()],
                row_to_participant,
            )
            .optional()?;
        Ok(participant)
    }

    /// Current roster of a chat, in the order the server listed it.
    pub fn participants_for_chat(&self, chat_id: &ChatId) -> Result<Vec<Participant>> {
        participants_for_chat(self.conn(), chat_id)
    }
}

// ---------------------------------------------------------------------------
// Helpers shared with the chat module (usable inside a transaction)
// ---------------------------------------------------------------------------

pub(crate) fn upsert_participant(conn: &Connection, p: &Participant) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO participants (user_id, username, profile_picture_url)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET
             username = excluded.username,
             profile_picture_url = excluded.profile_picture_url",
        params![p.user_id.as_str(), p.username, p.profile_picture_url],
    )
}

pub(crate) fn participants_for_chat(conn: &Connection, chat_id: &ChatId) -> Result<Vec<Participant>> {
    let mut stmt = conn.prepare(
        "SELECT p.user_id, p.username, p.profile_picture_url
         FROM chat_participants cp
         JOIN participants p ON p.user_id = cp.user_id
         WHERE cp.chat_id = ?1
         ORDER BY cp.position ASC",
    )?;

    let rows = stmt.query_map(params![chat_id.as_str()], row_to_participant)?;

    let mut participants = Vec::new();
    for row in rows {
        participants.push(row?);
    }
    Ok(participants)
}

fn row_to_participant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        user_id: UserId(row.get(0)?),
        username: row.get(1)?,
        profile_picture_url: row.get(2)?,
    })
}
