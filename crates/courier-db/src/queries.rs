use crate::Database;
use crate::models::{MessageRow, NotificationRow, ReactionRow};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        kind: &str,
        attachment: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content, kind, attachment)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, conversation_id, sender_id, content, kind, attachment],
            )?;
            Ok(())
        })
    }

    pub fn get_messages(&self, conversation_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, conversation_id, limit))
    }

    // -- Reactions --

    /// Idempotent upsert keyed by (message_id, user_id, emoji).
    /// Returns true if a row was inserted, false if it already existed.
    pub fn upsert_reaction(
        &self,
        id: &str,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO reactions (id, message_id, user_id, emoji)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, message_id, user_id, emoji],
            )?;
            Ok(inserted == 1)
        })
    }

    /// Idempotent remove. Returns true if a row existed and was deleted.
    pub fn remove_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                rusqlite::params![message_id, user_id, emoji],
            )?;
            Ok(deleted > 0)
        })
    }

    pub fn reactions_for_message(&self, message_id: &str) -> Result<Vec<ReactionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message_id, user_id, emoji, created_at
                 FROM reactions WHERE message_id = ?1",
            )?;

            let rows = stmt
                .query_map([message_id], |row| {
                    Ok(ReactionRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        user_id: row.get(2)?,
                        emoji: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Notifications --

    pub fn create_notification(
        &self,
        id: &str,
        kind: &str,
        sender_id: &str,
        receiver_id: &str,
        metadata: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, kind, sender_id, receiver_id, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, kind, sender_id, receiver_id, metadata],
            )?;
            Ok(())
        })
    }

    pub fn notifications_for_receiver(&self, receiver_id: &str) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, sender_id, receiver_id, is_read, metadata, created_at
                 FROM notifications
                 WHERE receiver_id = ?1
                 ORDER BY created_at DESC",
            )?;

            let rows = stmt
                .query_map([receiver_id], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        kind: row.get(1)?,
                        sender_id: row.get(2)?,
                        receiver_id: row.get(3)?,
                        is_read: row.get(4)?,
                        metadata: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn mark_notification_read(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let updated =
                conn.execute("UPDATE notifications SET is_read = 1 WHERE id = ?1", [id])?;
            Ok(updated > 0)
        })
    }
}

fn query_messages(conn: &Connection, conversation_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, sender_id, content, kind, attachment, created_at
         FROM messages
         WHERE conversation_id = ?1
         ORDER BY created_at DESC
         LIMIT ?2",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![conversation_id, limit], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                sender_id: row.get(2)?,
                content: row.get(3)?,
                kind: row.get(4)?,
                attachment: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}
