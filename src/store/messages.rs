use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use super::{fmt_datetime, parse_datetime, Store, StoreResult};
use crate::models::*;

impl Store {
    // ==================== Message Operations ====================

    pub fn create_message(&self, message: &mut Message) -> StoreResult<()> {
        let conn = self.conn();
        message.id = Uuid::new_v4().to_string();
        message.created_at = Utc::now();
        message.read = false;

        conn.execute(
            r#"INSERT INTO messages (id, sender_id, receiver_id, content, read, created_at)
               VALUES (?1, ?2, ?3, ?4, 0, ?5)"#,
            params![
                &message.id,
                &message.sender_id,
                &message.receiver_id,
                &message.content,
                fmt_datetime(&message.created_at),
            ],
        )?;
        Ok(())
    }

    /// The most recent `limit` messages exchanged between two users, oldest first
    pub fn list_messages_between(&self, user_a: &str, user_b: &str, limit: i64) -> StoreResult<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"SELECT * FROM messages
               WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1)
               ORDER BY created_at DESC, rowid DESC LIMIT ?3"#,
        )?;
        let mut messages = stmt
            .query_map(params![user_a, user_b, limit], row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Mark everything `sender_id` sent to `receiver_id` as read
    pub fn mark_messages_read(&self, receiver_id: &str, sender_id: &str) -> StoreResult<usize> {
        let conn = self.conn();
        let rows = conn.execute(
            "UPDATE messages SET read = 1 WHERE receiver_id = ?1 AND sender_id = ?2 AND read = 0",
            params![receiver_id, sender_id],
        )?;
        Ok(rows)
    }

    pub fn count_unread(&self, receiver_id: &str) -> StoreResult<i64> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE receiver_id = ?1 AND read = 0",
            params![receiver_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// One entry per chat partner, most recent activity first
    pub fn list_conversations(&self, user_id: &str) -> StoreResult<Vec<Conversation>> {
        let conn = self.conn();

        // Newest message per partner, ties broken by insertion order
        let mut stmt = conn.prepare(
            r#"WITH ranked AS (
                   SELECT m.id, m.sender_id, m.receiver_id, m.content, m.read, m.created_at,
                          m.rowid AS seq,
                          CASE WHEN m.sender_id = ?1 THEN m.receiver_id ELSE m.sender_id END AS partner_id,
                          ROW_NUMBER() OVER (
                              PARTITION BY CASE WHEN m.sender_id = ?1 THEN m.receiver_id ELSE m.sender_id END
                              ORDER BY m.created_at DESC, m.rowid DESC
                          ) AS rn
                   FROM messages m
                   WHERE m.sender_id = ?1 OR m.receiver_id = ?1
               )
               SELECT r.*, u.username AS partner_username, u.profile_picture AS partner_picture,
                      (SELECT COUNT(*) FROM messages x
                       WHERE x.sender_id = r.partner_id AND x.receiver_id = ?1 AND x.read = 0) AS unread_count
               FROM ranked r
               JOIN users u ON u.id = r.partner_id
               WHERE r.rn = 1
               ORDER BY r.created_at DESC, r.seq DESC"#,
        )?;
        let conversations = stmt
            .query_map(params![user_id], |row| {
                Ok(Conversation {
                    partner: UserSummary {
                        id: row.get("partner_id")?,
                        username: row.get("partner_username")?,
                        profile_picture: row.get("partner_picture")?,
                    },
                    last_message: row_to_message(row)?,
                    unread_count: row.get("unread_count")?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(conversations)
    }
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get("id")?,
        sender_id: row.get("sender_id")?,
        receiver_id: row.get("receiver_id")?,
        content: row.get("content")?,
        read: row.get("read")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
    })
}
