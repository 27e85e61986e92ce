// Direct messages between users.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::users::{map_user, USER_COLUMNS};
use super::Database;
use crate::model::{Chat, User, UserRef};

const CHAT_SELECT: &str = "SELECT c.id, c.sender_id, c.receiver_id, c.content, c.file_path,
        c.created_at, s.username, r.username
     FROM chats c
     JOIN users s ON s.id = c.sender_id
     JOIN users r ON r.id = c.receiver_id";

fn map_chat(row: &Row<'_>) -> rusqlite::Result<Chat> {
    let sender_id: i64 = row.get(1)?;
    let receiver_id: i64 = row.get(2)?;
    Ok(Chat {
        id: row.get(0)?,
        sender_id,
        receiver_id,
        content: row.get(3)?,
        file_path: row.get(4)?,
        created_at: row.get(5)?,
        sender: UserRef {
            id: sender_id,
            username: row.get(6)?,
        },
        receiver: UserRef {
            id: receiver_id,
            username: row.get(7)?,
        },
    })
}

impl Database {
    pub fn insert_chat(
        &self,
        sender_id: i64,
        receiver_id: i64,
        content: Option<&str>,
        file_path: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Chat> {
        let conn = self.conn();
        let id: i64 = conn
            .query_row(
                "INSERT INTO chats (sender_id, receiver_id, content, file_path, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id",
                params![sender_id, receiver_id, content, file_path, now],
                |row| row.get(0),
            )
            .context("failed to insert chat")?;
        conn.query_row(&format!("{CHAT_SELECT} WHERE c.id = ?1"), params![id], map_chat)
            .context("failed to reload chat")
    }

    /// Every message the user sent or received, oldest first.
    pub fn chats_for_user(&self, user_id: i64) -> Result<Vec<Chat>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "{CHAT_SELECT} WHERE c.sender_id = ?1 OR c.receiver_id = ?1
                 ORDER BY c.created_at, c.id"
            ))
            .context("failed to prepare chats_for_user query")?;
        let chats = stmt
            .query_map(params![user_id], map_chat)
            .context("failed to query chats")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map chat rows")?;
        Ok(chats)
    }

    /// Messages exchanged between two users, oldest first.
    pub fn conversation(&self, a: i64, b: i64) -> Result<Vec<Chat>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "{CHAT_SELECT}
                 WHERE (c.sender_id = ?1 AND c.receiver_id = ?2)
                    OR (c.sender_id = ?2 AND c.receiver_id = ?1)
                 ORDER BY c.created_at, c.id"
            ))
            .context("failed to prepare conversation query")?;
        let chats = stmt
            .query_map(params![a, b], map_chat)
            .context("failed to query conversation")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map chat rows")?;
        Ok(chats)
    }

    /// Distinct users the given user has exchanged messages with.
    pub fn chat_partners(&self, user_id: i64) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE id IN (
                    SELECT receiver_id FROM chats WHERE sender_id = ?1
                    UNION
                    SELECT sender_id FROM chats WHERE receiver_id = ?1)
                 AND id != ?1
                 ORDER BY id"
            ))
            .context("failed to prepare chat_partners query")?;
        let users = stmt
            .query_map(params![user_id], map_user)
            .context("failed to query chat partners")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map user rows")?;
        Ok(users)
    }
}
