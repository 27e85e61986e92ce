// Per-user notifications.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::Database;
use crate::model::{Notification, NotificationStatus};

const NOTIFICATION_COLUMNS: &str = "id, user_id, request_id, content, status, created_at";

fn map_notification(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        request_id: row.get(2)?,
        content: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
    })
}

impl Database {
    pub fn insert_notification(
        &self,
        user_id: i64,
        request_id: Option<i64>,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Notification> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "INSERT INTO notifications (user_id, request_id, content, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5) RETURNING {NOTIFICATION_COLUMNS}"
            ),
            params![user_id, request_id, content, NotificationStatus::Unread, now],
            map_notification,
        )
        .context("failed to insert notification")
    }

    /// Newest first.
    pub fn notifications_for(&self, user_id: i64) -> Result<Vec<Notification>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC"
            ))
            .context("failed to prepare notifications query")?;
        let notifications = stmt
            .query_map(params![user_id], map_notification)
            .context("failed to query notifications")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map notification rows")?;
        Ok(notifications)
    }

    pub fn get_notification(&self, id: i64) -> Result<Option<Notification>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"),
            params![id],
            map_notification,
        )
        .optional()
        .context("failed to load notification")
    }

    pub fn set_notification_status(&self, id: i64, status: NotificationStatus) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE notifications SET status = ?2 WHERE id = ?1",
            params![id, status],
        )
        .context("failed to update notification")?;
        Ok(())
    }

    pub fn unread_notification_count(&self, user_id: i64) -> Result<u64> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND status = ?2",
                params![user_id, NotificationStatus::Unread],
                |row| row.get(0),
            )
            .context("failed to count unread notifications")?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{seed_user, test_db};
    use crate::model::Role;

    #[test]
    fn notifications_start_unread_and_can_be_read() {
        let db = test_db();
        let shop = seed_user(&db, "shop", Role::PrintingShop);
        let now = Utc::now();

        let first = db.insert_notification(shop.id, None, "one", now).unwrap();
        db.insert_notification(shop.id, None, "two", now).unwrap();
        assert_eq!(first.status, NotificationStatus::Unread);
        assert_eq!(db.unread_notification_count(shop.id).unwrap(), 2);

        db.set_notification_status(first.id, NotificationStatus::Read)
            .unwrap();
        assert_eq!(db.unread_notification_count(shop.id).unwrap(), 1);

        let listed = db.notifications_for(shop.id).unwrap();
        assert_eq!(listed[0].content, "two");
        assert_eq!(listed[1].status, NotificationStatus::Read);
    }
}
