use crate::database::models::NotificationRecord;
use anyhow::Result;
use rusqlite::{params, Connection};

pub(super) struct SqliteNotificationRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

impl<'conn> super::NotificationRepository for SqliteNotificationRepository<'conn> {
    fn create(&self, record: &NotificationRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO notifications (id, senderId, receiverId, title, data, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.id,
                record.sender_id,
                record.receiver_id,
                record.title,
                record.data,
                record.created_at
            ],
        )?;
        Ok(())
    }

    fn list_for_receiver(&self, receiver_id: &str) -> Result<Vec<NotificationRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, senderId, receiverId, title, data, created_at
            FROM notifications
            WHERE receiverId = ?1
            ORDER BY created_at DESC, rowid DESC
            "#,
        )?;
        let rows = stmt.query_map(params![receiver_id], |row| {
            Ok(NotificationRecord {
                id: row.get(0)?,
                sender_id: row.get(1)?,
                receiver_id: row.get(2)?,
                title: row.get(3)?,
                data: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }
}
