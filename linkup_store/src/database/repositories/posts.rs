use crate::database::models::PostRecord;
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub(super) struct SqlitePostRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

fn map_post(row: &Row<'_>) -> rusqlite::Result<PostRecord> {
    Ok(PostRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        body: row.get(2)?,
        file: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl<'conn> super::PostRepository for SqlitePostRepository<'conn> {
    fn create(&self, record: &PostRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO posts (id, userId, body, file, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                record.id,
                record.user_id,
                record.body,
                record.file,
                record.created_at
            ],
        )?;
        Ok(())
    }

    fn update_content(&self, id: &str, body: &str, file: Option<&str>) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE posts SET body = ?2, file = ?3 WHERE id = ?1",
            params![id, body, file],
        )?;
        Ok(changed > 0)
    }

    fn get(&self, id: &str) -> Result<Option<PostRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, userId, body, file, created_at
                FROM posts
                WHERE id = ?1
                "#,
                params![id],
                map_post,
            )
            .optional()?)
    }

    fn list_recent(&self, limit: usize, author: Option<&str>) -> Result<Vec<PostRecord>> {
        // rowid breaks ties between posts created in the same microsecond.
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, userId, body, file, created_at
            FROM posts
            WHERE ?1 IS NULL OR userId = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )?;
        let rows = stmt.query_map(params![author, limit as i64], map_post)?;
        let mut posts = Vec::new();
        for row in rows {
            posts.push(row?);
        }
        Ok(posts)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM posts WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }
}
