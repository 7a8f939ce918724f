use crate::database::models::PostLikeRecord;
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub(super) struct SqliteLikeRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

fn map_like(row: &Row<'_>) -> rusqlite::Result<PostLikeRecord> {
    Ok(PostLikeRecord {
        id: row.get(0)?,
        post_id: row.get(1)?,
        user_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

impl<'conn> super::LikeRepository for SqliteLikeRepository<'conn> {
    fn add(&self, record: &PostLikeRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO postLikes (id, postId, userId, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![record.id, record.post_id, record.user_id, record.created_at],
        )?;
        Ok(())
    }

    fn find(&self, post_id: &str, user_id: &str) -> Result<Option<PostLikeRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, postId, userId, created_at
                FROM postLikes
                WHERE postId = ?1 AND userId = ?2
                "#,
                params![post_id, user_id],
                map_like,
            )
            .optional()?)
    }

    fn list_for_post(&self, post_id: &str) -> Result<Vec<PostLikeRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, postId, userId, created_at
            FROM postLikes
            WHERE postId = ?1
            ORDER BY created_at ASC
            "#,
        )?;
        let rows = stmt.query_map(params![post_id], map_like)?;
        let mut likes = Vec::new();
        for row in rows {
            likes.push(row?);
        }
        Ok(likes)
    }

    fn remove(&self, post_id: &str, user_id: &str) -> Result<Option<PostLikeRecord>> {
        let Some(existing) = self.find(post_id, user_id)? else {
            return Ok(None);
        };
        self.conn
            .execute("DELETE FROM postLikes WHERE id = ?1", params![existing.id])?;
        Ok(Some(existing))
    }
}
