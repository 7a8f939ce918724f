mod comments;
mod likes;
mod notifications;
mod posts;
mod users;

use super::models::{CommentRecord, NotificationRecord, PostLikeRecord, PostRecord, UserRecord};
use anyhow::Result;
use rusqlite::Connection;

pub trait UserRepository {
    fn upsert(&self, record: &UserRecord) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<UserRecord>>;
    fn list(&self) -> Result<Vec<UserRecord>>;
}

pub trait PostRepository {
    fn create(&self, record: &PostRecord) -> Result<()>;
    /// Rewrites body and file. Returns `false` when no such post exists.
    fn update_content(&self, id: &str, body: &str, file: Option<&str>) -> Result<bool>;
    fn get(&self, id: &str) -> Result<Option<PostRecord>>;
    /// Newest first, optionally restricted to one author.
    fn list_recent(&self, limit: usize, author: Option<&str>) -> Result<Vec<PostRecord>>;
    fn delete(&self, id: &str) -> Result<bool>;
}

pub trait CommentRepository {
    fn create(&self, record: &CommentRecord) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<CommentRecord>>;
    /// Newest first.
    fn list_for_post(&self, post_id: &str) -> Result<Vec<CommentRecord>>;
    fn count_for_post(&self, post_id: &str) -> Result<usize>;
    fn delete(&self, id: &str) -> Result<bool>;
}

pub trait LikeRepository {
    fn add(&self, record: &PostLikeRecord) -> Result<()>;
    fn find(&self, post_id: &str, user_id: &str) -> Result<Option<PostLikeRecord>>;
    fn list_for_post(&self, post_id: &str) -> Result<Vec<PostLikeRecord>>;
    /// Deletes the user's like on the post, returning the removed row.
    fn remove(&self, post_id: &str, user_id: &str) -> Result<Option<PostLikeRecord>>;
}

pub trait NotificationRepository {
    fn create(&self, record: &NotificationRecord) -> Result<()>;
    /// Newest first.
    fn list_for_receiver(&self, receiver_id: &str) -> Result<Vec<NotificationRecord>>;
}

pub struct SqliteRepositories<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRepositories<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn users(&self) -> impl UserRepository + '_ {
        users::SqliteUserRepository { conn: self.conn }
    }

    pub fn posts(&self) -> impl PostRepository + '_ {
        posts::SqlitePostRepository { conn: self.conn }
    }

    pub fn comments(&self) -> impl CommentRepository + '_ {
        comments::SqliteCommentRepository { conn: self.conn }
    }

    pub fn likes(&self) -> impl LikeRepository + '_ {
        likes::SqliteLikeRepository { conn: self.conn }
    }

    pub fn notifications(&self) -> impl NotificationRepository + '_ {
        notifications::SqliteNotificationRepository { conn: self.conn }
    }

    pub fn conn(&self) -> &'conn Connection {
        self.conn
    }
}
