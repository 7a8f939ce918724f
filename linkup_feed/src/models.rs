use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Denormalized user fields copied onto posts, comments and notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "image", default)]
    pub avatar: Option<String>,
}

impl AuthorSummary {
    /// Stand-in used when an author lookup fails; carries only the id.
    pub fn placeholder(user_id: impl Into<String>) -> Self {
        Self {
            id: user_id.into(),
            name: String::new(),
            avatar: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.name.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRow {
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub file: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRow {
    pub id: String,
    #[serde(rename = "postId")]
    pub post_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A like row. `id` is `None` for an optimistic like the server has not
/// confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "postId")]
    pub post_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl LikeRecord {
    pub fn pending(post_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: None,
            post_id: post_id.into(),
            user_id: user_id.into(),
            created_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRow {
    pub id: String,
    #[serde(rename = "senderId")]
    pub sender_id: String,
    #[serde(rename = "receiverId")]
    pub receiver_id: String,
    pub title: String,
    #[serde(default)]
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

/// Likes on one item, at most one per user id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<LikeRecord>", into = "Vec<LikeRecord>")]
pub struct LikeSet {
    by_user: BTreeMap<String, LikeRecord>,
}

impl LikeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a like unless the user already has one. A confirmed id is
    /// copied onto a pending entry, which does not count as a change.
    pub fn insert(&mut self, record: LikeRecord) -> bool {
        match self.by_user.get_mut(&record.user_id) {
            Some(existing) => {
                if existing.id.is_none() && record.id.is_some() {
                    existing.id = record.id;
                    existing.created_at = record.created_at.or(existing.created_at);
                }
                false
            }
            None => {
                self.by_user.insert(record.user_id.clone(), record);
                true
            }
        }
    }

    pub fn remove_user(&mut self, user_id: &str) -> Option<LikeRecord> {
        self.by_user.remove(user_id)
    }

    pub fn remove_like(&mut self, like_id: &str) -> Option<LikeRecord> {
        let user_id = self
            .by_user
            .values()
            .find(|like| like.id.as_deref() == Some(like_id))
            .map(|like| like.user_id.clone())?;
        self.by_user.remove(&user_id)
    }

    pub fn contains_user(&self, user_id: &str) -> bool {
        self.by_user.contains_key(user_id)
    }

    pub fn get(&self, user_id: &str) -> Option<&LikeRecord> {
        self.by_user.get(user_id)
    }

    pub fn len(&self) -> usize {
        self.by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LikeRecord> {
        self.by_user.values()
    }

    pub fn user_ids(&self) -> impl Iterator<Item = &str> {
        self.by_user.keys().map(String::as_str)
    }
}

impl From<Vec<LikeRecord>> for LikeSet {
    fn from(records: Vec<LikeRecord>) -> Self {
        records.into_iter().collect()
    }
}

impl From<LikeSet> for Vec<LikeRecord> {
    fn from(set: LikeSet) -> Self {
        set.by_user.into_values().collect()
    }
}

impl FromIterator<LikeRecord> for LikeSet {
    fn from_iter<I: IntoIterator<Item = LikeRecord>>(iter: I) -> Self {
        let mut set = LikeSet::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

/// A post as shown in the feed: denormalized author, like set and comment count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub user_id: String,
    pub author: AuthorSummary,
    pub body: String,
    pub file: Option<String>,
    pub created_at: DateTime<Utc>,
    pub likes: LikeSet,
    pub comment_count: u32,
}

impl FeedItem {
    /// Builds a freshly inserted item: no likes, no comments.
    pub fn from_row(row: PostRow, author: AuthorSummary) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            author,
            body: row.body,
            file: row.file,
            created_at: row.created_at,
            likes: LikeSet::new(),
            comment_count: 0,
        }
    }

    pub fn liked_by(&self, user_id: &str) -> bool {
        self.likes.contains_user(user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentItem {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub author: AuthorSummary,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl CommentItem {
    pub fn from_row(row: CommentRow, author: AuthorSummary) -> Self {
        Self {
            id: row.id,
            post_id: row.post_id,
            user_id: row.user_id,
            author,
            text: row.text,
            created_at: row.created_at,
        }
    }
}

/// A single post with its full comment list, newest comment first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostDetails {
    pub item: FeedItem,
    pub comments: Vec<CommentItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationItem {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub sender: Option<AuthorSummary>,
    pub title: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

impl NotificationItem {
    pub fn from_row(row: NotificationRow, sender: Option<AuthorSummary>) -> Self {
        Self {
            id: row.id,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            sender,
            title: row.title,
            data: row.data,
            created_at: row.created_at,
        }
    }

    /// Post the notification points at, when the payload names one.
    pub fn post_id(&self) -> Option<&str> {
        self.data.get("postId").and_then(Value::as_str)
    }
}

/// Input for `create_or_update_post`; `id` selects update over insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostFields {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub body: String,
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComment {
    #[serde(rename = "postId")]
    pub post_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    #[serde(rename = "senderId")]
    pub sender_id: String,
    #[serde(rename = "receiverId")]
    pub receiver_id: String,
    pub title: String,
    pub data: Value,
}
