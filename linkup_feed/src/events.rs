use crate::error::{FeedError, Result};
use crate::models::{CommentRow, LikeRecord, NotificationRow, PostRow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Tables the backend publishes change events for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "posts")]
    Posts,
    #[serde(rename = "comments")]
    Comments,
    #[serde(rename = "postLikes")]
    Likes,
    #[serde(rename = "notifications")]
    Notifications,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Posts => "posts",
            Topic::Comments => "comments",
            Topic::Likes => "postLikes",
            Topic::Notifications => "notifications",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    #[serde(rename = "INSERT")]
    Inserted,
    #[serde(rename = "UPDATE")]
    Updated,
    #[serde(rename = "DELETE")]
    Deleted,
}

/// Untyped change notification as delivered by the realtime stream.
///
/// `new` holds the row after an insert or update; `old` holds what the
/// server kept of the row before an update or delete, which for deletes is
/// usually just the primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    #[serde(rename = "table")]
    pub topic: Topic,
    #[serde(rename = "eventType")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub new: Value,
    #[serde(default)]
    pub old: Value,
}

impl RawChange {
    pub fn inserted(topic: Topic, row: Value) -> Self {
        Self {
            topic,
            kind: ChangeKind::Inserted,
            new: row,
            old: Value::Null,
        }
    }

    pub fn updated(topic: Topic, row: Value) -> Self {
        Self {
            topic,
            kind: ChangeKind::Updated,
            new: row,
            old: Value::Null,
        }
    }

    pub fn deleted(topic: Topic, old: Value) -> Self {
        Self {
            topic,
            kind: ChangeKind::Deleted,
            new: Value::Null,
            old,
        }
    }

    /// The row image a column filter is evaluated against.
    fn filter_image(&self) -> &Value {
        match self.kind {
            ChangeKind::Deleted => &self.old,
            _ => &self.new,
        }
    }
}

/// Server-side equality filter in the `column=eq.value` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub column: String,
    pub value: String,
}

impl EventFilter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let (column, value) = raw
            .split_once("=eq.")
            .ok_or_else(|| FeedError::InvalidInput(format!("unsupported filter '{raw}'")))?;
        if column.is_empty() {
            return Err(FeedError::InvalidInput(format!("filter '{raw}' names no column")));
        }
        Ok(Self::eq(column, value))
    }

    pub fn matches(&self, row: &Value) -> bool {
        match row.get(&self.column) {
            Some(Value::String(text)) => *text == self.value,
            Some(Value::Number(number)) => number.to_string() == self.value,
            _ => false,
        }
    }
}

impl fmt::Display for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

/// What a subscriber wants from one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub topic: Topic,
    pub kind: Option<ChangeKind>,
    pub filter: Option<EventFilter>,
}

impl SubscriptionRequest {
    pub fn all(topic: Topic) -> Self {
        Self {
            topic,
            kind: None,
            filter: None,
        }
    }

    pub fn only(mut self, kind: ChangeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn filtered(mut self, filter: EventFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn matches(&self, change: &RawChange) -> bool {
        if change.topic != self.topic {
            return false;
        }
        if let Some(kind) = self.kind {
            if change.kind != kind {
                return false;
            }
        }
        match &self.filter {
            Some(filter) => filter.matches(change.filter_image()),
            None => true,
        }
    }

    /// Human-readable channel name used in logs.
    pub fn channel_name(&self) -> String {
        match &self.filter {
            Some(filter) => format!("{}:{}", self.topic, filter),
            None => self.topic.to_string(),
        }
    }
}

/// Whatever a delete payload carried about the removed row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedRow {
    pub id: String,
    #[serde(rename = "postId", default)]
    pub post_id: Option<String>,
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
}

impl DeletedRow {
    pub fn id_only(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            post_id: None,
            user_id: None,
        }
    }
}

/// A change on one table, narrowed to that table's row type.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<R> {
    Inserted(R),
    Updated(R),
    Deleted(DeletedRow),
}

pub type PostEvent = Change<PostRow>;
pub type CommentEvent = Change<CommentRow>;
pub type LikeEvent = Change<LikeRecord>;
pub type NotificationEvent = Change<NotificationRow>;

/// Row types that belong to a realtime topic.
pub trait TopicRow: DeserializeOwned + Send + 'static {
    const TOPIC: Topic;

    /// Primary key of the row, if it has one yet.
    fn row_id(&self) -> Option<&str>;
}

impl TopicRow for PostRow {
    const TOPIC: Topic = Topic::Posts;

    fn row_id(&self) -> Option<&str> {
        Some(&self.id)
    }
}

impl TopicRow for CommentRow {
    const TOPIC: Topic = Topic::Comments;

    fn row_id(&self) -> Option<&str> {
        Some(&self.id)
    }
}

impl TopicRow for LikeRecord {
    const TOPIC: Topic = Topic::Likes;

    fn row_id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

impl TopicRow for NotificationRow {
    const TOPIC: Topic = Topic::Notifications;

    fn row_id(&self) -> Option<&str> {
        Some(&self.id)
    }
}

impl<R: TopicRow> Change<R> {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Change::Inserted(_) => ChangeKind::Inserted,
            Change::Updated(_) => ChangeKind::Updated,
            Change::Deleted(_) => ChangeKind::Deleted,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Change::Inserted(row) | Change::Updated(row) => row.row_id(),
            Change::Deleted(deleted) => Some(&deleted.id),
        }
    }
}

impl<R: TopicRow> TryFrom<RawChange> for Change<R> {
    type Error = FeedError;

    fn try_from(change: RawChange) -> Result<Self> {
        if change.topic != R::TOPIC {
            return Err(FeedError::InvalidInput(format!(
                "expected a {} change, got {}",
                R::TOPIC,
                change.topic
            )));
        }
        Ok(match change.kind {
            ChangeKind::Inserted => Change::Inserted(decode(R::TOPIC, change.new)?),
            ChangeKind::Updated => Change::Updated(decode(R::TOPIC, change.new)?),
            ChangeKind::Deleted => Change::Deleted(decode(R::TOPIC, change.old)?),
        })
    }
}

fn decode<T: DeserializeOwned>(topic: Topic, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|source| FeedError::MalformedRow { topic, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn narrows_post_insert() {
        let raw = RawChange::inserted(
            Topic::Posts,
            json!({"id": "p1", "userId": "u1", "body": "hi", "created_at": "2024-03-01T12:00:00Z"}),
        );
        let event = PostEvent::try_from(raw).expect("narrow");
        match event {
            Change::Inserted(row) => {
                assert_eq!(row.id, "p1");
                assert_eq!(row.user_id, "u1");
                assert_eq!(row.file, None);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn like_delete_keeps_only_what_payload_has() {
        let raw = RawChange::deleted(Topic::Likes, json!({"id": "l5"}));
        let event = LikeEvent::try_from(raw).expect("narrow");
        assert_eq!(event, Change::Deleted(DeletedRow::id_only("l5")));
    }

    #[test]
    fn rejects_rows_from_other_topics() {
        let raw = RawChange::deleted(Topic::Comments, json!({"id": "c1"}));
        assert!(matches!(
            LikeEvent::try_from(raw),
            Err(FeedError::InvalidInput(_))
        ));
    }

    #[test]
    fn malformed_rows_are_reported() {
        let raw = RawChange::inserted(Topic::Comments, json!({"id": "c1"}));
        assert!(matches!(
            CommentEvent::try_from(raw),
            Err(FeedError::MalformedRow { topic: Topic::Comments, .. })
        ));
    }

    #[test]
    fn wire_shape_uses_backend_names() {
        let raw: RawChange = serde_json::from_value(json!({
            "table": "postLikes",
            "eventType": "INSERT",
            "new": {"id": "l1", "postId": "p1", "userId": "u1"}
        }))
        .expect("decode change");
        assert_eq!(raw.topic, Topic::Likes);
        assert_eq!(raw.kind, ChangeKind::Inserted);
        assert_eq!(raw.old, Value::Null);
    }

    #[test]
    fn request_filters_by_kind_and_column() {
        let request = SubscriptionRequest::all(Topic::Comments)
            .only(ChangeKind::Inserted)
            .filtered(EventFilter::parse("postId=eq.p1").expect("filter"));
        let matching = RawChange::inserted(Topic::Comments, json!({"postId": "p1"}));
        let other_post = RawChange::inserted(Topic::Comments, json!({"postId": "p2"}));
        let delete = RawChange::deleted(Topic::Comments, json!({"postId": "p1"}));
        assert!(request.matches(&matching));
        assert!(!request.matches(&other_post));
        assert!(!request.matches(&delete));
        assert_eq!(request.channel_name(), "comments:postId=eq.p1");
    }

    #[test]
    fn filter_parse_rejects_other_operators() {
        assert!(EventFilter::parse("postId=gt.3").is_err());
        assert!(EventFilter::parse("=eq.3").is_err());
    }
}
