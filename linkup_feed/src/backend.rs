use crate::error::Result;
use crate::events::SubscriptionRequest;
use crate::models::{
    AuthorSummary, CommentRow, FeedItem, LikeRecord, NewComment, NewNotification,
    NotificationItem, NotificationRow, PostDetails, PostFields, PostRow,
};
use crate::subscription::Subscription;
use async_trait::async_trait;

/// Contract of the hosted backend the feed is built on.
///
/// Implementations translate transport failures into
/// [`FeedError::Network`](crate::FeedError::Network) and missing rows into
/// [`FeedError::NotFound`](crate::FeedError::NotFound).
#[async_trait]
pub trait Backend: Send + Sync {
    /// Newest-first window of `limit` posts with author, likes and comment counts.
    async fn fetch_page(&self, limit: usize, author: Option<&str>) -> Result<Vec<FeedItem>>;

    /// One post with its full like set and comment list.
    async fn fetch_one(&self, post_id: &str) -> Result<PostDetails>;

    async fn lookup_author(&self, user_id: &str) -> Result<AuthorSummary>;

    /// Opens a live change feed; drop the handle to release it.
    async fn subscribe(&self, request: SubscriptionRequest) -> Result<Subscription>;

    async fn create_like(&self, post_id: &str, user_id: &str) -> Result<LikeRecord>;

    async fn delete_like(&self, post_id: &str, user_id: &str) -> Result<()>;

    async fn create_comment(&self, input: NewComment) -> Result<CommentRow>;

    async fn delete_comment(&self, comment_id: &str) -> Result<()>;

    async fn create_or_update_post(&self, fields: PostFields) -> Result<PostRow>;

    async fn delete_post(&self, post_id: &str) -> Result<()>;

    async fn create_notification(&self, input: NewNotification) -> Result<NotificationRow>;

    /// Notifications addressed to `receiver_id`, newest first.
    async fn fetch_notifications(&self, receiver_id: &str) -> Result<Vec<NotificationItem>>;
}

/// Looks up an author, falling back to a placeholder so one failed lookup
/// never blocks an insert.
pub(crate) async fn resolve_author(
    backend: &dyn Backend,
    user_id: &str,
    timeout: std::time::Duration,
) -> AuthorSummary {
    match tokio::time::timeout(timeout, backend.lookup_author(user_id)).await {
        Ok(Ok(author)) => author,
        Ok(Err(err)) => {
            tracing::warn!(user_id, error = %err, "author lookup failed");
            AuthorSummary::placeholder(user_id)
        }
        Err(_) => {
            tracing::warn!(user_id, ?timeout, "author lookup timed out");
            AuthorSummary::placeholder(user_id)
        }
    }
}
