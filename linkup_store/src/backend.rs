use crate::config::DEFAULT_CHANGE_BUFFER;
use crate::database::models::{
    CommentRecord, NotificationRecord, PostLikeRecord, PostRecord, UserRecord,
};
use crate::database::repositories::{
    CommentRepository, LikeRepository, NotificationRepository, PostRepository,
    SqliteRepositories, UserRepository,
};
use crate::database::Database;
use crate::realtime::ChangeHub;
use crate::utils::{now_utc_iso, parse_timestamp};
use async_trait::async_trait;
use linkup_feed::{
    AuthorSummary, Backend, ChangeKind, CommentItem, CommentRow, FeedError, FeedItem, LikeRecord,
    LikeSet, NewComment, NewNotification, NotificationItem, NotificationRow, PostDetails,
    PostFields, PostRow, RawChange, Result, Subscription, SubscriptionRequest, Topic,
};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

/// SQLite-backed implementation of the feed's backend contract.
///
/// Every committed write is published on the [`ChangeHub`], so engines
/// talking to the same backend see each other's changes. Deletes of likes,
/// comments and posts publish only the row id, which is all a hosted
/// backend keeps of a deleted row by default.
#[derive(Clone)]
pub struct LocalBackend {
    database: Database,
    hub: ChangeHub,
}

impl LocalBackend {
    pub fn new(database: Database, hub: ChangeHub) -> Self {
        Self { database, hub }
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Ok(Self::new(
            Database::in_memory()?,
            ChangeHub::new(DEFAULT_CHANGE_BUFFER),
        ))
    }

    pub fn hub(&self) -> &ChangeHub {
        &self.hub
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn create_user(&self, name: &str, image: Option<&str>) -> anyhow::Result<AuthorSummary> {
        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("user name may not be empty");
        }
        let record = UserRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            image: image.map(str::to_string),
            created_at: now_utc_iso(),
        };
        self.database
            .with_repositories(|repos| repos.users().upsert(&record))?;
        tracing::info!(user_id = %record.id, name = %record.name, "user created");
        Ok(author_from(record))
    }

    pub fn list_users(&self) -> anyhow::Result<Vec<AuthorSummary>> {
        let users = self.database.with_repositories(|repos| repos.users().list())?;
        Ok(users.into_iter().map(author_from).collect())
    }

    fn publish_row<T: Serialize>(&self, topic: Topic, kind: ChangeKind, row: &T) {
        let value = match serde_json::to_value(row) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(%topic, error = %err, "failed to encode change row");
                return;
            }
        };
        let change = match kind {
            ChangeKind::Inserted => RawChange::inserted(topic, value),
            ChangeKind::Updated => RawChange::updated(topic, value),
            ChangeKind::Deleted => RawChange::deleted(topic, value),
        };
        self.hub.publish(change);
    }

    fn publish_delete(&self, topic: Topic, id: &str) {
        self.hub.publish(RawChange::deleted(topic, json!({ "id": id })));
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn fetch_page(&self, limit: usize, author: Option<&str>) -> Result<Vec<FeedItem>> {
        self.database
            .with_repositories(|repos| {
                let posts = repos.posts().list_recent(limit, author)?;
                let mut items = Vec::with_capacity(posts.len());
                for post in posts {
                    items.push(feed_item(&repos, post)?);
                }
                Ok(items)
            })
            .map_err(into_feed_error)
    }

    async fn fetch_one(&self, post_id: &str) -> Result<PostDetails> {
        self.database
            .with_repositories(|repos| {
                let Some(post) = repos.posts().get(post_id)? else {
                    return Err(FeedError::NotFound(format!("post {post_id}")).into());
                };
                let item = feed_item(&repos, post)?;
                let mut comments = Vec::new();
                for record in repos.comments().list_for_post(post_id)? {
                    let author = lookup_or_placeholder(&repos, &record.user_id)?;
                    comments.push(CommentItem::from_row(comment_row(record)?, author));
                }
                Ok(PostDetails { item, comments })
            })
            .map_err(into_feed_error)
    }

    async fn lookup_author(&self, user_id: &str) -> Result<AuthorSummary> {
        let user = self
            .database
            .with_repositories(|repos| repos.users().get(user_id))?;
        user.map(author_from)
            .ok_or_else(|| FeedError::NotFound(format!("user {user_id}")))
    }

    async fn subscribe(&self, request: SubscriptionRequest) -> Result<Subscription> {
        Ok(self.hub.subscribe(request))
    }

    async fn create_like(&self, post_id: &str, user_id: &str) -> Result<LikeRecord> {
        let (record, created) = self
            .database
            .transaction(|repos| {
                if repos.posts().get(post_id)?.is_none() {
                    return Err(FeedError::NotFound(format!("post {post_id}")).into());
                }
                if let Some(existing) = repos.likes().find(post_id, user_id)? {
                    return Ok((existing, false));
                }
                let record = PostLikeRecord {
                    id: Uuid::new_v4().to_string(),
                    post_id: post_id.to_string(),
                    user_id: user_id.to_string(),
                    created_at: now_utc_iso(),
                };
                repos.likes().add(&record)?;
                Ok((record, true))
            })
            .map_err(into_feed_error)?;
        let like = like_record(record)?;
        if created {
            self.publish_row(Topic::Likes, ChangeKind::Inserted, &like);
        }
        Ok(like)
    }

    async fn delete_like(&self, post_id: &str, user_id: &str) -> Result<()> {
        let removed = self
            .database
            .with_repositories(|repos| repos.likes().remove(post_id, user_id))?;
        match removed {
            Some(record) => self.publish_delete(Topic::Likes, &record.id),
            None => tracing::debug!(post_id, user_id, "no like to remove"),
        }
        Ok(())
    }

    async fn create_comment(&self, input: NewComment) -> Result<CommentRow> {
        let text = input.text.trim();
        if text.is_empty() {
            return Err(FeedError::InvalidInput("comment text may not be empty".into()));
        }
        let record = CommentRecord {
            id: Uuid::new_v4().to_string(),
            post_id: input.post_id.clone(),
            user_id: input.user_id.clone(),
            text: text.to_string(),
            created_at: now_utc_iso(),
        };
        self.database
            .transaction(|repos| {
                if repos.posts().get(&record.post_id)?.is_none() {
                    return Err(FeedError::NotFound(format!("post {}", record.post_id)).into());
                }
                if repos.users().get(&record.user_id)?.is_none() {
                    return Err(FeedError::NotFound(format!("user {}", record.user_id)).into());
                }
                repos.comments().create(&record)
            })
            .map_err(into_feed_error)?;
        let row = comment_row(record)?;
        self.publish_row(Topic::Comments, ChangeKind::Inserted, &row);
        Ok(row)
    }

    async fn delete_comment(&self, comment_id: &str) -> Result<()> {
        let removed = self
            .database
            .with_repositories(|repos| repos.comments().delete(comment_id))?;
        if !removed {
            return Err(FeedError::NotFound(format!("comment {comment_id}")));
        }
        self.publish_delete(Topic::Comments, comment_id);
        Ok(())
    }

    async fn create_or_update_post(&self, fields: PostFields) -> Result<PostRow> {
        let body = fields.body.trim().to_string();
        let file = fields.file.filter(|file| !file.trim().is_empty());
        if body.is_empty() && file.is_none() {
            return Err(FeedError::InvalidInput("post needs a body or a file".into()));
        }

        match fields.id {
            Some(id) => {
                let record = self
                    .database
                    .transaction(|repos| {
                        let posts = repos.posts();
                        if !posts.update_content(&id, &body, file.as_deref())? {
                            return Err(FeedError::NotFound(format!("post {id}")).into());
                        }
                        posts
                            .get(&id)?
                            .ok_or_else(|| FeedError::NotFound(format!("post {id}")).into())
                    })
                    .map_err(into_feed_error)?;
                let row = post_row(record)?;
                self.publish_row(Topic::Posts, ChangeKind::Updated, &row);
                Ok(row)
            }
            None => {
                let record = PostRecord {
                    id: Uuid::new_v4().to_string(),
                    user_id: fields.user_id,
                    body,
                    file,
                    created_at: now_utc_iso(),
                };
                self.database
                    .transaction(|repos| {
                        if repos.users().get(&record.user_id)?.is_none() {
                            return Err(
                                FeedError::NotFound(format!("user {}", record.user_id)).into()
                            );
                        }
                        repos.posts().create(&record)
                    })
                    .map_err(into_feed_error)?;
                let row = post_row(record)?;
                self.publish_row(Topic::Posts, ChangeKind::Inserted, &row);
                Ok(row)
            }
        }
    }

    async fn delete_post(&self, post_id: &str) -> Result<()> {
        let removed = self
            .database
            .with_repositories(|repos| repos.posts().delete(post_id))?;
        if !removed {
            return Err(FeedError::NotFound(format!("post {post_id}")));
        }
        self.publish_delete(Topic::Posts, post_id);
        Ok(())
    }

    async fn create_notification(&self, input: NewNotification) -> Result<NotificationRow> {
        let record = NotificationRecord {
            id: Uuid::new_v4().to_string(),
            sender_id: input.sender_id,
            receiver_id: input.receiver_id,
            title: input.title,
            data: input.data.to_string(),
            created_at: now_utc_iso(),
        };
        self.database
            .with_repositories(|repos| repos.notifications().create(&record))?;
        let row = notification_row(record)?;
        self.publish_row(Topic::Notifications, ChangeKind::Inserted, &row);
        Ok(row)
    }

    async fn fetch_notifications(&self, receiver_id: &str) -> Result<Vec<NotificationItem>> {
        self.database
            .with_repositories(|repos| {
                let records = repos.notifications().list_for_receiver(receiver_id)?;
                let mut items = Vec::with_capacity(records.len());
                for record in records {
                    let sender = repos.users().get(&record.sender_id)?.map(author_from);
                    items.push(NotificationItem::from_row(notification_row(record)?, sender));
                }
                Ok(items)
            })
            .map_err(into_feed_error)
    }
}

/// Recovers a [`FeedError`] raised inside a repository closure; anything
/// else is a storage failure.
fn into_feed_error(err: anyhow::Error) -> FeedError {
    match err.downcast::<FeedError>() {
        Ok(feed) => feed,
        Err(other) => FeedError::from(other),
    }
}

fn feed_item(repos: &SqliteRepositories<'_>, record: PostRecord) -> anyhow::Result<FeedItem> {
    let author = lookup_or_placeholder(repos, &record.user_id)?;
    let likes = repos
        .likes()
        .list_for_post(&record.id)?
        .into_iter()
        .map(like_record)
        .collect::<anyhow::Result<LikeSet>>()?;
    let comment_count = repos.comments().count_for_post(&record.id)? as u32;
    let mut item = FeedItem::from_row(post_row(record)?, author);
    item.likes = likes;
    item.comment_count = comment_count;
    Ok(item)
}

fn lookup_or_placeholder(
    repos: &SqliteRepositories<'_>,
    user_id: &str,
) -> anyhow::Result<AuthorSummary> {
    Ok(repos
        .users()
        .get(user_id)?
        .map(author_from)
        .unwrap_or_else(|| AuthorSummary::placeholder(user_id)))
}

fn author_from(record: UserRecord) -> AuthorSummary {
    AuthorSummary {
        id: record.id,
        name: record.name,
        avatar: record.image,
    }
}

fn post_row(record: PostRecord) -> anyhow::Result<PostRow> {
    Ok(PostRow {
        created_at: parse_timestamp(&record.created_at)?,
        id: record.id,
        user_id: record.user_id,
        body: record.body,
        file: record.file,
    })
}

fn comment_row(record: CommentRecord) -> anyhow::Result<CommentRow> {
    Ok(CommentRow {
        created_at: parse_timestamp(&record.created_at)?,
        id: record.id,
        post_id: record.post_id,
        user_id: record.user_id,
        text: record.text,
    })
}

fn like_record(record: PostLikeRecord) -> anyhow::Result<LikeRecord> {
    Ok(LikeRecord {
        created_at: Some(parse_timestamp(&record.created_at)?),
        id: Some(record.id),
        post_id: record.post_id,
        user_id: record.user_id,
    })
}

fn notification_row(record: NotificationRecord) -> anyhow::Result<NotificationRow> {
    let data: Value = serde_json::from_str(&record.data)?;
    Ok(NotificationRow {
        created_at: parse_timestamp(&record.created_at)?,
        id: record.id,
        sender_id: record.sender_id,
        receiver_id: record.receiver_id,
        title: record.title,
        data,
    })
}
