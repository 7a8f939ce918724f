//! Live view of a single post and its comments.

use crate::backend::{resolve_author, Backend};
use crate::config::FeedConfig;
use crate::counters;
use crate::engine::{send_like, LikeIntent};
use crate::error::{FeedError, Result};
use crate::events::{
    Change, ChangeKind, CommentEvent, DeletedRow, EventFilter, SubscriptionRequest, Topic,
};
use crate::models::{
    AuthorSummary, CommentItem, CommentRow, FeedItem, LikeRecord, NewComment, NewNotification,
};
use crate::subscription::TypedSubscription;
use crate::worker::{WorkerChannels, WorkerHandle};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

pub const COMMENT_NOTIFICATION_TITLE: &str = "commented on your post";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailSnapshot {
    /// `None` until the post has loaded, and after a load that found nothing.
    pub post: Option<FeedItem>,
    /// Newest first.
    pub comments: Vec<CommentItem>,
    pub loading: bool,
    pub not_found: bool,
    pub revision: u64,
    pub last_error: Option<String>,
}

impl DetailSnapshot {
    pub fn comment(&self, id: &str) -> Option<&CommentItem> {
        self.comments.iter().find(|comment| comment.id == id)
    }
}

enum DetailRequest {
    InsertComment(CommentItem),
    RemoveComment {
        comment_id: String,
        reply: oneshot::Sender<bool>,
    },
    ToggleLike {
        reply: oneshot::Sender<Result<LikeIntent>>,
    },
    SettleLike {
        intent: LikeIntent,
        confirmed: std::result::Result<Option<LikeRecord>, String>,
    },
}

/// Handle to the detail view of one post.
pub struct DetailReconciler {
    backend: Arc<dyn Backend>,
    post_id: String,
    viewer: String,
    worker: WorkerHandle<DetailRequest, DetailSnapshot>,
}

impl DetailReconciler {
    /// Subscribes to new comments on `post_id`, then loads the post. Comments
    /// arriving while the post loads are applied once it is in.
    pub async fn open(
        backend: Arc<dyn Backend>,
        config: FeedConfig,
        post_id: impl Into<String>,
        viewer: impl Into<String>,
    ) -> Result<Self> {
        let post_id = post_id.into();
        let viewer = viewer.into();
        let comments = backend
            .subscribe(
                SubscriptionRequest::all(Topic::Comments)
                    .only(ChangeKind::Inserted)
                    .filtered(EventFilter::eq("postId", post_id.clone())),
            )
            .await?
            .typed::<CommentRow>();

        let initial = DetailSnapshot {
            loading: true,
            ..DetailSnapshot::default()
        };
        let worker_backend = backend.clone();
        let worker_post = post_id.clone();
        let worker_viewer = viewer.clone();
        let worker = WorkerHandle::spawn(config.queue_depth, initial, move |channels| {
            DetailWorker::new(worker_backend, config, worker_post, worker_viewer, channels)
                .run(comments)
        });

        tracing::info!(post_id = %post_id, viewer = %viewer, "post detail opened");
        Ok(Self {
            backend,
            post_id,
            viewer,
            worker,
        })
    }

    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    pub fn snapshot(&self) -> DetailSnapshot {
        self.worker.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<DetailSnapshot> {
        self.worker.watch()
    }

    pub async fn wait_until(
        &self,
        predicate: impl FnMut(&DetailSnapshot) -> bool,
    ) -> Result<DetailSnapshot> {
        self.worker.wait_until(predicate).await
    }

    /// Waits for the initial load. Fails with `NotFound` if the post is gone.
    pub async fn ready(&self) -> Result<DetailSnapshot> {
        let snapshot = self.wait_until(|snapshot| !snapshot.loading).await?;
        if snapshot.not_found {
            return Err(FeedError::NotFound(format!("post {}", self.post_id)));
        }
        Ok(snapshot)
    }

    /// Comment author or post owner.
    pub fn can_delete(&self, comment: &CommentItem) -> bool {
        if comment.user_id == self.viewer {
            return true;
        }
        self.worker
            .snapshot()
            .post
            .is_some_and(|post| post.user_id == self.viewer)
    }

    /// Posts a comment as the viewer and notifies the post owner.
    pub async fn submit_comment(&self, text: &str) -> Result<CommentItem> {
        let text = text.trim();
        if text.is_empty() {
            return Err(FeedError::InvalidInput("comment text is empty".into()));
        }
        let post = self
            .worker
            .snapshot()
            .post
            .ok_or_else(|| FeedError::NotFound(format!("post {}", self.post_id)))?;

        let row = self
            .backend
            .create_comment(NewComment {
                post_id: self.post_id.clone(),
                user_id: self.viewer.clone(),
                text: text.to_string(),
            })
            .await?;
        let author = self
            .backend
            .lookup_author(&self.viewer)
            .await
            .unwrap_or_else(|_| AuthorSummary::placeholder(&self.viewer));
        let comment = CommentItem::from_row(row, author);
        self.worker
            .send(DetailRequest::InsertComment(comment.clone()))
            .await?;

        if post.user_id != self.viewer {
            let notification = NewNotification {
                sender_id: self.viewer.clone(),
                receiver_id: post.user_id.clone(),
                title: COMMENT_NOTIFICATION_TITLE.to_string(),
                data: json!({ "postId": self.post_id, "commentId": comment.id }),
            };
            if let Err(err) = self.backend.create_notification(notification).await {
                tracing::warn!(post_id = %self.post_id, error = %err, "comment notification failed");
            }
        }
        Ok(comment)
    }

    /// Deletes a held comment. Returns `false` without touching the backend
    /// when the comment is not shown.
    pub async fn remove_comment(&self, comment_id: &str) -> Result<bool> {
        let snapshot = self.worker.snapshot();
        let Some(comment) = snapshot.comment(comment_id) else {
            return Ok(false);
        };
        if !self.can_delete(comment) {
            return Err(FeedError::Unauthorized(format!(
                "comment {comment_id} cannot be deleted by {}",
                self.viewer
            )));
        }
        self.backend.delete_comment(comment_id).await?;
        self.worker
            .call(|reply| DetailRequest::RemoveComment {
                comment_id: comment_id.to_string(),
                reply,
            })
            .await
    }

    pub async fn toggle_like(&self) -> Result<bool> {
        let intent = self
            .worker
            .call(|reply| DetailRequest::ToggleLike { reply })
            .await??;
        let liked = intent.like;
        let outcome = send_like(self.backend.as_ref(), &intent, &self.viewer).await;
        let confirmed = match &outcome {
            Ok(record) => Ok(record.clone()),
            Err(err) => {
                tracing::warn!(post_id = %self.post_id, error = %err, "like toggle rejected, rolling back");
                Err(err.to_string())
            }
        };
        self.worker
            .send(DetailRequest::SettleLike { intent, confirmed })
            .await?;
        outcome.map(|_| liked)
    }

    pub async fn shutdown(self) {
        self.worker.shutdown().await;
        tracing::info!(post_id = %self.post_id, "post detail closed");
    }
}

struct DetailWorker {
    backend: Arc<dyn Backend>,
    config: FeedConfig,
    post_id: String,
    viewer: String,
    state: DetailSnapshot,
    requests: mpsc::Receiver<DetailRequest>,
    snapshots: watch::Sender<DetailSnapshot>,
    cancel: CancellationToken,
}

impl DetailWorker {
    fn new(
        backend: Arc<dyn Backend>,
        config: FeedConfig,
        post_id: String,
        viewer: String,
        channels: WorkerChannels<DetailRequest, DetailSnapshot>,
    ) -> Self {
        Self {
            backend,
            config,
            post_id,
            viewer,
            state: DetailSnapshot {
                loading: true,
                ..DetailSnapshot::default()
            },
            requests: channels.requests,
            snapshots: channels.snapshots,
            cancel: channels.cancel,
        }
    }

    async fn run(mut self, mut comments: TypedSubscription<CommentRow>) {
        let loaded = tokio::select! {
            () = self.cancel.cancelled() => return,
            loaded = self.backend.fetch_one(&self.post_id) => loaded,
        };
        match loaded {
            Ok(details) => {
                tracing::debug!(
                    post_id = %self.post_id,
                    comments = details.comments.len(),
                    "post detail loaded"
                );
                self.state.post = Some(details.item);
                self.state.comments = details.comments;
            }
            Err(FeedError::NotFound(_)) => {
                tracing::info!(post_id = %self.post_id, "post not found");
                self.state.not_found = true;
            }
            Err(err) => {
                tracing::warn!(post_id = %self.post_id, error = %err, "post detail load failed");
                self.state.last_error = Some(err.to_string());
            }
        }
        self.state.loading = false;
        self.publish();

        let mut comments_open = true;
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                Some(request) = self.requests.recv() => self.handle_request(request),

                event = comments.next_event(), if comments_open => match event {
                    Some(Change::Inserted(row)) => {
                        let author = resolve_author(
                            self.backend.as_ref(),
                            &row.user_id,
                            self.config.lookup_timeout,
                        )
                        .await;
                        self.insert_comment(CommentItem::from_row(row, author));
                    }
                    Some(_) => {}
                    None => {
                        tracing::warn!(post_id = %self.post_id, "comment subscription closed");
                        comments_open = false;
                    }
                },
            }
        }
        tracing::debug!(post_id = %self.post_id, "detail worker stopped");
    }

    fn handle_request(&mut self, request: DetailRequest) {
        match request {
            DetailRequest::InsertComment(comment) => self.insert_comment(comment),
            DetailRequest::RemoveComment { comment_id, reply } => {
                let removed = self.remove_comment(&comment_id);
                let _ = reply.send(removed);
            }
            DetailRequest::ToggleLike { reply } => {
                let _ = reply.send(self.begin_like_toggle());
            }
            DetailRequest::SettleLike { intent, confirmed } => {
                let Some(post) = self.state.post.as_mut() else {
                    return;
                };
                match confirmed {
                    Ok(Some(record)) => {
                        counters::apply_like(post, &Change::Inserted(record));
                    }
                    Ok(None) => {}
                    Err(message) => {
                        counters::apply_like(post, &intent.rollback_event(&self.viewer));
                        self.state.last_error = Some(message);
                    }
                }
                self.publish();
            }
        }
    }

    fn insert_comment(&mut self, comment: CommentItem) {
        if self
            .state
            .comments
            .iter()
            .any(|held| held.id == comment.id)
        {
            tracing::debug!(comment_id = %comment.id, "comment already shown");
            return;
        }
        let event: CommentEvent = Change::Inserted(CommentRow {
            id: comment.id.clone(),
            post_id: comment.post_id.clone(),
            user_id: comment.user_id.clone(),
            text: comment.text.clone(),
            created_at: comment.created_at,
        });
        if let Some(post) = self.state.post.as_mut() {
            counters::apply_comment(post, &event);
        }
        self.state.comments.insert(0, comment);
        self.publish();
    }

    fn remove_comment(&mut self, comment_id: &str) -> bool {
        let Some(index) = self
            .state
            .comments
            .iter()
            .position(|comment| comment.id == comment_id)
        else {
            return false;
        };
        self.state.comments.remove(index);
        if let Some(post) = self.state.post.as_mut() {
            counters::apply_comment(post, &Change::Deleted(DeletedRow::id_only(comment_id)));
        }
        self.publish();
        true
    }

    fn begin_like_toggle(&mut self) -> Result<LikeIntent> {
        let post = self
            .state
            .post
            .as_mut()
            .ok_or_else(|| FeedError::NotFound(format!("post {}", self.post_id)))?;
        let intent = LikeIntent::for_item(post, &self.viewer);
        counters::apply_like(post, &intent.optimistic_event(&self.viewer));
        self.publish();
        Ok(intent)
    }

    fn publish(&mut self) {
        self.state.revision += 1;
        self.snapshots.send_replace(self.state.clone());
    }
}
