//! The feed reconciliation engine.
//!
//! ```text
//! FeedEngine (handle)
//!   └─► FeedWorker (owns FeedPage + ParentIndex)
//!         ├─◄ requests: scroll triggers, likes, confirmed post edits, load results
//!         ├─◄ posts subscription
//!         ├─◄ comments subscription
//!         └─◄ postLikes subscription
//! ```
//!
//! The worker is the only writer of feed state. Everything it applies,
//! whether a live event, a user action or a finished page load, is handled
//! one message at a time against the latest state.

use crate::backend::{resolve_author, Backend};
use crate::config::FeedConfig;
use crate::error::{FeedError, Result};
use crate::events::{
    Change, CommentEvent, DeletedRow, LikeEvent, PostEvent, SubscriptionRequest, Topic,
};
use crate::index::ParentIndex;
use crate::models::{CommentRow, FeedItem, LikeRecord, PostFields, PostRow};
use crate::page::{FeedPage, LoadOutcome, LoadTicket};
use crate::subscription::TypedSubscription;
use crate::worker::{WorkerChannels, WorkerHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// What the presentation layer renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedSnapshot {
    pub items: Vec<FeedItem>,
    pub limit: usize,
    pub exhausted: bool,
    pub loading: bool,
    /// Bumped on every publish.
    pub revision: u64,
    /// Most recent failure worth showing to the user.
    pub last_error: Option<String>,
}

impl FeedSnapshot {
    pub fn get(&self, id: &str) -> Option<&FeedItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.id.as_str()).collect()
    }
}

/// Result of a scroll trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadTrigger {
    Loaded(LoadOutcome),
    /// Another load was already in flight; this trigger was absorbed.
    Coalesced,
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// The signed-in user; owner of likes and posts made through the engine.
    pub viewer: String,
    /// Restricts the feed to one author (profile screen).
    pub author_filter: Option<String>,
}

impl FeedOptions {
    pub fn home(viewer: impl Into<String>) -> Self {
        Self {
            viewer: viewer.into(),
            author_filter: None,
        }
    }

    pub fn profile(viewer: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            viewer: viewer.into(),
            author_filter: Some(author.into()),
        }
    }
}

/// Optimistic like/unlike applied locally before the backend confirms.
#[derive(Debug, Clone)]
pub(crate) struct LikeIntent {
    pub post_id: String,
    pub like: bool,
    /// The viewer's like before the toggle, restored if an unlike fails.
    pub previous: Option<LikeRecord>,
}

impl LikeIntent {
    pub fn for_item(item: &FeedItem, viewer: &str) -> Self {
        let previous = item.likes.get(viewer).cloned();
        Self {
            post_id: item.id.clone(),
            like: previous.is_none(),
            previous,
        }
    }

    pub fn optimistic_event(&self, viewer: &str) -> LikeEvent {
        if self.like {
            Change::Inserted(LikeRecord::pending(&self.post_id, viewer))
        } else {
            self.removal(viewer)
        }
    }

    pub fn rollback_event(&self, viewer: &str) -> LikeEvent {
        match (&self.previous, self.like) {
            (_, true) => self.removal(viewer),
            (Some(previous), false) => Change::Inserted(previous.clone()),
            (None, false) => Change::Inserted(LikeRecord::pending(&self.post_id, viewer)),
        }
    }

    fn removal(&self, viewer: &str) -> LikeEvent {
        Change::Deleted(DeletedRow {
            id: self
                .previous
                .as_ref()
                .and_then(|like| like.id.clone())
                .unwrap_or_default(),
            post_id: Some(self.post_id.clone()),
            user_id: Some(viewer.to_string()),
        })
    }
}

/// Calls the backend for a like toggle.
pub(crate) async fn send_like(
    backend: &dyn Backend,
    intent: &LikeIntent,
    viewer: &str,
) -> Result<Option<LikeRecord>> {
    if intent.like {
        backend.create_like(&intent.post_id, viewer).await.map(Some)
    } else {
        backend.delete_like(&intent.post_id, viewer).await.map(|_| None)
    }
}

pub(crate) enum FeedRequest {
    LoadMore {
        reply: oneshot::Sender<Result<LoadTrigger>>,
    },
    Refresh {
        reply: oneshot::Sender<Result<LoadTrigger>>,
    },
    LoadFinished {
        ticket: LoadTicket,
        result: Result<Vec<FeedItem>>,
    },
    ToggleLike {
        post_id: String,
        reply: oneshot::Sender<Result<LikeIntent>>,
    },
    SettleLike {
        intent: LikeIntent,
        confirmed: std::result::Result<Option<LikeRecord>, String>,
    },
    /// A post mutation the backend already confirmed.
    Confirmed(PostEvent),
}

/// Handle to a running feed. One per mounted screen; dropping it stops
/// the worker and releases all three subscriptions.
pub struct FeedEngine {
    backend: Arc<dyn Backend>,
    options: FeedOptions,
    load_in_flight: Arc<AtomicBool>,
    worker: WorkerHandle<FeedRequest, FeedSnapshot>,
}

impl FeedEngine {
    /// Subscribes to posts, comments and likes, then starts the first load.
    pub async fn start(
        backend: Arc<dyn Backend>,
        config: FeedConfig,
        options: FeedOptions,
    ) -> Result<Self> {
        // Each `?` drops the handles acquired so far, releasing them.
        let posts = backend
            .subscribe(SubscriptionRequest::all(Topic::Posts))
            .await?
            .typed::<PostRow>();
        let comments = backend
            .subscribe(SubscriptionRequest::all(Topic::Comments))
            .await?
            .typed::<CommentRow>();
        let likes = backend
            .subscribe(SubscriptionRequest::all(Topic::Likes))
            .await?
            .typed::<LikeRecord>();

        let load_in_flight = Arc::new(AtomicBool::new(true));
        let initial = FeedSnapshot {
            loading: true,
            ..FeedSnapshot::default()
        };
        let worker_backend = backend.clone();
        let worker_options = options.clone();
        let worker_flag = load_in_flight.clone();
        let worker = WorkerHandle::spawn(config.queue_depth, initial, move |channels| {
            let worker = FeedWorker::new(
                worker_backend,
                config,
                worker_options,
                worker_flag,
                channels,
            );
            worker.run(posts, comments, likes)
        });

        tracing::info!(
            viewer = %options.viewer,
            author_filter = ?options.author_filter,
            "feed engine started"
        );
        Ok(Self {
            backend,
            options,
            load_in_flight,
            worker,
        })
    }

    pub fn viewer(&self) -> &str {
        &self.options.viewer
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.worker.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<FeedSnapshot> {
        self.worker.watch()
    }

    pub async fn wait_until(&self, predicate: impl FnMut(&FeedSnapshot) -> bool) -> Result<FeedSnapshot> {
        self.worker.wait_until(predicate).await
    }

    /// Waits for the outstanding load (initially the first page) to finish.
    pub async fn ready(&self) -> Result<FeedSnapshot> {
        self.wait_until(|snapshot| !snapshot.loading).await
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Scroll trigger: grow the window by one step. Triggers that arrive
    /// while a load is outstanding are coalesced into it.
    pub async fn request_more(&self) -> Result<LoadTrigger> {
        if self.worker.snapshot().exhausted {
            return Ok(LoadTrigger::Exhausted);
        }
        if self.load_in_flight.swap(true, Ordering::AcqRel) {
            tracing::debug!("load already in flight, coalescing scroll trigger");
            return Ok(LoadTrigger::Coalesced);
        }
        self.worker
            .call(|reply| FeedRequest::LoadMore { reply })
            .await?
    }

    /// Re-fetches the current window. Never resets `exhausted`.
    pub async fn refresh(&self) -> Result<LoadTrigger> {
        if self.load_in_flight.swap(true, Ordering::AcqRel) {
            return Ok(LoadTrigger::Coalesced);
        }
        self.worker
            .call(|reply| FeedRequest::Refresh { reply })
            .await?
    }

    /// Likes or unlikes a post for the viewer. The local change is visible
    /// immediately and rolled back if the backend rejects it. Returns
    /// whether the post is now liked.
    pub async fn toggle_like(&self, post_id: &str) -> Result<bool> {
        let intent = self
            .worker
            .call(|reply| FeedRequest::ToggleLike {
                post_id: post_id.to_string(),
                reply,
            })
            .await??;
        let liked = intent.like;
        match send_like(self.backend.as_ref(), &intent, &self.options.viewer).await {
            Ok(confirmed) => {
                self.worker
                    .send(FeedRequest::SettleLike {
                        intent,
                        confirmed: Ok(confirmed),
                    })
                    .await?;
                Ok(liked)
            }
            Err(err) => {
                tracing::warn!(post_id, error = %err, "like toggle rejected, rolling back");
                self.worker
                    .send(FeedRequest::SettleLike {
                        intent,
                        confirmed: Err(err.to_string()),
                    })
                    .await?;
                Err(err)
            }
        }
    }

    /// Creates a post, or edits one when `fields.id` is set. Edits show up
    /// locally as soon as the backend accepts them; new posts arrive
    /// through the posts subscription.
    pub async fn publish_post(&self, fields: PostFields) -> Result<PostRow> {
        if fields.user_id != self.options.viewer {
            return Err(FeedError::Unauthorized(
                "posts can only be published as the signed-in user".into(),
            ));
        }
        if fields.body.trim().is_empty() && fields.file.is_none() {
            return Err(FeedError::InvalidInput(
                "a post needs a body or an attached file".into(),
            ));
        }
        if let Some(id) = &fields.id {
            self.ensure_owner(id)?;
        }
        let editing = fields.id.is_some();
        let row = self.backend.create_or_update_post(fields).await?;
        if editing {
            self.worker
                .send(FeedRequest::Confirmed(Change::Updated(row.clone())))
                .await?;
        }
        Ok(row)
    }

    /// Deletes one of the viewer's own posts.
    pub async fn delete_post(&self, post_id: &str) -> Result<()> {
        self.ensure_owner(post_id)?;
        self.backend.delete_post(post_id).await?;
        self.worker
            .send(FeedRequest::Confirmed(Change::Deleted(DeletedRow::id_only(
                post_id,
            ))))
            .await
    }

    fn ensure_owner(&self, post_id: &str) -> Result<()> {
        let snapshot = self.worker.snapshot();
        let item = snapshot
            .get(post_id)
            .ok_or_else(|| FeedError::NotFound(format!("post {post_id}")))?;
        if item.user_id != self.options.viewer {
            return Err(FeedError::Unauthorized(format!(
                "post {post_id} belongs to another user"
            )));
        }
        Ok(())
    }

    /// Stops the worker and waits until its subscriptions are released.
    pub async fn shutdown(self) {
        self.worker.shutdown().await;
        tracing::info!(viewer = %self.options.viewer, "feed engine shut down");
    }
}

struct FeedWorker {
    backend: Arc<dyn Backend>,
    config: FeedConfig,
    viewer: String,
    page: FeedPage,
    index: ParentIndex,
    requests: mpsc::Receiver<FeedRequest>,
    loopback: mpsc::Sender<FeedRequest>,
    snapshots: watch::Sender<FeedSnapshot>,
    cancel: CancellationToken,
    load_in_flight: Arc<AtomicBool>,
    load_reply: Option<oneshot::Sender<Result<LoadTrigger>>>,
    revision: u64,
    last_error: Option<String>,
}

impl FeedWorker {
    fn new(
        backend: Arc<dyn Backend>,
        config: FeedConfig,
        options: FeedOptions,
        load_in_flight: Arc<AtomicBool>,
        channels: WorkerChannels<FeedRequest, FeedSnapshot>,
    ) -> Self {
        Self {
            backend,
            config,
            viewer: options.viewer,
            page: FeedPage::new(options.author_filter),
            index: ParentIndex::new(),
            requests: channels.requests,
            loopback: channels.loopback,
            snapshots: channels.snapshots,
            cancel: channels.cancel,
            load_in_flight,
            load_reply: None,
            revision: 0,
            last_error: None,
        }
    }

    async fn run(
        mut self,
        mut posts: TypedSubscription<PostRow>,
        mut comments: TypedSubscription<CommentRow>,
        mut likes: TypedSubscription<LikeRecord>,
    ) {
        let first = self.page.begin_load(self.config.initial_page_size);
        match first {
            Some(ticket) => self.spawn_fetch(ticket),
            None => self.load_in_flight.store(false, Ordering::Release),
        }

        let (mut posts_open, mut comments_open, mut likes_open) = (true, true, true);
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                Some(request) = self.requests.recv() => {
                    self.handle_request(request).await;
                }

                event = posts.next_event(), if posts_open => match event {
                    Some(event) => self.apply_post_event(event).await,
                    None => {
                        tracing::warn!("posts subscription closed");
                        posts_open = false;
                    }
                },

                event = comments.next_event(), if comments_open => match event {
                    Some(event) => self.apply_comment_event(event),
                    None => {
                        tracing::warn!("comments subscription closed");
                        comments_open = false;
                    }
                },

                event = likes.next_event(), if likes_open => match event {
                    Some(event) => self.apply_like_event(event),
                    None => {
                        tracing::warn!("likes subscription closed");
                        likes_open = false;
                    }
                },
            }
        }

        if let Some(reply) = self.load_reply.take() {
            let _ = reply.send(Err(FeedError::EngineClosed));
        }
        tracing::debug!(viewer = %self.viewer, "feed worker stopped");
    }

    async fn handle_request(&mut self, request: FeedRequest) {
        match request {
            FeedRequest::LoadMore { reply } => {
                let size = self.page.limit().max(self.page.len()) + self.config.page_step;
                match self.page.begin_load(size) {
                    Some(ticket) => {
                        self.load_reply = Some(reply);
                        self.spawn_fetch(ticket);
                        self.publish();
                    }
                    None => {
                        self.load_in_flight.store(false, Ordering::Release);
                        let _ = reply.send(Ok(LoadTrigger::Exhausted));
                    }
                }
            }
            FeedRequest::Refresh { reply } => {
                let ticket = self.page.begin_refresh();
                self.load_reply = Some(reply);
                self.spawn_fetch(ticket);
                self.publish();
            }
            FeedRequest::LoadFinished { ticket, result } => self.finish_load(ticket, result),
            FeedRequest::ToggleLike { post_id, reply } => {
                let _ = reply.send(self.begin_like_toggle(&post_id));
            }
            FeedRequest::SettleLike { intent, confirmed } => self.settle_like(intent, confirmed),
            FeedRequest::Confirmed(event) => self.apply_post_event(event).await,
        }
    }

    fn spawn_fetch(&self, ticket: LoadTicket) {
        let backend = self.backend.clone();
        let loopback = self.loopback.clone();
        let cancel = self.cancel.clone();
        let author = self.page.author_filter().map(str::to_string);
        tracing::debug!(limit = ticket.limit, kind = ?ticket.kind, "loading feed window");
        tokio::spawn(async move {
            let result = tokio::select! {
                () = cancel.cancelled() => return,
                result = backend.fetch_page(ticket.limit, author.as_deref()) => result,
            };
            let _ = loopback
                .send(FeedRequest::LoadFinished { ticket, result })
                .await;
        });
    }

    fn finish_load(&mut self, ticket: LoadTicket, result: Result<Vec<FeedItem>>) {
        let outcome = match result {
            Ok(rows) => {
                self.index.record_items(&rows);
                let outcome = self.page.finish_load(&ticket, rows);
                tracing::info!(
                    limit = ticket.limit,
                    held = self.page.len(),
                    ?outcome,
                    "feed window loaded"
                );
                self.last_error = None;
                Ok(match outcome {
                    LoadOutcome::Exhausted => LoadTrigger::Exhausted,
                    other => LoadTrigger::Loaded(other),
                })
            }
            Err(err) => {
                tracing::warn!(limit = ticket.limit, error = %err, "feed window load failed");
                self.page.abandon_load(&ticket);
                self.last_error = Some(err.to_string());
                Err(err)
            }
        };
        self.load_in_flight.store(false, Ordering::Release);
        self.publish();
        if let Some(reply) = self.load_reply.take() {
            let _ = reply.send(outcome);
        }
    }

    fn begin_like_toggle(&mut self, post_id: &str) -> Result<LikeIntent> {
        let item = self
            .page
            .get(post_id)
            .ok_or_else(|| FeedError::NotFound(format!("post {post_id}")))?;
        let intent = LikeIntent::for_item(item, &self.viewer);
        let event = intent.optimistic_event(&self.viewer);
        self.page.apply_like(post_id, &event);
        self.publish();
        Ok(intent)
    }

    fn settle_like(
        &mut self,
        intent: LikeIntent,
        confirmed: std::result::Result<Option<LikeRecord>, String>,
    ) {
        match confirmed {
            Ok(Some(record)) => {
                self.index.record_like(&record);
                let post_id = record.post_id.clone();
                self.page.apply_like(&post_id, &Change::Inserted(record));
            }
            Ok(None) => {}
            Err(message) => {
                let rollback = intent.rollback_event(&self.viewer);
                self.page.apply_like(&intent.post_id, &rollback);
                self.last_error = Some(message);
            }
        }
        self.publish();
    }

    async fn apply_post_event(&mut self, event: PostEvent) {
        match event {
            Change::Inserted(row) => {
                if let Some(author) = self.page.author_filter() {
                    if author != row.user_id {
                        tracing::trace!(post_id = %row.id, "insert outside author filter");
                        return;
                    }
                }
                if self.page.contains(&row.id) {
                    tracing::debug!(post_id = %row.id, "post already held");
                    return;
                }
                let author =
                    resolve_author(self.backend.as_ref(), &row.user_id, self.config.lookup_timeout)
                        .await;
                let post_id = row.id.clone();
                self.page.prepend(FeedItem::from_row(row, author));
                tracing::info!(post_id = %post_id, "post inserted");
                self.publish();
            }
            Change::Updated(ref row) => {
                let post_id = row.id.clone();
                if self.page.apply_post_fields(&event) {
                    tracing::debug!(post_id = %post_id, "post fields updated");
                    self.publish();
                }
            }
            Change::Deleted(deleted) => {
                if self.page.remove(&deleted.id).is_some() {
                    self.index.forget_post(&deleted.id);
                    tracing::info!(post_id = %deleted.id, "post removed");
                    self.publish();
                }
            }
        }
    }

    fn apply_like_event(&mut self, event: LikeEvent) {
        match &event {
            Change::Inserted(like) => {
                // While a load is out the post may still arrive with the
                // response, so the like is journaled for replay.
                if !self.page.contains(&like.post_id) && !self.page.is_loading() {
                    tracing::debug!(post_id = %like.post_id, "like for a post not held");
                    return;
                }
                self.index.record_like(like);
                if self.page.apply_like(&like.post_id, &event) {
                    self.publish();
                }
            }
            Change::Updated(_) => {}
            Change::Deleted(deleted) => {
                let Some(resolved) = self.index.resolve_like(deleted) else {
                    let gap = FeedError::PartialEventInformation {
                        topic: Topic::Likes,
                        row_id: deleted.id.clone(),
                        missing: "postId",
                    };
                    tracing::debug!(reason = %gap, "like delete left unapplied");
                    return;
                };
                let post_id = resolved.post_id.clone().unwrap_or_default();
                if self.page.apply_like(&post_id, &Change::Deleted(resolved)) {
                    self.publish();
                }
            }
        }
    }

    fn apply_comment_event(&mut self, event: CommentEvent) {
        match &event {
            Change::Inserted(comment) => {
                if !self.page.contains(&comment.post_id) {
                    tracing::debug!(post_id = %comment.post_id, "comment for a post not held");
                    return;
                }
                if !self.index.record_comment(&comment.id, &comment.post_id) {
                    tracing::debug!(comment_id = %comment.id, "comment already counted");
                    return;
                }
                if self.page.apply_comment(&comment.post_id, &event) {
                    self.publish();
                }
            }
            Change::Updated(_) => {}
            Change::Deleted(deleted) => {
                let Some(post_id) = self.index.resolve_comment(deleted) else {
                    let gap = FeedError::PartialEventInformation {
                        topic: Topic::Comments,
                        row_id: deleted.id.clone(),
                        missing: "postId",
                    };
                    tracing::debug!(reason = %gap, "comment delete left unapplied");
                    return;
                };
                if self.page.apply_comment(&post_id, &event) {
                    self.publish();
                }
            }
        }
    }

    fn publish(&mut self) {
        self.revision += 1;
        self.snapshots.send_replace(FeedSnapshot {
            items: self.page.items().to_vec(),
            limit: self.page.limit(),
            exhausted: self.page.is_exhausted(),
            loading: self.page.is_loading(),
            revision: self.revision,
            last_error: self.last_error.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthorSummary, PostRow};
    use chrono::{TimeZone, Utc};

    fn item_with_like(user: Option<&str>) -> FeedItem {
        let mut item = FeedItem::from_row(
            PostRow {
                id: "p1".into(),
                user_id: "owner".into(),
                body: "hello".into(),
                file: None,
                created_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            },
            AuthorSummary::placeholder("owner"),
        );
        if let Some(user) = user {
            item.likes.insert(LikeRecord {
                id: Some("l1".into()),
                post_id: "p1".into(),
                user_id: user.into(),
                created_at: None,
            });
        }
        item
    }

    #[test]
    fn like_intent_round_trips_through_rollback() {
        let mut item = item_with_like(None);
        let intent = LikeIntent::for_item(&item, "viewer");
        assert!(intent.like);
        crate::counters::apply_like(&mut item, &intent.optimistic_event("viewer"));
        assert!(item.liked_by("viewer"));
        crate::counters::apply_like(&mut item, &intent.rollback_event("viewer"));
        assert!(!item.liked_by("viewer"));
    }

    #[test]
    fn unlike_rollback_restores_the_confirmed_like() {
        let mut item = item_with_like(Some("viewer"));
        let intent = LikeIntent::for_item(&item, "viewer");
        assert!(!intent.like);
        crate::counters::apply_like(&mut item, &intent.optimistic_event("viewer"));
        assert!(item.likes.is_empty());
        crate::counters::apply_like(&mut item, &intent.rollback_event("viewer"));
        assert_eq!(
            item.likes.get("viewer").and_then(|like| like.id.as_deref()),
            Some("l1")
        );
    }
}
