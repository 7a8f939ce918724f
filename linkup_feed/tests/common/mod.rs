#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use linkup_feed::{
    AuthorSummary, Backend, CommentItem, CommentRow, FeedError, FeedItem, LikeRecord, NewComment,
    NewNotification, NotificationItem, NotificationRow, PostDetails, PostFields, PostRow, RawChange,
    Result, Subscription, SubscriptionRequest, Topic,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + ChronoDuration::minutes(minute)
}

pub fn author(id: &str) -> AuthorSummary {
    AuthorSummary {
        id: id.to_string(),
        name: format!("User {id}"),
        avatar: None,
    }
}

pub fn post_row(id: &str, user: &str, minute: i64) -> PostRow {
    PostRow {
        id: id.to_string(),
        user_id: user.to_string(),
        body: format!("body of {id}"),
        file: None,
        created_at: at(minute),
    }
}

pub fn like(id: &str, post: &str, user: &str) -> LikeRecord {
    LikeRecord {
        id: Some(id.to_string()),
        post_id: post.to_string(),
        user_id: user.to_string(),
        created_at: Some(at(0)),
    }
}

pub fn comment_row(id: &str, post: &str, user: &str, minute: i64) -> CommentRow {
    CommentRow {
        id: id.to_string(),
        post_id: post.to_string(),
        user_id: user.to_string(),
        text: format!("comment {id}"),
        created_at: at(minute),
    }
}

#[derive(Default)]
struct State {
    /// Newest first.
    posts: Vec<FeedItem>,
    comments: HashMap<String, Vec<CommentItem>>,
    authors: HashMap<String, AuthorSummary>,
    notifications: Vec<NotificationItem>,
    sent: Vec<NewNotification>,
    subscribers: Vec<(SubscriptionRequest, mpsc::Sender<RawChange>, CancellationToken)>,
    fail_fetch: bool,
    fail_likes: bool,
    fail_subscribe: Option<Topic>,
    fetch_delay: Option<Duration>,
}

/// In-memory backend whose change stream is driven by the test.
#[derive(Default)]
pub struct ScriptedBackend {
    state: Mutex<State>,
    fetches: AtomicUsize,
    ids: AtomicUsize,
}

impl ScriptedBackend {
    /// `count` posts by `u1`, `p1` oldest, with authors `u1`..`u3` known.
    pub fn with_posts(count: usize) -> Self {
        let backend = Self::default();
        {
            let mut state = backend.state.lock().unwrap();
            for user in ["u1", "u2", "u3"] {
                state.authors.insert(user.to_string(), author(user));
            }
            for n in (1..=count).rev() {
                let row = post_row(&format!("p{n}"), "u1", n as i64);
                state.posts.push(FeedItem::from_row(row, author("u1")));
            }
        }
        backend
    }

    pub fn add_post(&self, row: PostRow) {
        let mut state = self.state.lock().unwrap();
        let author = state
            .authors
            .get(&row.user_id)
            .cloned()
            .unwrap_or_else(|| AuthorSummary::placeholder(&row.user_id));
        state.posts.insert(0, FeedItem::from_row(row, author));
        state.posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }

    pub fn add_like(&self, record: LikeRecord) {
        let mut state = self.state.lock().unwrap();
        if let Some(item) = state.posts.iter_mut().find(|item| item.id == record.post_id) {
            item.likes.insert(record);
        }
    }

    pub fn add_comment(&self, row: CommentRow) {
        let mut state = self.state.lock().unwrap();
        let author = state
            .authors
            .get(&row.user_id)
            .cloned()
            .unwrap_or_else(|| AuthorSummary::placeholder(&row.user_id));
        if let Some(item) = state.posts.iter_mut().find(|item| item.id == row.post_id) {
            item.comment_count += 1;
        }
        state
            .comments
            .entry(row.post_id.clone())
            .or_default()
            .insert(0, CommentItem::from_row(row, author));
    }

    pub fn add_notification(&self, row: NotificationRow) {
        let mut state = self.state.lock().unwrap();
        let sender = state.authors.get(&row.sender_id).cloned();
        state
            .notifications
            .insert(0, NotificationItem::from_row(row, sender));
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.state.lock().unwrap().fail_fetch = fail;
    }

    pub fn fail_likes(&self, fail: bool) {
        self.state.lock().unwrap().fail_likes = fail;
    }

    pub fn fail_subscribe(&self, topic: Topic) {
        self.state.lock().unwrap().fail_subscribe = Some(topic);
    }

    pub fn delay_fetch(&self, delay: Duration) {
        self.state.lock().unwrap().fetch_delay = Some(delay);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn sent_notifications(&self) -> Vec<NewNotification> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Subscriptions whose handle has not been released.
    pub fn active_subscriptions(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .subscribers
            .iter()
            .filter(|(_, _, token)| !token.is_cancelled())
            .count()
    }

    /// Delivers a change to every live subscriber whose request matches.
    pub fn emit(&self, change: RawChange) {
        let state = self.state.lock().unwrap();
        for (request, tx, token) in &state.subscribers {
            if !token.is_cancelled() && request.matches(&change) {
                tx.try_send(change.clone()).expect("subscriber queue full");
            }
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.ids.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn fetch_page(&self, limit: usize, author: Option<&str>) -> Result<Vec<FeedItem>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let (delay, fail) = {
            let state = self.state.lock().unwrap();
            (state.fetch_delay, state.fail_fetch)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(FeedError::Network("connection reset".into()));
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .posts
            .iter()
            .filter(|item| author.map_or(true, |author| item.user_id == author))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_one(&self, post_id: &str) -> Result<PostDetails> {
        let state = self.state.lock().unwrap();
        let item = state
            .posts
            .iter()
            .find(|item| item.id == post_id)
            .cloned()
            .ok_or_else(|| FeedError::NotFound(format!("post {post_id}")))?;
        let comments = state.comments.get(post_id).cloned().unwrap_or_default();
        Ok(PostDetails { item, comments })
    }

    async fn lookup_author(&self, user_id: &str) -> Result<AuthorSummary> {
        self.state
            .lock()
            .unwrap()
            .authors
            .get(user_id)
            .cloned()
            .ok_or_else(|| FeedError::NotFound(format!("user {user_id}")))
    }

    async fn subscribe(&self, request: SubscriptionRequest) -> Result<Subscription> {
        let mut state = self.state.lock().unwrap();
        if state.fail_subscribe == Some(request.topic) {
            return Err(FeedError::Network(format!("cannot join {}", request.topic)));
        }
        let (tx, rx) = mpsc::channel(64);
        let token = CancellationToken::new();
        state.subscribers.push((request.clone(), tx, token.clone()));
        Ok(Subscription::new(request, rx, token))
    }

    async fn create_like(&self, post_id: &str, user_id: &str) -> Result<LikeRecord> {
        if self.state.lock().unwrap().fail_likes {
            return Err(FeedError::Network("like rejected".into()));
        }
        let record = LikeRecord {
            id: Some(self.next_id("l")),
            post_id: post_id.to_string(),
            user_id: user_id.to_string(),
            created_at: Some(Utc::now()),
        };
        self.add_like(record.clone());
        Ok(record)
    }

    async fn delete_like(&self, post_id: &str, user_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_likes {
            return Err(FeedError::Network("unlike rejected".into()));
        }
        if let Some(item) = state.posts.iter_mut().find(|item| item.id == post_id) {
            item.likes.remove_user(user_id);
        }
        Ok(())
    }

    async fn create_comment(&self, input: NewComment) -> Result<CommentRow> {
        let row = CommentRow {
            id: self.next_id("c"),
            post_id: input.post_id,
            user_id: input.user_id,
            text: input.text,
            created_at: Utc::now(),
        };
        self.add_comment(row.clone());
        Ok(row)
    }

    async fn delete_comment(&self, comment_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for comments in state.comments.values_mut() {
            comments.retain(|comment| comment.id != comment_id);
        }
        Ok(())
    }

    async fn create_or_update_post(&self, fields: PostFields) -> Result<PostRow> {
        let mut state = self.state.lock().unwrap();
        if let Some(id) = &fields.id {
            let item = state
                .posts
                .iter_mut()
                .find(|item| &item.id == id)
                .ok_or_else(|| FeedError::NotFound(format!("post {id}")))?;
            item.body = fields.body.clone();
            item.file = fields.file.clone();
            return Ok(PostRow {
                id: id.clone(),
                user_id: item.user_id.clone(),
                body: item.body.clone(),
                file: item.file.clone(),
                created_at: item.created_at,
            });
        }
        drop(state);
        let row = PostRow {
            id: self.next_id("p"),
            user_id: fields.user_id,
            body: fields.body,
            file: fields.file,
            created_at: Utc::now(),
        };
        self.add_post(row.clone());
        Ok(row)
    }

    async fn delete_post(&self, post_id: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .posts
            .retain(|item| item.id != post_id);
        Ok(())
    }

    async fn create_notification(&self, input: NewNotification) -> Result<NotificationRow> {
        let row = NotificationRow {
            id: self.next_id("n"),
            sender_id: input.sender_id.clone(),
            receiver_id: input.receiver_id.clone(),
            title: input.title.clone(),
            data: input.data.clone(),
            created_at: Utc::now(),
        };
        self.state.lock().unwrap().sent.push(input);
        Ok(row)
    }

    async fn fetch_notifications(&self, receiver_id: &str) -> Result<Vec<NotificationItem>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .notifications
            .iter()
            .filter(|item| item.receiver_id == receiver_id)
            .cloned()
            .collect())
    }
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
