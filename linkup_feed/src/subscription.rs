use crate::error::FeedError;
use crate::events::{Change, RawChange, SubscriptionRequest, Topic, TopicRow};
use futures_util::Stream;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Live change feed for one topic.
///
/// The stream is lazy, unbounded and cannot be restarted. Dropping the
/// handle (or calling [`Subscription::unsubscribe`]) cancels its token,
/// which tells the producer to stop delivering and release its side.
#[derive(Debug)]
pub struct Subscription {
    request: SubscriptionRequest,
    rx: mpsc::Receiver<RawChange>,
    token: CancellationToken,
}

impl Subscription {
    pub fn new(
        request: SubscriptionRequest,
        rx: mpsc::Receiver<RawChange>,
        token: CancellationToken,
    ) -> Self {
        tracing::debug!(channel = %request.channel_name(), "subscription opened");
        Self { request, rx, token }
    }

    pub fn topic(&self) -> Topic {
        self.request.topic
    }

    pub fn request(&self) -> &SubscriptionRequest {
        &self.request
    }

    /// Token the producer watches; cancelled when this handle goes away.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Next raw change, or `None` once released or the producer is gone.
    pub async fn next_change(&mut self) -> Option<RawChange> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            change = self.rx.recv() => change,
        }
    }

    /// Explicit release; equivalent to dropping the handle.
    pub fn unsubscribe(self) {}

    /// Narrows the feed to one table's typed events. Rows that fail to
    /// decode are logged and skipped.
    pub fn typed<R: TopicRow>(self) -> TypedSubscription<R> {
        TypedSubscription {
            inner: self,
            _row: PhantomData,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.token.is_cancelled() {
            tracing::debug!(channel = %self.request.channel_name(), "subscription released");
            self.token.cancel();
        }
    }
}

impl Stream for Subscription {
    type Item = RawChange;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.token.is_cancelled() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

/// A [`Subscription`] whose rows have been validated against `R`.
#[derive(Debug)]
pub struct TypedSubscription<R> {
    inner: Subscription,
    _row: PhantomData<fn() -> R>,
}

impl<R: TopicRow> TypedSubscription<R> {
    pub fn topic(&self) -> Topic {
        self.inner.topic()
    }

    pub async fn next_event(&mut self) -> Option<Change<R>> {
        loop {
            let raw = self.inner.next_change().await?;
            match Change::<R>::try_from(raw) {
                Ok(event) => return Some(event),
                Err(err) => log_rejected(&self.inner, &err),
            }
        }
    }

    pub fn unsubscribe(self) {}
}

fn log_rejected(subscription: &Subscription, err: &FeedError) {
    tracing::warn!(
        channel = %subscription.request.channel_name(),
        error = %err,
        "dropping change that failed validation"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChangeKind, Topic};
    use crate::models::CommentRow;
    use futures_util::StreamExt;
    use serde_json::json;

    fn channel(topic: Topic) -> (mpsc::Sender<RawChange>, Subscription) {
        let (tx, rx) = mpsc::channel(8);
        let sub = Subscription::new(SubscriptionRequest::all(topic), rx, CancellationToken::new());
        (tx, sub)
    }

    #[tokio::test]
    async fn drop_cancels_the_producer_token() {
        let (_tx, sub) = channel(Topic::Posts);
        let token = sub.token();
        assert!(!token.is_cancelled());
        drop(sub);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn released_subscription_yields_nothing() {
        let (tx, mut sub) = channel(Topic::Posts);
        tx.send(RawChange::deleted(Topic::Posts, json!({"id": "p1"})))
            .await
            .expect("send");
        sub.token().cancel();
        assert!(sub.next_change().await.is_none());
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn typed_feed_skips_malformed_rows() {
        let (tx, sub) = channel(Topic::Comments);
        let mut typed = sub.typed::<CommentRow>();
        tx.send(RawChange::inserted(Topic::Comments, json!({"id": "broken"})))
            .await
            .expect("send");
        tx.send(RawChange::inserted(
            Topic::Comments,
            json!({
                "id": "c1",
                "postId": "p1",
                "userId": "u1",
                "text": "hello",
                "created_at": "2024-02-02T08:00:00Z"
            }),
        ))
        .await
        .expect("send");
        let event = typed.next_event().await.expect("event");
        assert_eq!(event.kind(), ChangeKind::Inserted);
        assert_eq!(event.id(), Some("c1"));
    }
}
