use linkup_feed::{RawChange, Subscription, SubscriptionRequest};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

/// Depth of the per-subscriber queue between the hub and a [`Subscription`].
const SUBSCRIBER_QUEUE: usize = 64;

/// Fans committed row changes out to every open subscription.
///
/// Each subscription gets a forwarding task that filters the broadcast by
/// topic, kind and column and stops as soon as the subscription's token is
/// cancelled.
#[derive(Clone)]
pub struct ChangeHub {
    sender: broadcast::Sender<RawChange>,
    active: Arc<AtomicUsize>,
}

impl ChangeHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Publishes a change; returns how many forwarders saw it.
    pub fn publish(&self, change: RawChange) -> usize {
        tracing::trace!(table = %change.topic, kind = ?change.kind, "publishing change");
        self.sender.send(change).unwrap_or(0)
    }

    /// Registers with the broadcast before returning, so changes published
    /// after this call are never missed.
    pub fn subscribe(&self, request: SubscriptionRequest) -> Subscription {
        let mut changes = self.sender.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let token = CancellationToken::new();
        let cancel = token.clone();
        let filter = request.clone();
        let active = self.active.clone();
        active.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let channel = filter.channel_name();
            loop {
                let change = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    received = changes.recv() => match received {
                        Ok(change) => change,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(%channel, skipped, "subscriber lagged behind the change feed");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                };
                if !filter.matches(&change) {
                    continue;
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = tx.send(change) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            active.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!(%channel, "change forwarder stopped");
        });

        Subscription::new(request, rx, token)
    }

    /// Number of forwarders still running.
    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkup_feed::{ChangeKind, EventFilter, Topic};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn forwards_only_matching_changes() {
        let hub = ChangeHub::new(16);
        let request = SubscriptionRequest::all(Topic::Comments)
            .only(ChangeKind::Inserted)
            .filtered(EventFilter::eq("postId", "p1"));
        let mut sub = hub.subscribe(request);

        hub.publish(RawChange::inserted(Topic::Posts, json!({"id": "p9"})));
        hub.publish(RawChange::inserted(Topic::Comments, json!({"id": "c0", "postId": "p2"})));
        hub.publish(RawChange::deleted(Topic::Comments, json!({"id": "c1", "postId": "p1"})));
        hub.publish(RawChange::inserted(Topic::Comments, json!({"id": "c2", "postId": "p1"})));

        let change = tokio::time::timeout(Duration::from_secs(1), sub.next_change())
            .await
            .expect("change in time")
            .expect("change");
        assert_eq!(change.new["id"], "c2");
    }

    #[tokio::test]
    async fn dropping_the_subscription_stops_its_forwarder() {
        let hub = ChangeHub::new(16);
        let sub = hub.subscribe(SubscriptionRequest::all(Topic::Posts));
        assert_eq!(hub.active_subscriptions(), 1);
        drop(sub);
        for _ in 0..100 {
            if hub.active_subscriptions() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("forwarder still running");
    }
}
