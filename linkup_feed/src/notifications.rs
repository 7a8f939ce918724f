use crate::backend::{resolve_author, Backend};
use crate::config::FeedConfig;
use crate::error::Result;
use crate::events::{Change, ChangeKind, EventFilter, SubscriptionRequest, Topic};
use crate::models::{NotificationItem, NotificationRow};
use crate::subscription::TypedSubscription;
use crate::worker::{WorkerChannels, WorkerHandle};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboxSnapshot {
    /// Newest first.
    pub items: Vec<NotificationItem>,
    /// Live arrivals since the last `mark_seen`.
    pub unread: usize,
    pub loading: bool,
    pub revision: u64,
    pub last_error: Option<String>,
}

enum InboxRequest {
    MarkSeen,
}

/// Notifications addressed to one user, kept current by a filtered
/// subscription.
pub struct NotificationInbox {
    receiver_id: String,
    worker: WorkerHandle<InboxRequest, InboxSnapshot>,
}

impl NotificationInbox {
    pub async fn open(
        backend: Arc<dyn Backend>,
        config: FeedConfig,
        receiver_id: impl Into<String>,
    ) -> Result<Self> {
        let receiver_id = receiver_id.into();
        let inserts = backend
            .subscribe(
                SubscriptionRequest::all(Topic::Notifications)
                    .only(ChangeKind::Inserted)
                    .filtered(EventFilter::eq("receiverId", receiver_id.clone())),
            )
            .await?
            .typed::<NotificationRow>();

        let initial = InboxSnapshot {
            loading: true,
            ..InboxSnapshot::default()
        };
        let worker_receiver = receiver_id.clone();
        let worker = WorkerHandle::spawn(config.queue_depth, initial, move |channels| {
            InboxWorker::new(backend, config, worker_receiver, channels).run(inserts)
        });
        Ok(Self {
            receiver_id,
            worker,
        })
    }

    pub fn receiver_id(&self) -> &str {
        &self.receiver_id
    }

    pub fn snapshot(&self) -> InboxSnapshot {
        self.worker.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<InboxSnapshot> {
        self.worker.watch()
    }

    pub async fn wait_until(
        &self,
        predicate: impl FnMut(&InboxSnapshot) -> bool,
    ) -> Result<InboxSnapshot> {
        self.worker.wait_until(predicate).await
    }

    pub async fn ready(&self) -> Result<InboxSnapshot> {
        self.wait_until(|snapshot| !snapshot.loading).await
    }

    pub async fn mark_seen(&self) -> Result<()> {
        self.worker.send(InboxRequest::MarkSeen).await
    }

    pub async fn shutdown(self) {
        self.worker.shutdown().await;
    }
}

struct InboxWorker {
    backend: Arc<dyn Backend>,
    config: FeedConfig,
    receiver_id: String,
    state: InboxSnapshot,
    requests: mpsc::Receiver<InboxRequest>,
    snapshots: watch::Sender<InboxSnapshot>,
    cancel: CancellationToken,
}

impl InboxWorker {
    fn new(
        backend: Arc<dyn Backend>,
        config: FeedConfig,
        receiver_id: String,
        channels: WorkerChannels<InboxRequest, InboxSnapshot>,
    ) -> Self {
        Self {
            backend,
            config,
            receiver_id,
            state: InboxSnapshot {
                loading: true,
                ..InboxSnapshot::default()
            },
            requests: channels.requests,
            snapshots: channels.snapshots,
            cancel: channels.cancel,
        }
    }

    async fn run(mut self, mut inserts: TypedSubscription<NotificationRow>) {
        let fetched = tokio::select! {
            () = self.cancel.cancelled() => return,
            fetched = self.backend.fetch_notifications(&self.receiver_id) => fetched,
        };
        match fetched {
            Ok(items) => {
                tracing::debug!(receiver_id = %self.receiver_id, count = items.len(), "notifications loaded");
                self.state.items = items;
            }
            Err(err) => {
                tracing::warn!(receiver_id = %self.receiver_id, error = %err, "notification fetch failed");
                self.state.last_error = Some(err.to_string());
            }
        }
        self.state.loading = false;
        self.publish();

        let mut open = true;
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                Some(InboxRequest::MarkSeen) = self.requests.recv() => {
                    if self.state.unread > 0 {
                        self.state.unread = 0;
                        self.publish();
                    }
                }

                event = inserts.next_event(), if open => match event {
                    Some(Change::Inserted(row)) => self.insert(row).await,
                    Some(_) => {}
                    None => open = false,
                },
            }
        }
    }

    async fn insert(&mut self, row: NotificationRow) {
        if self.state.items.iter().any(|held| held.id == row.id) {
            return;
        }
        let sender =
            resolve_author(self.backend.as_ref(), &row.sender_id, self.config.lookup_timeout).await;
        tracing::info!(
            receiver_id = %self.receiver_id,
            notification_id = %row.id,
            title = %row.title,
            "notification received"
        );
        self.state
            .items
            .insert(0, NotificationItem::from_row(row, Some(sender)));
        self.state.unread += 1;
        self.publish();
    }

    fn publish(&mut self) {
        self.state.revision += 1;
        self.snapshots.send_replace(self.state.clone());
    }
}
