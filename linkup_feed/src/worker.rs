use crate::error::{FeedError, Result};
use std::future::Future;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Channels a worker task runs against.
pub(crate) struct WorkerChannels<R, S> {
    pub requests: mpsc::Receiver<R>,
    /// Lets tasks spawned by the worker post results back into its queue.
    pub loopback: mpsc::Sender<R>,
    pub snapshots: watch::Sender<S>,
    pub cancel: CancellationToken,
}

/// Owner side of a single-writer worker: a request queue in, snapshots out.
///
/// Dropping the handle cancels the worker; [`WorkerHandle::shutdown`] also
/// waits for it to finish releasing its subscriptions.
pub(crate) struct WorkerHandle<R, S> {
    requests: mpsc::Sender<R>,
    snapshots: watch::Receiver<S>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<R, S> WorkerHandle<R, S>
where
    R: Send + 'static,
    S: Clone + Send + Sync + 'static,
{
    pub fn spawn<F, Fut>(queue_depth: usize, initial: S, run: F) -> Self
    where
        F: FnOnce(WorkerChannels<R, S>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(WorkerChannels {
            requests: rx,
            loopback: tx.clone(),
            snapshots: snapshot_tx,
            cancel: cancel.clone(),
        }));
        Self {
            requests: tx,
            snapshots: snapshot_rx,
            cancel,
            task: Some(task),
        }
    }

    pub async fn send(&self, request: R) -> Result<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| FeedError::EngineClosed)
    }

    /// Sends a request carrying a reply channel and waits for the answer.
    pub async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> R) -> Result<T> {
        let (reply, answer) = oneshot::channel();
        self.send(make(reply)).await?;
        answer.await.map_err(|_| FeedError::EngineClosed)
    }

    pub fn snapshot(&self) -> S {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<S> {
        self.snapshots.clone()
    }

    pub async fn wait_until(&self, mut predicate: impl FnMut(&S) -> bool) -> Result<S> {
        let mut rx = self.snapshots.clone();
        let snapshot = rx
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map_err(|_| FeedError::EngineClosed)?;
        Ok(snapshot.clone())
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
            && self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::warn!(error = ?err, "worker task ended abnormally");
            }
        }
    }
}

impl<R, S> Drop for WorkerHandle<R, S> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
