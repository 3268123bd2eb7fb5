use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::handlers::HandlerRegistry;
use super::{HandleOutcome, JobQueue};

/// Wakes a worker to drain the queue.
///
/// A wake is a hint, not a delivery: the woken worker re-checks the lock and
/// the queue before doing anything, so redundant wakes are harmless.
pub trait Dispatcher: Send + Sync {
    /// Returns `false` when no worker can be reached.
    fn wake(&self) -> bool;
}

/// Sends wake signals to a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::Sender<()>,
}

impl Dispatcher for ChannelDispatcher {
    fn wake(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            // A wake is already waiting; that one will do.
            Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => {
                tracing::debug!("Worker pool is gone, wake dropped");
                false
            }
        }
    }
}

/// For processes that drain the queue in the foreground.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDispatcher;

impl Dispatcher for NoopDispatcher {
    fn wake(&self) -> bool {
        false
    }
}

/// Counts wakes without delivering them.
#[derive(Debug, Default)]
pub struct CountingDispatcher {
    wakes: AtomicUsize,
}

impl CountingDispatcher {
    pub fn wakes(&self) -> usize {
        self.wakes.load(Ordering::SeqCst)
    }
}

impl Dispatcher for CountingDispatcher {
    fn wake(&self) -> bool {
        self.wakes.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// Receiving half of the wake channel, consumed by [`WorkerPool::spawn`].
pub struct WakeReceiver(mpsc::Receiver<()>);

/// Workers that call [`JobQueue::maybe_handle`] whenever woken.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Creates the wake channel. Pending wakes are bounded by `capacity`.
    pub fn channel(capacity: usize) -> (ChannelDispatcher, WakeReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (ChannelDispatcher { tx }, WakeReceiver(rx))
    }

    pub fn spawn(
        worker_count: usize,
        rx: WakeReceiver,
        queue: Arc<JobQueue>,
        registry: Arc<HandlerRegistry>,
        secret: Arc<SecretString>,
    ) -> Self {
        let rx = Arc::new(Mutex::new(rx.0));
        let workers = (0..worker_count.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let queue = Arc::clone(&queue);
                let registry = Arc::clone(&registry);
                let secret = Arc::clone(&secret);
                tokio::spawn(async move {
                    loop {
                        let wake = rx.lock().await.recv().await;
                        if wake.is_none() {
                            break;
                        }
                        match queue.maybe_handle(secret.expose_secret(), &registry).await {
                            Ok(HandleOutcome::Handled(report)) => {
                                tracing::debug!(worker, task_id = %report.task_id, kind = %report.kind, result = ?report.disposition, "Worker handled task");
                            }
                            Ok(outcome) => {
                                tracing::trace!(worker, ?outcome, "Worker woke without work");
                            }
                            Err(e) => {
                                tracing::warn!(worker, error = %e, "Queue storage error");
                            }
                        }
                    }
                    tracing::debug!(worker, "Worker stopped");
                })
            })
            .collect();

        tracing::info!(workers = worker_count.max(1), "Worker pool started");
        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Stops all workers immediately. An in-flight task is abandoned and its
    /// lock expires on its own.
    pub fn shutdown(self) {
        for worker in self.workers {
            worker.abort();
        }
    }
}
