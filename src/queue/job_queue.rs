use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tokio::sync::Mutex;

use super::dispatch::Dispatcher;
use super::handlers::{HandlerRegistry, TaskError, TaskOutcome};
use super::memory::MemoryProbe;
use super::task::{Task, TaskKind, TaskPayload, DEFAULT_PRIORITY};
use crate::config::Config;
use crate::storage::{load, save, RuntimeSettings, SharedStore, StoreError};
use crate::util::short_hash;

/// Store key of the task list.
pub const QUEUE_KEY: &str = "podkeeper-queue";

/// Transient key of the drain lock.
pub const LOCK_KEY: &str = "podkeeper-queue-lock";

/// A task is dropped once it has failed this many times.
pub const MAX_ATTEMPTS: u32 = 3;

/// Share of the memory ceiling at which workers back off.
const MEMORY_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Lifetime of the drain lock; bounds how long a crashed worker blocks the queue.
    pub lock_ttl: Duration,
    /// Pause after each task before the lock is released.
    pub pace: Duration,
    pub memory_backoff: Duration,
    pub memory_limit_bytes: u64,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for QueueOptions {
    fn from(config: &Config) -> Self {
        Self {
            lock_ttl: Duration::from_secs(config.lock_ttl_secs),
            pace: Duration::from_secs(config.pace_secs),
            memory_backoff: Duration::from_secs(config.memory_backoff_secs),
            memory_limit_bytes: config.memory_limit_bytes(),
        }
    }
}

/// What happened to the task a worker picked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Finished and removed.
    Removed,
    /// Partly finished; the rest stays queued.
    Shrunk,
    /// Left untouched.
    Pending,
    /// Failed and kept for another attempt.
    Retrying { attempts: u32 },
    /// Failed for the last time and removed.
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub task_id: String,
    pub kind: TaskKind,
    pub disposition: Disposition,
}

/// Result of one worker entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The nonce did not match the queue secret.
    Rejected,
    /// Another worker holds the drain lock.
    Busy,
    Empty,
    /// Memory use is near the ceiling; a new wake was scheduled.
    MemoryBackoff,
    Handled(TaskReport),
}

/// Durable task list with a single drain lock.
///
/// Tasks are keyed by (routing id, kind): enqueuing a second task for the
/// same pair merges into or replaces the first. Workers take one task per
/// wake, lowest priority value first, and wake the pool again while work
/// remains.
pub struct JobQueue {
    store: SharedStore,
    dispatcher: Arc<dyn Dispatcher>,
    memory: Arc<dyn MemoryProbe>,
    secret: SecretString,
    options: QueueOptions,
    /// Serializes read-modify-write cycles on the task list.
    tasks_lock: Mutex<()>,
    lock_seq: AtomicU64,
}

impl JobQueue {
    pub fn new(
        store: SharedStore,
        dispatcher: Arc<dyn Dispatcher>,
        memory: Arc<dyn MemoryProbe>,
        secret: SecretString,
        options: QueueOptions,
    ) -> Self {
        Self {
            store,
            dispatcher,
            memory,
            secret,
            options,
            tasks_lock: Mutex::new(()),
            lock_seq: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    // ========================================================================
    // Producers
    // ========================================================================

    /// Adds a task, merging it into an outstanding one for the same routing
    /// id and kind. Returns the task id.
    pub async fn enqueue(
        &self,
        routing_id: &str,
        payload: TaskPayload,
        priority: Option<i32>,
    ) -> Result<String, StoreError> {
        let task = Task::new(routing_id, payload, priority.unwrap_or(DEFAULT_PRIORITY));
        let task_id = task.id.clone();
        let kind = task.kind();

        let _guard = self.tasks_lock.lock().await;
        let mut tasks = self.load_tasks().await?;

        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) if kind.is_coalescible() => {
                // Priority and attempts stay with the queued task.
                existing.payload.merge(task.payload);
                tracing::debug!(task_id = %task_id, kind = %kind, "Merged into queued task");
            }
            Some(existing) => {
                *existing = task;
                tracing::debug!(task_id = %task_id, kind = %kind, "Replaced queued task");
            }
            None => {
                tasks.push(task);
                tracing::debug!(task_id = %task_id, kind = %kind, "Queued task");
            }
        }

        save(self.store.as_ref(), QUEUE_KEY, &tasks).await?;
        Ok(task_id)
    }

    /// Wakes a worker unless the queue is locked or empty.
    ///
    /// Returns whether a wake was sent.
    pub async fn dispatch(&self) -> Result<bool, StoreError> {
        if self.is_locked().await? || self.is_empty().await? {
            return Ok(false);
        }
        Ok(self.dispatcher.wake())
    }

    // ========================================================================
    // Consumers
    // ========================================================================

    /// Worker entry point.
    ///
    /// Checks `nonce`, the lock, the queue and the memory ceiling, then
    /// handles one task and wakes the pool again if work remains.
    pub async fn maybe_handle(
        &self,
        nonce: &str,
        registry: &HandlerRegistry,
    ) -> Result<HandleOutcome, StoreError> {
        if !constant_time_eq(nonce.as_bytes(), self.secret.expose_secret().as_bytes()) {
            tracing::warn!("Rejected queue wake with an invalid nonce");
            return Ok(HandleOutcome::Rejected);
        }
        if self.is_locked().await? {
            return Ok(HandleOutcome::Busy);
        }
        if self.is_empty().await? {
            return Ok(HandleOutcome::Empty);
        }

        if self.memory_exceeded() {
            tracing::warn!(
                backoff_secs = self.options.memory_backoff.as_secs(),
                "Memory use near ceiling, postponing queue work"
            );
            tokio::time::sleep(self.options.memory_backoff).await;
            self.dispatch().await?;
            return Ok(HandleOutcome::MemoryBackoff);
        }

        let outcome = self.handle(registry).await?;
        if let HandleOutcome::Handled(report) = &outcome {
            // A pending task would be picked again at once; leave it for the next trigger.
            if report.disposition != Disposition::Pending {
                self.dispatch().await?;
            }
        }
        Ok(outcome)
    }

    /// Runs the first task under the drain lock.
    ///
    /// The lock is held for the handler run plus the pacing delay and is
    /// released even when storage fails part way.
    pub async fn handle(&self, registry: &HandlerRegistry) -> Result<HandleOutcome, StoreError> {
        let Some(token) = self.acquire_lock().await? else {
            return Ok(HandleOutcome::Busy);
        };

        let result = self.handle_locked(registry).await;

        tokio::time::sleep(self.options.pace).await;
        if let Err(e) = self.release_lock(&token).await {
            tracing::warn!(error = %e, "Failed to release queue lock");
        }
        result
    }

    /// Takes the drain lock under a token unique to this acquisition.
    async fn acquire_lock(&self) -> Result<Option<String>, StoreError> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = self.lock_seq.fetch_add(1, Ordering::Relaxed);
        let token = short_hash(&format!("{}:{}:{}", std::process::id(), nanos, seq), 16);

        let acquired = self
            .store
            .add_transient(LOCK_KEY, json!(token), self.options.lock_ttl)
            .await?;
        Ok(acquired.then_some(token))
    }

    /// Deletes the drain lock if it still carries `token`.
    ///
    /// A lock that outlived its TTL may have been taken by another worker;
    /// that lock is left alone. Returns whether the lock was deleted.
    async fn release_lock(&self, token: &str) -> Result<bool, StoreError> {
        match self.store.get_transient(LOCK_KEY).await? {
            Some(value) if value == json!(token) => {
                self.store.delete_transient(LOCK_KEY).await?;
                Ok(true)
            }
            Some(_) => {
                tracing::debug!("Queue lock expired and was taken by another worker");
                Ok(false)
            }
            None => {
                tracing::debug!("Queue lock expired before release");
                Ok(false)
            }
        }
    }

    async fn handle_locked(&self, registry: &HandlerRegistry) -> Result<HandleOutcome, StoreError> {
        let Some(task) = self.tasks().await?.into_iter().next() else {
            return Ok(HandleOutcome::Empty);
        };
        let kind = task.kind();

        let result = match registry.get(kind) {
            Some(handler) => {
                let task = task.clone();
                // Spawned so a panicking handler surfaces as a JoinError.
                tokio::spawn(async move { handler.handle(&task).await })
                    .await
                    .unwrap_or_else(|e| Err(TaskError::Panicked(panic_message(e))))
            }
            None => {
                tracing::warn!(task_id = %task.id, kind = %kind, "No handler registered, leaving task queued");
                Ok(TaskOutcome::Pending)
            }
        };

        let disposition = self.settle(&task, result).await?;
        Ok(HandleOutcome::Handled(TaskReport {
            task_id: task.id,
            kind,
            disposition,
        }))
    }

    /// Applies a handler result to the stored copy of `task`.
    ///
    /// The stored copy may have grown through merges while the handler ran;
    /// only the work the handler reported is removed.
    async fn settle(
        &self,
        task: &Task,
        result: Result<TaskOutcome, TaskError>,
    ) -> Result<Disposition, StoreError> {
        let _guard = self.tasks_lock.lock().await;
        let mut tasks = self.load_tasks().await?;
        let Some(pos) = tasks.iter().position(|t| t.id == task.id) else {
            return Ok(Disposition::Removed);
        };

        let disposition = match result {
            Ok(TaskOutcome::Pending) => return Ok(Disposition::Pending),
            Ok(TaskOutcome::Completed(work)) => {
                if tasks[pos].payload.remove_completed(&work) {
                    tasks.remove(pos);
                    tracing::info!(task_id = %task.id, kind = %task.kind(), "Task completed");
                    Disposition::Removed
                } else {
                    tracing::debug!(task_id = %task.id, kind = %task.kind(), "Task partly completed");
                    Disposition::Shrunk
                }
            }
            Err(e) => {
                let attempts = tasks[pos].attempts + 1;
                if attempts >= MAX_ATTEMPTS {
                    tasks.remove(pos);
                    tracing::error!(
                        task_id = %task.id,
                        kind = %task.kind(),
                        attempts,
                        error = %e,
                        "Task failed too often, dropping it"
                    );
                    Disposition::Dropped
                } else {
                    tasks[pos].attempts = attempts;
                    tracing::warn!(
                        task_id = %task.id,
                        kind = %task.kind(),
                        attempts,
                        error = %e,
                        "Task failed, will retry"
                    );
                    Disposition::Retrying { attempts }
                }
            }
        };

        save(self.store.as_ref(), QUEUE_KEY, &tasks).await?;

        if disposition == Disposition::Dropped && task.kind() == TaskKind::DownloadImage {
            RuntimeSettings::update(self.store.as_ref(), |s| s.save_images = false).await?;
            tracing::error!("Image downloads keep failing, image saving has been switched off");
        }
        Ok(disposition)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Queued tasks in the order workers take them.
    pub async fn tasks(&self) -> Result<Vec<Task>, StoreError> {
        let mut tasks = self.load_tasks().await?;
        tasks.sort_by_key(|t| t.priority);
        Ok(tasks)
    }

    pub async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.load_tasks().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.load_tasks().await?.is_empty())
    }

    pub async fn is_locked(&self) -> Result<bool, StoreError> {
        Ok(self.store.get_transient(LOCK_KEY).await?.is_some())
    }

    async fn load_tasks(&self) -> Result<Vec<Task>, StoreError> {
        Ok(load(self.store.as_ref(), QUEUE_KEY).await?.unwrap_or_default())
    }

    fn memory_exceeded(&self) -> bool {
        let Some(used) = self.memory.used_bytes() else {
            return false;
        };
        used as f64 >= self.options.memory_limit_bytes as f64 * MEMORY_THRESHOLD
    }
}

fn panic_message(e: tokio::task::JoinError) -> String {
    match e.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string()),
        Err(e) => e.to_string(),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
