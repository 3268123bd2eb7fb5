//! Durable background job queue.
//!
//! Follow-up work discovered while ingesting a feed (image downloads,
//! episode import, re-fetches) is stored as [`Task`]s in the key/value store
//! and drained by a [`WorkerPool`], one task per wake, under a single TTL
//! lock shared by every worker.
//!
//! ```text
//! enqueue ──► task list ──► dispatch() ──wake──► worker ──► maybe_handle()
//!                 ▲                                              │
//!                 └───────── shrink / retry / remove ◄───────────┘
//! ```

mod dispatch;
pub mod handlers;
mod job_queue;
mod memory;
mod task;

pub use dispatch::{
    ChannelDispatcher, CountingDispatcher, Dispatcher, NoopDispatcher, WakeReceiver, WorkerPool,
};
pub use handlers::{HandlerRegistry, TaskError, TaskHandler, TaskOutcome};
pub use job_queue::{
    Disposition, HandleOutcome, JobQueue, QueueOptions, TaskReport, LOCK_KEY, MAX_ATTEMPTS,
    QUEUE_KEY,
};
pub use memory::{FixedProbe, MemoryProbe, SysinfoProbe};
pub use task::{
    normalize_routing_id, task_id, CompletedWork, ImageRequest, Task, TaskKind, TaskPayload,
    COVER_IMAGE_KEY, DEFAULT_PRIORITY,
};
