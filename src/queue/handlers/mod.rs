//! Work performed for each [`TaskKind`].
//!
//! Handlers are looked up in a [`HandlerRegistry`] built once at startup.
//! A handler reports how much of its task it finished; the queue shrinks or
//! removes the task accordingly and turns errors into failed attempts.

mod download_image;
mod import_episodes;
mod update_podcast;

pub use download_image::{DownloadImageHandler, MediaAsset, MEDIA_ASSET_META};
pub use import_episodes::{EpisodeImporter, ImportEpisodesHandler, StoreImporter, IMPORTED_EPISODE_META};
pub use update_podcast::UpdatePodcastHandler;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use super::task::{CompletedWork, Task, TaskKind};
use crate::feed::FetchError;
use crate::service::FeedService;
use crate::storage::StoreError;

/// Result of one handler run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed(CompletedWork),
    /// Nothing was done; leave the task as it is.
    Pending,
}

/// Errors a handler can fail with. Each one costs the task an attempt.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Episode import was requested while auto-import is switched off
    #[error("Episode import is disabled")]
    ImportDisabled,
    /// The task or the feed it refers to lacks required data
    #[error("Task data missing: {0}")]
    TaskDataMissing(&'static str),
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The handler panicked; the message is the panic payload when it is a string
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn kind(&self) -> TaskKind;

    async fn handle(&self, task: &Task) -> Result<TaskOutcome, TaskError>;
}

/// Maps each task kind to the handler that runs it.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for the kind it reports, replacing any previous one.
    pub fn with_handler<H: TaskHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.insert(handler.kind(), Arc::new(handler));
        self
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// The three built-in handlers wired to `service`.
    pub fn standard(
        service: Arc<FeedService>,
        media_dir: PathBuf,
        importer: Arc<dyn EpisodeImporter>,
    ) -> Self {
        Self::new()
            .with_handler(DownloadImageHandler::new(Arc::clone(&service), media_dir))
            .with_handler(ImportEpisodesHandler::new(Arc::clone(&service), importer))
            .with_handler(UpdatePodcastHandler::new(service))
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&TaskKind> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("HandlerRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}
