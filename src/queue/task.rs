use serde::{Deserialize, Serialize};

use crate::util::{content_hash, is_http_url, short_hash};

/// Item key reserved for the feed's cover image in a download batch.
pub const COVER_IMAGE_KEY: &str = "cover_image";

pub const DEFAULT_PRIORITY: i32 = 10;

/// Length of a task id in hex characters.
const TASK_ID_LEN: usize = 12;

// ============================================================================
// Kinds and payloads
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    DownloadImage,
    ImportEpisodes,
    UpdatePodcastData,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [
        TaskKind::DownloadImage,
        TaskKind::ImportEpisodes,
        TaskKind::UpdatePodcastData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::DownloadImage => "download_image",
            TaskKind::ImportEpisodes => "import_episodes",
            TaskKind::UpdatePodcastData => "update_podcast_data",
        }
    }

    /// Whether a second enqueue merges into the outstanding task instead of
    /// replacing it.
    pub fn is_coalescible(&self) -> bool {
        matches!(self, TaskKind::DownloadImage | TaskKind::ImportEpisodes)
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRequest {
    /// Episode key, or [`COVER_IMAGE_KEY`].
    pub key: String,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    DownloadImage { items: Vec<ImageRequest> },
    ImportEpisodes { episodes: Vec<String> },
    UpdatePodcastData { feed_url: String },
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::DownloadImage { .. } => TaskKind::DownloadImage,
            TaskPayload::ImportEpisodes { .. } => TaskKind::ImportEpisodes,
            TaskPayload::UpdatePodcastData { .. } => TaskKind::UpdatePodcastData,
        }
    }

    /// Folds `incoming` into this payload.
    ///
    /// Image items merge by key: a known key is overwritten in place and new
    /// keys are appended. Episode lists merge as an ordered set union. Any
    /// other combination replaces the payload.
    pub fn merge(&mut self, incoming: TaskPayload) {
        match (self, incoming) {
            (TaskPayload::DownloadImage { items }, TaskPayload::DownloadImage { items: new }) => {
                for item in new {
                    match items.iter_mut().find(|existing| existing.key == item.key) {
                        Some(existing) => *existing = item,
                        None => items.push(item),
                    }
                }
            }
            (
                TaskPayload::ImportEpisodes { episodes },
                TaskPayload::ImportEpisodes { episodes: new },
            ) => {
                for key in new {
                    if !episodes.contains(&key) {
                        episodes.push(key);
                    }
                }
            }
            (current, incoming) => *current = incoming,
        }
    }

    /// Drops finished entries. Returns `true` when nothing is left to do.
    pub fn remove_completed(&mut self, work: &CompletedWork) -> bool {
        match (self, work) {
            (TaskPayload::DownloadImage { items }, CompletedWork::Images(keys)) => {
                items.retain(|item| !keys.contains(&item.key));
                items.is_empty()
            }
            (TaskPayload::ImportEpisodes { episodes }, CompletedWork::Episodes(keys)) => {
                episodes.retain(|key| !keys.contains(key));
                episodes.is_empty()
            }
            _ => true,
        }
    }
}

/// What a handler finished during one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletedWork {
    /// The whole task is done.
    All,
    /// Image item keys that are done.
    Images(Vec<String>),
    /// Episode keys that are done.
    Episodes(Vec<String>),
}

// ============================================================================
// Task
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Groups related tasks, typically the hash of a feed URL.
    pub routing_id: String,
    pub payload: TaskPayload,
    /// Lower runs first.
    pub priority: i32,
    pub attempts: u32,
}

impl Task {
    pub fn new(routing_id: &str, payload: TaskPayload, priority: i32) -> Self {
        let routing_id = normalize_routing_id(routing_id);
        Self {
            id: task_id(&routing_id, payload.kind()),
            routing_id,
            payload,
            priority,
            attempts: 0,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }
}

/// Feed URLs are stored as the same hash the object register uses for its
/// unique ids; other routing ids are kept as given.
pub fn normalize_routing_id(routing_id: &str) -> String {
    if is_http_url(routing_id) {
        content_hash(routing_id)
    } else {
        routing_id.to_string()
    }
}

/// Identifier shared by every task for one (routing id, kind) pair.
pub fn task_id(normalized_routing_id: &str, kind: TaskKind) -> String {
    short_hash(&format!("{normalized_routing_id}{kind}"), TASK_ID_LEN)
}
