use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use super::{TaskError, TaskHandler, TaskOutcome};
use crate::queue::task::{CompletedWork, ImageRequest, Task, TaskKind, TaskPayload, COVER_IMAGE_KEY};
use crate::service::FeedService;
use crate::storage::save_meta;
use crate::util::{content_hash, url_extension};

/// Attribute name under which an asset object stores its [`MediaAsset`].
pub const MEDIA_ASSET_META: &str = "media_asset";

/// Items considered per run.
const BATCH_LIMIT: usize = 50;

/// Downloads started per run; the rest wait for the next cycle.
const DOWNLOADS_PER_RUN: usize = 2;

const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

const FALLBACK_EXTENSION: &str = "jpg";

/// A downloaded image and where it lives on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub url: String,
    pub title: String,
    pub path: PathBuf,
}

/// Saves cover and episode images into the media directory.
///
/// Every saved image becomes a hidden object keyed by its source URL, so an
/// image shared by several episodes is downloaded once.
pub struct DownloadImageHandler {
    service: Arc<FeedService>,
    media_dir: PathBuf,
}

impl DownloadImageHandler {
    pub fn new(service: Arc<FeedService>, media_dir: PathBuf) -> Self {
        Self { service, media_dir }
    }

    fn file_name(url: &str) -> String {
        let ext = url_extension(url)
            .filter(|ext| ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| FALLBACK_EXTENSION.to_string());
        format!("{}.{}", content_hash(url), ext)
    }

    /// Downloads one image. A failed download yields `Ok(None)`.
    async fn save(&self, request: &ImageRequest) -> Result<Option<i64>, TaskError> {
        let bytes = match self
            .service
            .fetcher()
            .download(&request.url, MAX_IMAGE_SIZE)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(url = %request.url, error = %e, "Image download failed, skipping");
                return Ok(None);
            }
        };

        tokio::fs::create_dir_all(&self.media_dir).await?;
        let path = self.media_dir.join(Self::file_name(&request.url));
        tokio::fs::write(&path, &bytes).await?;

        let objects = self.service.objects();
        let asset_id = objects
            .maybe_add_new_object(&request.url, &request.title)
            .await?;
        objects.hide(&request.url).await?;
        let asset = MediaAsset {
            url: request.url.clone(),
            title: request.title.clone(),
            path,
        };
        save_meta(objects.store().as_ref(), asset_id, MEDIA_ASSET_META, &asset).await?;

        tracing::debug!(url = %request.url, asset_id, bytes = bytes.len(), "Saved image");
        Ok(Some(asset_id))
    }
}

#[async_trait]
impl TaskHandler for DownloadImageHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::DownloadImage
    }

    async fn handle(&self, task: &Task) -> Result<TaskOutcome, TaskError> {
        let TaskPayload::DownloadImage { items } = &task.payload else {
            return Err(TaskError::TaskDataMissing("image items"));
        };

        if !self.service.settings().await?.save_images {
            tracing::debug!(task_id = %task.id, "Image saving is off, discarding download task");
            return Ok(TaskOutcome::Completed(CompletedWork::All));
        }
        if items.is_empty() || task.routing_id.is_empty() {
            return Err(TaskError::TaskDataMissing("image items"));
        }

        let objects = self.service.objects();
        let mut completed = Vec::new();
        let mut assets: Vec<(String, i64)> = Vec::new();
        let mut downloads = 0;

        for request in items.iter().take(BATCH_LIMIT) {
            if let Some(existing) = objects.lookup(&request.url).await? {
                assets.push((request.key.clone(), existing.object_id));
                completed.push(request.key.clone());
                continue;
            }
            if downloads == DOWNLOADS_PER_RUN {
                continue;
            }
            downloads += 1;

            if let Some(asset_id) = self.save(request).await? {
                assets.push((request.key.clone(), asset_id));
            }
            completed.push(request.key.clone());
        }

        if !assets.is_empty() {
            self.service
                .update_overrides(&task.routing_id, |overrides| {
                    for (key, asset_id) in assets {
                        if key == COVER_IMAGE_KEY {
                            overrides.cover_asset = Some(asset_id);
                        } else {
                            overrides.items.entry(key).or_default().featured_asset =
                                Some(asset_id);
                        }
                    }
                })
                .await?;
        }

        Ok(TaskOutcome::Completed(CompletedWork::Images(completed)))
    }
}
