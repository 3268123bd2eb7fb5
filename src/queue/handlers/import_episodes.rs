use async_trait::async_trait;
use std::sync::Arc;

use super::{TaskError, TaskHandler, TaskOutcome};
use crate::feed::{EpisodeRecord, FeedRecord};
use crate::queue::task::{CompletedWork, Task, TaskKind, TaskPayload};
use crate::service::FeedService;
use crate::storage::{save_meta, DataKind, ObjectStore};

/// Attribute name under which an imported post stores its episode.
pub const IMPORTED_EPISODE_META: &str = "imported_episode";

/// Episodes imported per run.
const IMPORT_LIMIT: usize = 10;

/// Turns an episode into a post in whatever publishes them.
#[async_trait]
pub trait EpisodeImporter: Send + Sync {
    /// Returns the id of the created post. Importing the same episode twice
    /// should return the same id.
    async fn import(&self, feed: &FeedRecord, episode: &EpisodeRecord) -> Result<i64, TaskError>;
}

/// Stores each imported episode as a hidden object of its own; the object id
/// is the post id.
pub struct StoreImporter {
    objects: ObjectStore,
}

impl StoreImporter {
    pub fn new(objects: ObjectStore) -> Self {
        Self { objects }
    }

    fn post_key(feed: &FeedRecord, episode: &EpisodeRecord) -> String {
        format!("{}#{}", feed.feed_key, episode.key)
    }
}

#[async_trait]
impl EpisodeImporter for StoreImporter {
    async fn import(&self, feed: &FeedRecord, episode: &EpisodeRecord) -> Result<i64, TaskError> {
        let key = Self::post_key(feed, episode);
        let post_id = self.objects.maybe_add_new_object(&key, &episode.title).await?;
        self.objects.hide(&key).await?;
        save_meta(
            self.objects.store().as_ref(),
            post_id,
            IMPORTED_EPISODE_META,
            episode,
        )
        .await?;
        Ok(post_id)
    }
}

pub struct ImportEpisodesHandler {
    service: Arc<FeedService>,
    importer: Arc<dyn EpisodeImporter>,
}

impl ImportEpisodesHandler {
    pub fn new(service: Arc<FeedService>, importer: Arc<dyn EpisodeImporter>) -> Self {
        Self { service, importer }
    }
}

#[async_trait]
impl TaskHandler for ImportEpisodesHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::ImportEpisodes
    }

    async fn handle(&self, task: &Task) -> Result<TaskOutcome, TaskError> {
        let TaskPayload::ImportEpisodes { episodes } = &task.payload else {
            return Err(TaskError::TaskDataMissing("episode keys"));
        };
        if episodes.is_empty() || task.routing_id.is_empty() {
            return Err(TaskError::TaskDataMissing("episode keys"));
        }
        if !self.service.settings().await?.auto_import {
            return Err(TaskError::ImportDisabled);
        }

        let Some(mut feed) = self
            .service
            .objects()
            .get_data::<FeedRecord>(&task.routing_id, DataKind::FeedData)
            .await?
        else {
            return Err(TaskError::TaskDataMissing("feed data"));
        };
        self.service.overrides(&task.routing_id).await?.apply(&mut feed);

        let mut imported = Vec::new();
        for key in episodes.iter().take(IMPORT_LIMIT) {
            let Some(episode) = feed.episode(key) else {
                tracing::debug!(task_id = %task.id, episode = %key, "Episode left the feed, skipping import");
                imported.push(key.clone());
                continue;
            };
            if episode.post_id.is_some() {
                imported.push(key.clone());
                continue;
            }

            let post_id = self.importer.import(&feed, episode).await?;
            // Recorded one at a time so a later failure keeps earlier posts.
            self.service
                .update_overrides(&task.routing_id, |overrides| {
                    overrides.items.entry(key.clone()).or_default().post_id = Some(post_id);
                })
                .await?;
            tracing::info!(feed = %feed.title, episode = %episode.title, post_id, "Imported episode");
            imported.push(key.clone());
        }

        Ok(TaskOutcome::Completed(CompletedWork::Episodes(imported)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::service;
    use crate::storage::{load_meta, RuntimeSettings};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FEED: &str = "https://example.com/feed.xml";

    fn episode(key: &str) -> EpisodeRecord {
        EpisodeRecord {
            key: key.into(),
            title: format!("Episode {key}"),
            media_url: format!("https://cdn.example.com/{key}.mp3"),
            ..EpisodeRecord::default()
        }
    }

    async fn stored_service(auto_import: bool, keys: &[&str]) -> Arc<FeedService> {
        let (service, _) = service(RuntimeSettings {
            auto_import,
            ..RuntimeSettings::default()
        })
        .await;
        let objects = service.objects();
        objects.maybe_add_new_object(FEED, "Show").await.unwrap();
        let feed = FeedRecord {
            title: "Show".into(),
            feed_url: FEED.into(),
            feed_key: crate::util::content_hash(FEED),
            items: keys.iter().map(|k| episode(k)).collect(),
            ..FeedRecord::default()
        };
        objects
            .update_data(&feed, FEED, DataKind::FeedData, None)
            .await
            .unwrap();
        service
    }

    fn task(keys: &[&str]) -> Task {
        Task::new(
            FEED,
            TaskPayload::ImportEpisodes {
                episodes: keys.iter().map(|k| k.to_string()).collect(),
            },
            10,
        )
    }

    /// Fails on the given call, counting from zero.
    struct FlakyImporter {
        calls: AtomicUsize,
        fail_on: usize,
    }

    #[async_trait]
    impl EpisodeImporter for FlakyImporter {
        async fn import(&self, _feed: &FeedRecord, _episode: &EpisodeRecord) -> Result<i64, TaskError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == self.fail_on {
                return Err(TaskError::TaskDataMissing("flaky"));
            }
            Ok(100 + call as i64)
        }
    }

    #[tokio::test]
    async fn test_imports_and_records_post_ids() {
        let service = stored_service(true, &["a", "b"]).await;
        let importer = Arc::new(StoreImporter::new(service.objects().clone()));
        let handler = ImportEpisodesHandler::new(Arc::clone(&service), importer);

        let outcome = handler.handle(&task(&["a", "b"])).await.unwrap();
        assert_eq!(
            outcome,
            TaskOutcome::Completed(CompletedWork::Episodes(vec!["a".into(), "b".into()]))
        );

        let overrides = service.overrides(FEED).await.unwrap();
        let post_id = overrides.items["a"].post_id.unwrap();
        assert!(overrides.items["b"].post_id.is_some());

        let stored: EpisodeRecord =
            load_meta(service.objects().store().as_ref(), post_id, IMPORTED_EPISODE_META)
                .await
                .unwrap()
                .unwrap();
        assert_eq!(stored.key, "a");
        assert_eq!(service.objects().list_visible().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_already_imported_is_not_imported_again() {
        let service = stored_service(true, &["a"]).await;
        let importer = Arc::new(FlakyImporter {
            calls: AtomicUsize::new(0),
            fail_on: usize::MAX,
        });
        let handler = ImportEpisodesHandler::new(Arc::clone(&service), importer.clone());

        handler.handle(&task(&["a"])).await.unwrap();
        handler.handle(&task(&["a"])).await.unwrap();
        assert_eq!(importer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_earlier_posts() {
        let service = stored_service(true, &["a", "b"]).await;
        let importer = Arc::new(FlakyImporter {
            calls: AtomicUsize::new(0),
            fail_on: 1,
        });
        let handler = ImportEpisodesHandler::new(Arc::clone(&service), importer);

        assert!(handler.handle(&task(&["a", "b"])).await.is_err());
        let overrides = service.overrides(FEED).await.unwrap();
        assert_eq!(overrides.items["a"].post_id, Some(100));
        assert!(!overrides.items.contains_key("b"));
    }

    #[tokio::test]
    async fn test_vanished_episode_counts_as_done() {
        let service = stored_service(true, &["a"]).await;
        let importer = Arc::new(StoreImporter::new(service.objects().clone()));
        let handler = ImportEpisodesHandler::new(service, importer);

        assert_eq!(
            handler.handle(&task(&["gone"])).await.unwrap(),
            TaskOutcome::Completed(CompletedWork::Episodes(vec!["gone".into()]))
        );
    }

    #[tokio::test]
    async fn test_disabled_and_missing_data() {
        let service = stored_service(false, &["a"]).await;
        let importer = Arc::new(StoreImporter::new(service.objects().clone()));
        let handler = ImportEpisodesHandler::new(service, importer);

        assert!(matches!(
            handler.handle(&task(&[])).await,
            Err(TaskError::TaskDataMissing(_))
        ));
        assert!(matches!(
            handler.handle(&task(&["a"])).await,
            Err(TaskError::ImportDisabled)
        ));
    }
}
