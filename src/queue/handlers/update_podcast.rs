use async_trait::async_trait;
use std::sync::Arc;

use super::{TaskError, TaskHandler, TaskOutcome};
use crate::feed::FeedRecord;
use crate::queue::task::{CompletedWork, Task, TaskKind, TaskPayload};
use crate::service::{FeedService, ServiceError};
use crate::storage::DataKind;

/// Re-fetches a known feed. A failed fetch still completes the task; the
/// next scheduler tick queues another one.
pub struct UpdatePodcastHandler {
    service: Arc<FeedService>,
}

impl UpdatePodcastHandler {
    pub fn new(service: Arc<FeedService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl TaskHandler for UpdatePodcastHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::UpdatePodcastData
    }

    async fn handle(&self, task: &Task) -> Result<TaskOutcome, TaskError> {
        let done = Ok(TaskOutcome::Completed(CompletedWork::All));
        let TaskPayload::UpdatePodcastData { feed_url } = &task.payload else {
            return done;
        };

        let objects = self.service.objects();
        if feed_url.is_empty() || objects.lookup(feed_url).await?.is_none() {
            tracing::debug!(task_id = %task.id, feed = %feed_url, "Feed is not stored, skipping update");
            return done;
        }

        let old = objects
            .get_data::<FeedRecord>(feed_url, DataKind::FeedData)
            .await?;
        match self.service.fetch_podcast_data(feed_url, old).await {
            Ok(feed) => {
                tracing::debug!(feed = %feed_url, episodes = feed.total, "Feed updated");
            }
            Err(ServiceError::Fetch(e)) => {
                tracing::warn!(feed = %feed_url, error = %e, "Feed update failed");
            }
            Err(ServiceError::Storage(e)) => return Err(e.into()),
        }
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::service;
    use crate::storage::RuntimeSettings;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Updated</title>
<item><title>One</title><guid>1</guid>
<enclosure url="https://cdn.example.com/1.mp3" type="audio/mpeg"/></item>
</channel></rss>"#;

    fn task(feed_url: &str) -> Task {
        Task::new(
            feed_url,
            TaskPayload::UpdatePodcastData {
                feed_url: feed_url.into(),
            },
            10,
        )
    }

    #[tokio::test]
    async fn test_unknown_feed_is_skipped() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .expect(0)
            .mount(&mock_server)
            .await;
        let (service, _) = service(RuntimeSettings::default()).await;
        let handler = UpdatePodcastHandler::new(service);

        let outcome = handler
            .handle(&task(&format!("{}/feed", mock_server.uri())))
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Completed(CompletedWork::All));
    }

    #[tokio::test]
    async fn test_known_feed_is_refetched() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .expect(1)
            .mount(&mock_server)
            .await;
        let (service, _) = service(RuntimeSettings::default()).await;
        let url = format!("{}/feed", mock_server.uri());
        service.objects().maybe_add_new_object(&url, "Old").await.unwrap();
        let handler = UpdatePodcastHandler::new(Arc::clone(&service));

        handler.handle(&task(&url)).await.unwrap();

        let feed: FeedRecord = service
            .objects()
            .get_data(&url, DataKind::FeedData)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(feed.title, "Updated");
    }

    #[tokio::test]
    async fn test_fetch_failure_still_completes() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;
        let (service, _) = service(RuntimeSettings::default()).await;
        let url = format!("{}/feed", mock_server.uri());
        service.objects().maybe_add_new_object(&url, "Old").await.unwrap();
        let handler = UpdatePodcastHandler::new(service);

        assert_eq!(
            handler.handle(&task(&url)).await.unwrap(),
            TaskOutcome::Completed(CompletedWork::All)
        );
    }
}
