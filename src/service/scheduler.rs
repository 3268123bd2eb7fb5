use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::FeedService;
use crate::feed::FeedRecord;
use crate::queue::TaskPayload;
use crate::storage::{DataKind, StoreError};

/// Periodically queues a refresh for every stored feed whose cache expired.
pub struct Scheduler {
    service: Arc<FeedService>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(service: Arc<FeedService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Queues `update_podcast_data` for each due feed and wakes the workers.
    ///
    /// Returns the number of feeds queued.
    pub async fn tick(&self) -> Result<usize, StoreError> {
        let objects = self.service.objects();
        let mut queued = 0;

        for index in objects.list_visible().await? {
            let url = index.primary_key();
            let Some(feed) = objects
                .get_data::<FeedRecord>(url, DataKind::FeedData)
                .await?
            else {
                continue;
            };
            if !self.service.is_fetch_due(url, &feed).await? {
                continue;
            }

            self.service
                .queue()
                .enqueue(
                    url,
                    TaskPayload::UpdatePodcastData {
                        feed_url: url.to_string(),
                    },
                    None,
                )
                .await?;
            queued += 1;
        }

        if queued > 0 {
            tracing::info!(feeds = queued, "Queued feed refreshes");
            self.service.queue().dispatch().await?;
        }
        Ok(queued)
    }

    /// Runs [`tick`](Self::tick) on the interval until the task is aborted.
    /// The first tick fires immediately.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(self.interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                timer.tick().await;
                if let Err(e) = self.tick().await {
                    tracing::error!(error = %e, "Scheduler tick failed");
                }
            }
        })
    }
}
