//! Feed orchestration: when to fetch, how to merge, what to queue afterwards.

mod scheduler;

pub use scheduler::Scheduler;

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::feed::{
    reconcile, FeedFetcher, FeedOverrides, FeedRecord, FetchError, FetchOutcome, Validators,
};
use crate::queue::{ImageRequest, JobQueue, TaskPayload, COVER_IMAGE_KEY};
use crate::storage::{DataKind, ObjectStore, RuntimeSettings, StoreError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Reads, refreshes and removes feeds.
pub struct FeedService {
    objects: ObjectStore,
    fetcher: FeedFetcher,
    queue: Arc<JobQueue>,
}

impl FeedService {
    pub fn new(objects: ObjectStore, fetcher: FeedFetcher, queue: Arc<JobQueue>) -> Self {
        Self {
            objects,
            fetcher,
            queue,
        }
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn fetcher(&self) -> &FeedFetcher {
        &self.fetcher
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub async fn settings(&self) -> Result<RuntimeSettings, StoreError> {
        RuntimeSettings::load(self.objects.store().as_ref()).await
    }

    /// Returns the feed with local overrides applied, fetching it first when
    /// it is unknown or its cache has expired.
    ///
    /// A failed refresh of a known feed serves the stored copy; the next due
    /// check retries.
    pub async fn get_feed(&self, url: &str) -> Result<FeedRecord, ServiceError> {
        let stored: Option<FeedRecord> = self.objects.get_data(url, DataKind::FeedData).await?;

        let due = match &stored {
            Some(stored) => self.is_fetch_due(url, stored).await?,
            None => true,
        };

        let mut feed = match stored {
            Some(stored) if !due => stored,
            stored => match self.fetch_podcast_data(url, stored.clone()).await {
                Ok(fresh) => fresh,
                Err(ServiceError::Fetch(e)) => match stored {
                    Some(stored) => {
                        tracing::warn!(feed = %url, error = %e, "Refresh failed, serving stored copy");
                        stored
                    }
                    None => return Err(e.into()),
                },
                Err(e) => return Err(e),
            },
        };

        self.overrides(url).await?.apply(&mut feed);
        Ok(feed)
    }

    /// True when `feed` was never checked, or its cache duration (capped by
    /// the configured refresh interval) has elapsed since the last check.
    pub async fn is_fetch_due(&self, url: &str, feed: &FeedRecord) -> Result<bool, StoreError> {
        let Some(last_checked) = self
            .objects
            .get_data::<i64>(url, DataKind::LastChecked)
            .await?
        else {
            return Ok(true);
        };

        let settings = self.settings().await?;
        let max_age = feed
            .cache_duration
            .as_secs()
            .min(settings.refresh_interval_minutes.saturating_mul(60));
        let expires = last_checked.saturating_add(i64::try_from(max_age).unwrap_or(i64::MAX));
        Ok(expires < Utc::now().timestamp())
    }

    /// Fetches `url`, merges the result into `old` and stores it.
    ///
    /// New episodes are queued for import and image download according to
    /// the runtime settings, and the worker pool is woken.
    pub async fn fetch_podcast_data(
        &self,
        url: &str,
        old: Option<FeedRecord>,
    ) -> Result<FeedRecord, ServiceError> {
        let settings = self.settings().await?;
        let checked_before = self
            .objects
            .get_data::<i64>(url, DataKind::LastChecked)
            .await?
            .is_some();

        let validators = match &old {
            Some(old) if settings.check_cache_headers && checked_before => Validators {
                etag: old.etag.as_deref(),
                last_modified: old.last_modified.as_deref(),
            },
            _ => Validators::default(),
        };

        let mut feed = match self.fetcher.fetch(url, validators).await? {
            FetchOutcome::Fetched(feed) => *feed,
            FetchOutcome::NotModified => {
                let Some(old) = old else {
                    return Err(FetchError::NoFeedData.into());
                };
                self.stamp_checked(url).await?;
                return Ok(old);
            }
        };

        let reconciled = reconcile(
            std::mem::take(&mut feed.items),
            old.as_ref().map(|o| o.items.as_slice()),
            settings.keep_deleted_episodes,
        );
        feed.items = reconciled.items;
        feed.refresh_derived();

        if self.objects.lookup(url).await?.is_none()
            && self.objects.lookup(&feed.feed_url).await?.is_none()
        {
            self.objects.maybe_add_new_object(url, &feed.title).await?;
        }
        self.objects
            .update_data(&feed, &feed.feed_url, DataKind::FeedData, Some(url))
            .await?;
        self.stamp_checked(url).await?;

        if !reconciled.added.is_empty() || !reconciled.deleted.is_empty() {
            tracing::info!(
                feed = %url,
                added = reconciled.added.len(),
                deleted = reconciled.deleted.len(),
                "Feed episodes changed"
            );
        }

        self.queue_follow_ups(url, &feed, &reconciled.added, &settings)
            .await?;
        Ok(feed)
    }

    async fn queue_follow_ups(
        &self,
        url: &str,
        feed: &FeedRecord,
        added: &[String],
        settings: &RuntimeSettings,
    ) -> Result<(), StoreError> {
        if settings.auto_import && !added.is_empty() {
            self.queue
                .enqueue(
                    url,
                    TaskPayload::ImportEpisodes {
                        episodes: added.to_vec(),
                    },
                    None,
                )
                .await?;
        }

        if settings.save_images {
            let overrides = self.overrides(url).await?;
            let mut items: Vec<ImageRequest> = Vec::new();
            if let Some(cover) = feed.image.as_ref().filter(|_| overrides.cover_asset.is_none()) {
                items.push(ImageRequest {
                    key: COVER_IMAGE_KEY.to_string(),
                    title: feed.title.clone(),
                    url: cover.clone(),
                });
            }
            items.extend(
                feed.items
                    .iter()
                    .filter(|item| added.contains(&item.key))
                    .filter_map(|item| {
                        Some(ImageRequest {
                            key: item.key.clone(),
                            title: item.title.clone(),
                            url: item.featured_image.clone()?,
                        })
                    }),
            );
            if !items.is_empty() {
                self.queue
                    .enqueue(url, TaskPayload::DownloadImage { items }, None)
                    .await?;
            }
        }

        self.queue.dispatch().await?;
        Ok(())
    }

    async fn stamp_checked(&self, url: &str) -> Result<(), StoreError> {
        self.objects
            .update_data(&Utc::now().timestamp(), url, DataKind::LastChecked, None)
            .await?;
        Ok(())
    }

    /// Locally set values layered over the fetched feed.
    pub async fn overrides(&self, url: &str) -> Result<FeedOverrides, StoreError> {
        Ok(self
            .objects
            .get_data(url, DataKind::ModifiedFeedData)
            .await?
            .unwrap_or_default())
    }

    /// Read-modify-write of the overrides for `url`.
    pub async fn update_overrides(
        &self,
        url: &str,
        f: impl FnOnce(&mut FeedOverrides),
    ) -> Result<(), StoreError> {
        let mut overrides = self.overrides(url).await?;
        f(&mut overrides);
        self.objects
            .update_data(&overrides, url, DataKind::ModifiedFeedData, None)
            .await?;
        Ok(())
    }

    /// Deletes a feed and everything stored for it. Returns `false` if unknown.
    pub async fn remove(&self, url: &str) -> Result<bool, StoreError> {
        self.objects.delete_object(url).await
    }
}
