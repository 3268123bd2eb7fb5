use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

// ============================================================================
// Cache Duration
// ============================================================================

/// How long a fetched feed is considered fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheDuration {
    ThirtyMinutes,
    OneHour,
    SixHours,
    #[default]
    OneDay,
    SevenDays,
}

impl CacheDuration {
    pub fn as_secs(&self) -> u64 {
        match self {
            CacheDuration::ThirtyMinutes => 30 * 60,
            CacheDuration::OneHour => 3600,
            CacheDuration::SixHours => 6 * 3600,
            CacheDuration::OneDay => 24 * 3600,
            CacheDuration::SevenDays => 7 * 24 * 3600,
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.as_secs())
    }
}

impl std::fmt::Display for CacheDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CacheDuration::ThirtyMinutes => "30m",
            CacheDuration::OneHour => "1h",
            CacheDuration::SixHours => "6h",
            CacheDuration::OneDay => "1d",
            CacheDuration::SevenDays => "7d",
        };
        f.write_str(label)
    }
}

// ============================================================================
// Episode
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Audio,
    Video,
}

impl MediaType {
    /// Media type implied by a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "mp3" | "m4a" | "ogg" | "oga" | "wav" | "aac" | "flac" | "opus" => Some(Self::Audio),
            "mp4" | "m4v" | "mov" | "webm" | "ogv" => Some(Self::Video),
            _ => None,
        }
    }

    /// Media type implied by a MIME type such as `audio/mpeg`.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.to_ascii_lowercase();
        if mime.contains("audio") {
            Some(Self::Audio)
        } else if mime.contains("video") {
            Some(Self::Video)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeType {
    #[default]
    Full,
    Trailer,
    Bonus,
}

impl EpisodeType {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "trailer" => Self::Trailer,
            "bonus" => Self::Bonus,
            _ => Self::Full,
        }
    }
}

/// Publication instant plus the UTC offset it was published with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PublishedAt {
    /// Unix timestamp (UTC). 0 when the feed gave no usable date.
    pub timestamp: i64,
    /// Offset from UTC in seconds, as written in the feed.
    pub offset_secs: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub url: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeRecord {
    /// Content hash of `media_url`; unique within a feed.
    pub key: String,
    pub title: String,
    pub description: String,
    pub author: String,
    pub published: PublishedAt,
    pub link: String,
    pub media_url: String,
    pub media_type: MediaType,
    pub featured_image: Option<String>,
    pub featured_asset: Option<i64>,
    /// `season-episode` when a season is present, else the bare episode number.
    pub episode: Option<String>,
    pub season: Option<u32>,
    /// Normalized label → label as written.
    pub categories: BTreeMap<String, String>,
    /// Survives media URL changes: Atom id, RSS guid or a hash of the title.
    pub episode_id: String,
    pub duration_secs: Option<u64>,
    pub episode_type: EpisodeType,
    pub post_id: Option<i64>,
    pub transcripts: Vec<Transcript>,
    /// Chapters URL → MIME type.
    pub chapters: BTreeMap<String, String>,
}

// ============================================================================
// Feed
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Owner {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PodcastCategory {
    pub label: String,
    pub subcategories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingLink {
    pub url: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedRecord {
    pub title: String,
    pub description: String,
    pub link: String,
    pub image: Option<String>,
    pub cover_asset: Option<i64>,
    pub feed_url: String,
    /// Content hash of `feed_url`.
    pub feed_key: String,
    pub copyright: String,
    pub author: String,
    pub owner: Owner,
    /// Normalized label → iTunes category.
    pub podcast_categories: BTreeMap<String, PodcastCategory>,
    pub funding: Vec<FundingLink>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub is_active: bool,
    /// Estimated days between releases.
    pub release_cycle: f64,
    pub last_released: i64,
    pub cache_duration: CacheDuration,
    pub seasons: Vec<u32>,
    /// Union of the episode categories.
    pub categories: BTreeMap<String, String>,
    pub total: usize,
    pub items: Vec<EpisodeRecord>,
}

impl Default for FeedRecord {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            link: String::new(),
            image: None,
            cover_asset: None,
            feed_url: String::new(),
            feed_key: String::new(),
            copyright: String::new(),
            author: String::new(),
            owner: Owner::default(),
            podcast_categories: BTreeMap::new(),
            funding: Vec::new(),
            etag: None,
            last_modified: None,
            is_active: true,
            release_cycle: 7.0,
            last_released: 0,
            cache_duration: CacheDuration::OneDay,
            seasons: Vec::new(),
            categories: BTreeMap::new(),
            total: 0,
            items: Vec::new(),
        }
    }
}

impl FeedRecord {
    pub fn episode(&self, key: &str) -> Option<&EpisodeRecord> {
        self.items.iter().find(|item| item.key == key)
    }

    /// Recomputes `seasons`, `categories` and `total` from `items`.
    pub fn refresh_derived(&mut self) {
        let mut seasons: Vec<u32> = self.items.iter().filter_map(|i| i.season).collect();
        seasons.sort_unstable();
        seasons.dedup();
        self.seasons = seasons;

        self.categories = self
            .items
            .iter()
            .flat_map(|i| i.categories.iter())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        self.total = self.items.len();
    }
}

// ============================================================================
// Local overrides
// ============================================================================

/// Per-episode values set locally rather than read from the feed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeOverrides {
    pub featured_asset: Option<i64>,
    pub post_id: Option<i64>,
}

/// Local data layered over a fetched [`FeedRecord`] on every read.
///
/// Stored separately from the feed data so a refresh never loses it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedOverrides {
    pub cover_asset: Option<i64>,
    /// Episode key → overrides.
    pub items: BTreeMap<String, EpisodeOverrides>,
}

impl FeedOverrides {
    /// Copies override values onto `feed`, skipping episodes that no longer exist.
    pub fn apply(&self, feed: &mut FeedRecord) {
        if self.cover_asset.is_some() {
            feed.cover_asset = self.cover_asset;
        }
        for item in &mut feed.items {
            let Some(overrides) = self.items.get(&item.key) else {
                continue;
            };
            if overrides.featured_asset.is_some() {
                item.featured_asset = overrides.featured_asset;
            }
            if overrides.post_id.is_some() {
                item.post_id = overrides.post_id;
            }
        }
    }
}
