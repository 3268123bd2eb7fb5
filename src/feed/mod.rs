//! Podcast feed retrieval, extraction and reconciliation.
//!
//! - [`fetcher`] - Conditional HTTP GET with retry, size limits and cache validators
//! - [`xml`] - Namespace-resolved element tree over `quick-xml`
//! - [`parser`] - RSS/Atom extraction into a [`FeedRecord`]
//! - [`sanitize`] - Per-field normalization (dates, durations, categories)
//! - [`cadence`] - Release cycle and cache tier estimation
//! - [`reconcile`] - Episode identity across re-fetches
//!
//! # Example
//!
//! ```ignore
//! use podkeeper::feed::{build_client, FeedFetcher, FetchOutcome, Validators};
//!
//! let fetcher = FeedFetcher::new(build_client(timeout)?, timeout);
//! match fetcher.fetch(url, Validators::default()).await? {
//!     FetchOutcome::Fetched(feed) => println!("{} episodes", feed.total),
//!     FetchOutcome::NotModified => {}
//! }
//! ```

pub mod cadence;
mod fetcher;
mod parser;
pub mod reconcile;
pub mod sanitize;
mod types;
pub mod xml;

pub use cadence::{analyze, Cadence};
pub use fetcher::{build_client, FeedFetcher, FetchError, FetchOutcome, Validators};
pub use parser::parse_feed;
pub use reconcile::{reconcile, Reconciled};
pub use types::{
    CacheDuration, EpisodeOverrides, EpisodeRecord, EpisodeType, FeedOverrides, FeedRecord,
    FundingLink, MediaType, Owner, PodcastCategory, PublishedAt, Transcript,
};
pub use xml::{Severity, XmlIssue};
