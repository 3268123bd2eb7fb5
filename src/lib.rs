//! Podcast feed ingestion with episode reconciliation and a self-dispatching
//! background job queue.
//!
//! - [`feed`]: fetching, parsing, cadence analysis and reconciliation
//! - [`storage`]: the key/value store, object register and runtime settings
//! - [`queue`]: the durable task list, its handlers and the worker pool
//! - [`service`]: feed orchestration and the refresh scheduler

pub mod config;
pub mod feed;
pub mod queue;
pub mod service;
pub mod storage;
pub mod util;
