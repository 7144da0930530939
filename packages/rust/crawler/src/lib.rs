//! Bounded, scope-aware page fetching for discovery and evidence collection.
//!
//! This crate provides:
//! - [`engine`] — budgeted BFS crawler with an explicit work queue
//! - [`limiter`] — per-domain rate limiter and TTL response cache
//! - [`fetch`] — single-page fetch with classified retry behavior
//!
//! Every crawl carries an explicit budget (`max_pages`, `max_depth`) that is
//! checked before each new unit of work, guaranteeing termination no matter
//! how many links a site exposes.

pub mod engine;
pub mod fetch;
pub mod limiter;

pub use engine::{
    CrawledPage, CrawlReport, Crawler, CrawlerConfig, SharedCrawl, extract_links, normalize_url,
};
pub use fetch::fetch_with_retry;
pub use limiter::{RateLimiter, ResponseCache};
