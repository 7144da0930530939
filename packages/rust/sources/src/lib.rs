//! Evidence sources: interchangeable collectors of leadership evidence.
//!
//! Three kinds exist — web leadership pages, registry filings, and press
//! news — but the pipeline treats them uniformly through the
//! [`EvidenceSource`] trait. Sources never fail for ordinary data-not-found
//! conditions: soft problems land in [`Collected::errors`] and the caller
//! decides what to do with a thin result.

pub mod extract;
mod filing;
mod news;
mod web;

use async_trait::async_trait;

use orgscope_shared::{BusinessUnit, Collected};

pub use filing::{FilingSource, FiledOfficer};
pub use news::NewsSource;
pub use web::WebLeadershipSource;

/// A collector of leadership evidence for one business unit.
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    /// Short source name used in provenance and run reports.
    fn name(&self) -> &'static str;

    /// Whether this source's prerequisite is present on the unit
    /// (a website for web scraping, a registry id for filings).
    fn available(&self, unit: &BusinessUnit) -> bool;

    /// Collect people and change records for `unit`. Data-not-found is an
    /// empty result, never an error.
    async fn collect(&self, unit: &BusinessUnit) -> Collected;
}
