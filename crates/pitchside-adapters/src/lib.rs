//! Source adapter contract + the two site adapters.
//!
//! An adapter knows one page shape: how to materialize its lazily loaded
//! listing, how to enumerate candidate records out of the materialized view,
//! and how to fetch the per-item supplement. New sites are added by
//! implementing [`SourceAdapter`], not by branching on a site name anywhere.

use async_trait::async_trait;
use pitchside_backend::{Backend, Element};
use pitchside_core::{CandidateRecord, HarvestError, Supplement};

pub mod convergence;
pub mod dates;
pub mod odds;
pub mod search;

pub use convergence::ConvergenceDetector;
pub use odds::OddsListingAdapter;
pub use search::SearchResultsAdapter;

pub const CRATE_NAME: &str = "pitchside-adapters";

/// The complete set of list items after all lazy loading has been exhausted.
#[derive(Debug, Clone)]
pub enum MaterializedView {
    /// Round groups still live in the page; enumeration reads them in place.
    Grouped(Vec<Element>),
    /// Rows captured while walking pagination; the originating pages are gone
    /// by the time enumeration runs.
    Paged(Vec<CapturedRow>),
}

impl MaterializedView {
    pub fn len(&self) -> usize {
        match self {
            MaterializedView::Grouped(groups) => groups.len(),
            MaterializedView::Paged(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One odds listing row, captured as text before its page is paged away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRow {
    pub date_text: Option<String>,
    pub home: String,
    pub away: String,
    pub score_text: Option<String>,
}

/// Capability set of one harvestable source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_name(&self) -> &'static str;

    fn listing_url(&self) -> &str;

    /// Slot count of this source's supplement; the sentinel form has this
    /// many empty slots.
    fn supplement_slots(&self) -> usize;

    /// Navigate to the listing and acknowledge the consent interstitial.
    /// Re-invoked from scratch when the operator asserts a manual fix.
    async fn handshake(&self, backend: &dyn Backend) -> Result<(), HarvestError>;

    /// Drive pagination/scroll controls until the listing is fully loaded.
    async fn materialize(&self, backend: &dyn Backend) -> Result<MaterializedView, HarvestError>;

    /// Extract every fully populated candidate from the view. Blocks that
    /// cannot yield all required fields are skipped silently.
    async fn enumerate(
        &self,
        backend: &dyn Backend,
        view: &MaterializedView,
    ) -> Result<Vec<CandidateRecord>, HarvestError>;

    /// Fetch the per-item enrichment. Legitimate unavailability yields the
    /// sentinel supplement; only structural timeouts surface as errors.
    async fn fetch_supplement(
        &self,
        backend: &dyn Backend,
        candidate: &CandidateRecord,
    ) -> Result<Supplement, HarvestError>;
}
