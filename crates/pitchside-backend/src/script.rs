//! JSON page scripts for the scripted backend.
//!
//! A script maps URLs to page descriptions. Pages are rendered into a small
//! class-tagged node tree using the same class names the live sources expose,
//! so the adapters run unchanged against scripted and real backends.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level fixture: every URL the harvest will touch, including per-match
/// detail queries and odds detail contexts. Navigating to an unmapped URL
/// renders an empty page, so waits against it time out like a dead page would.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarvestScript {
    pub pages: BTreeMap<String, PageScript>,
}

impl HarvestScript {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading backend script {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing backend script {}", path.display()))
    }

    pub fn page(&self, url: &str) -> Option<&PageScript> {
        self.pages.get(url)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageScript {
    SearchResults(SearchResultsScript),
    MatchDetail(MatchDetailScript),
    OddsListing(OddsListingScript),
    OddsDetail(OddsDetailScript),
    Blank,
}

/// The search-results page: round groups with lazily loaded neighbours above
/// and below the initially visible window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultsScript {
    #[serde(default)]
    pub consent_button: bool,
    /// `None` renders no expand control at all.
    pub expand_control: Option<ExpandControl>,
    pub groups: Vec<GroupScript>,
    /// Groups revealed batch-wise when focus reaches the first visible group,
    /// ordered top to bottom.
    #[serde(default)]
    pub groups_above: Vec<GroupScript>,
    /// Groups revealed batch-wise when focus reaches the last visible group.
    #[serde(default)]
    pub groups_below: Vec<GroupScript>,
    #[serde(default = "default_reveal_batch")]
    pub reveal_batch: usize,
}

fn default_reveal_batch() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandControl {
    #[serde(default = "default_true")]
    pub clickable: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupScript {
    pub round_label: Option<String>,
    pub blocks: Vec<BlockScript>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockScript {
    pub date_text: String,
    pub home: String,
    pub away: String,
    pub score_home: Option<u32>,
    pub score_away: Option<u32>,
    /// Whether the block carries the completed-result marker.
    #[serde(default)]
    pub finished: bool,
    /// Render with a missing team cell, as truncated live markup sometimes is.
    #[serde(default)]
    pub malformed: bool,
    /// Render an entirely empty block container.
    #[serde(default)]
    pub empty: bool,
}

/// A per-match detail page behind the "more about this match" control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchDetailScript {
    /// Whether the details control exists and is clickable.
    #[serde(default = "default_true")]
    pub details_control: bool,
    /// Raw statistic row texts, e.g. `"12 Attempts 8"`. `None` means the
    /// statistics panel never appears after the click.
    pub stat_rows: Option<Vec<String>>,
}

/// The paged odds listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsListingScript {
    #[serde(default)]
    pub consent_button: bool,
    pub pages: Vec<OddsPageScript>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsPageScript {
    pub rows: Vec<OddsRowScript>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsRowScript {
    /// Row-local date text; most rows inherit the last seen date instead.
    pub date_text: Option<String>,
    pub home: String,
    pub away: String,
    /// Final score like `"2:1"`; absent for upcoming fixtures.
    pub score_text: Option<String>,
}

/// A per-row odds detail context listing named-source price triples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsDetailScript {
    pub quotes: Vec<OddsQuoteScript>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsQuoteScript {
    pub source: String,
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}
