//! Core domain model for pitchside: candidate records, composite keys,
//! supplements and the shared error taxonomy.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "pitchside-core";

/// Per-side match statistics read from the search detail panel, in column order.
pub const STAT_NAMES: [&str; 10] = [
    "Attempts",
    "Attempts_On_Target",
    "Possession",
    "Passes",
    "Passing_Accuracy",
    "Fouls",
    "Yellow_Cards",
    "Red_Cards",
    "Offside",
    "Corners",
];

/// Named odds sources whose home/draw/away price triples are read per listing row.
pub const ODDS_SOURCES: [&str; 3] = ["Bet365", "Pinnacle", "Unibet"];

/// Slot count of a statistics supplement (each stat paired home/away).
pub const STAT_SLOTS: usize = STAT_NAMES.len() * 2;

/// Slot count of an odds supplement (one price triple per source).
pub const ODDS_SLOTS: usize = ODDS_SOURCES.len() * 3;

/// Deterministic natural identity derived from observable record fields.
///
/// No source ever supplies a stable surrogate id, so identity is the ordered
/// tuple (date, home, away, scores-when-present) joined with `_`. Two distinct
/// same-day fixtures between the same sides with identical scores collapse to
/// one key; the sources cannot distinguish them either.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompositeKey(String);

impl CompositeKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One event as enumerated from a materialized listing. Immutable once built;
/// a block that cannot yield every required field is never emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub date: NaiveDate,
    pub round_label: Option<String>,
    pub home: String,
    pub away: String,
    pub score_home: Option<u32>,
    pub score_away: Option<u32>,
    /// Forward-looking listing row with no result yet. Only the odds source
    /// emits these; completed-result filtering happens in the search adapter.
    pub upcoming: bool,
}

impl CandidateRecord {
    pub fn key(&self) -> CompositeKey {
        let mut parts = vec![
            self.date.format("%Y-%m-%d").to_string(),
            self.home.clone(),
            self.away.clone(),
        ];
        if let (Some(home), Some(away)) = (self.score_home, self.score_away) {
            parts.push(home.to_string());
            parts.push(away.to_string());
        }
        CompositeKey(parts.join("_"))
    }
}

/// Fixed-length numeric enrichment slots. The all-`None` form is the explicit
/// "unavailable" sentinel, distinct from zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Supplement {
    slots: Vec<Option<f64>>,
}

impl Supplement {
    pub fn new(slots: Vec<Option<f64>>) -> Self {
        Self { slots }
    }

    pub fn unavailable(len: usize) -> Self {
        Self {
            slots: vec![None; len],
        }
    }

    pub fn slots(&self) -> &[Option<f64>] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_unavailable(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

/// A candidate upgraded with its supplement. Enrichment failure degrades to
/// the sentinel supplement; it never discards the candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub candidate: CandidateRecord,
    pub supplement: Supplement,
}

impl EnrichedRecord {
    pub fn key(&self) -> CompositeKey {
        self.candidate.key()
    }
}

/// What the session expected from the backend when a timeout struck. Shown to
/// the operator verbatim before the 1/2/3 prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub expected: String,
}

impl Diagnostic {
    pub fn expecting(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I'm expecting {} next.", self.expected)
    }
}

/// The fixed three-way recovery decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorChoice {
    /// Page state was fixed manually; re-attempt the same step.
    FixedRetry,
    /// Unfixable; skip the item or abandon the step, keep harvesting.
    ContinueWithout,
    /// Stop harvesting, flush whatever has been captured.
    Abort,
}

/// Blocking human-in-the-loop exchange. The console implementation lives in
/// the session crate; tests use a scripted one.
pub trait Operator: Send + Sync {
    fn resolve_timeout(&self, diagnostic: &Diagnostic) -> OperatorChoice;

    /// Blocks until the operator asserts the locked output file was released.
    fn confirm_output_released(&self, path: &Path);
}

#[derive(Debug, Error)]
pub enum HarvestError {
    /// A required structural element never appeared within its deadline.
    /// Fatal to the current attempt; routed through the recovery protocol.
    #[error("exploration timeout: expected {expected}")]
    ExplorationTimeout { expected: String },

    /// Operator-elected early termination. Not a failure: the session catches
    /// it and proceeds straight to export.
    #[error("harvest aborted by operator")]
    SessionAborted,

    /// The durable flush target cannot be written right now.
    #[error("output resource locked: {}", path.display())]
    OutputResourceLocked { path: PathBuf },

    /// Backend fault other than a wait deadline (lost context, stale handle).
    #[error("backend failure: {0}")]
    Backend(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(date: &str, home: &str, away: &str, score: Option<(u32, u32)>) -> CandidateRecord {
        CandidateRecord {
            date: date.parse().expect("date"),
            round_label: Some("Matchday 1".into()),
            home: home.into(),
            away: away.into(),
            score_home: score.map(|s| s.0),
            score_away: score.map(|s| s.1),
            upcoming: score.is_none(),
        }
    }

    #[test]
    fn key_is_deterministic_over_identity_fields() {
        let a = candidate("2025-03-12", "Arsenal", "Chelsea", Some((2, 1)));
        let mut b = a.clone();
        b.round_label = None;
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn key_changes_when_any_identity_field_changes() {
        let base = candidate("2025-03-12", "Arsenal", "Chelsea", Some((2, 1)));
        let keys = [
            candidate("2025-03-13", "Arsenal", "Chelsea", Some((2, 1))).key(),
            candidate("2025-03-12", "Everton", "Chelsea", Some((2, 1))).key(),
            candidate("2025-03-12", "Arsenal", "Fulham", Some((2, 1))).key(),
            candidate("2025-03-12", "Arsenal", "Chelsea", Some((0, 1))).key(),
            candidate("2025-03-12", "Arsenal", "Chelsea", Some((2, 3))).key(),
        ];
        for other in &keys {
            assert_ne!(&base.key(), other);
        }
    }

    #[test]
    fn scoreless_candidates_key_on_date_and_sides_only() {
        let upcoming = candidate("2025-03-12", "Arsenal", "Chelsea", None);
        assert_eq!(upcoming.key().as_str(), "2025-03-12_Arsenal_Chelsea");
    }

    #[test]
    fn sentinel_supplement_is_distinct_from_zeroes() {
        let sentinel = Supplement::unavailable(STAT_SLOTS);
        assert!(sentinel.is_unavailable());
        let zeroes = Supplement::new(vec![Some(0.0); STAT_SLOTS]);
        assert!(!zeroes.is_unavailable());
        assert_ne!(sentinel, zeroes);
    }
}
