//! Search-results adapter: round-grouped match blocks on a search page, with
//! a per-match detail panel carrying paired team statistics.

use async_trait::async_trait;
use chrono::NaiveDate;
use pitchside_backend::{classes, Backend, Condition, Element};
use pitchside_core::{CandidateRecord, HarvestError, Supplement, STAT_NAMES, STAT_SLOTS};
use tracing::{debug, trace};

use crate::convergence::ConvergenceDetector;
use crate::dates::{extract_listing_date, listing_date_text};
use crate::{MaterializedView, SourceAdapter};

pub struct SearchResultsAdapter {
    league: String,
    listing_url: String,
    today: NaiveDate,
    detector: ConvergenceDetector,
}

impl SearchResultsAdapter {
    pub fn new(
        league: impl Into<String>,
        listing_url: impl Into<String>,
        today: NaiveDate,
        detector: ConvergenceDetector,
    ) -> Self {
        Self {
            league: league.into(),
            listing_url: listing_url.into(),
            today,
            detector,
        }
    }

    /// The per-match search query a supplement fetch navigates to.
    pub fn match_query_url(&self, candidate: &CandidateRecord) -> String {
        format!(
            "https://www.google.com/search?q={} vs. {} {} {}",
            candidate.home,
            candidate.away,
            listing_date_text(candidate.date),
            self.league
        )
        .replace(' ', "+")
    }

    async fn extract_block(
        &self,
        backend: &dyn Backend,
        block: &Element,
        round_label: &Option<String>,
    ) -> Result<Option<CandidateRecord>, HarvestError> {
        // Only blocks carrying the completed-result marker are candidates;
        // future fixtures are filtered here, not downstream.
        let result_lines = backend.find_within(block, classes::RESULT_LINE).await?;
        let Some(result_line) = result_lines.first() else {
            return Ok(None);
        };
        if backend
            .find_within(result_line, classes::SCORE_MARKER)
            .await?
            .is_empty()
        {
            return Ok(None);
        }

        let date_cells = backend.find_within(block, classes::DATE_TEXT).await?;
        let Some(date_cell) = date_cells.first() else {
            return Ok(None);
        };
        let date_text = backend.read_text(date_cell).await?;
        let Some(date) = extract_listing_date(&date_text, self.today) else {
            debug!(%date_text, "block date not parsable, skipped");
            return Ok(None);
        };

        let cells = backend.find_within(block, classes::TEAM_CELL).await?;
        if cells.len() != 2 {
            debug!(cells = cells.len(), "block missing a team cell, skipped");
            return Ok(None);
        }
        let mut sides = Vec::with_capacity(2);
        for cell in &cells {
            let text = backend.read_text(cell).await?;
            let mut lines = text.lines();
            let score = lines.next().and_then(|l| l.trim().parse::<u32>().ok());
            let name = lines.next().map(str::trim).unwrap_or_default().to_string();
            let Some(score) = score else {
                return Ok(None);
            };
            if name.is_empty() {
                return Ok(None);
            }
            sides.push((name, score));
        }
        let Ok([(home, home_score), (away, away_score)]) =
            <[(String, u32); 2]>::try_from(sides)
        else {
            return Ok(None);
        };

        Ok(Some(CandidateRecord {
            date,
            round_label: round_label.clone(),
            home,
            away,
            score_home: Some(home_score),
            score_away: Some(away_score),
            upcoming: false,
        }))
    }

    fn parse_stat_row(text: &str) -> (Option<f64>, Option<f64>) {
        let numbers: Vec<f64> = text
            .split_whitespace()
            .filter(|token| !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()))
            .filter_map(|token| token.parse().ok())
            .collect();
        match numbers.as_slice() {
            [home, away] => (Some(*home), Some(*away)),
            _ => (None, None),
        }
    }
}

#[async_trait]
impl SourceAdapter for SearchResultsAdapter {
    fn source_name(&self) -> &'static str {
        "search-results"
    }

    fn listing_url(&self) -> &str {
        &self.listing_url
    }

    fn supplement_slots(&self) -> usize {
        STAT_SLOTS
    }

    async fn handshake(&self, backend: &dyn Backend) -> Result<(), HarvestError> {
        backend.navigate(&self.listing_url).await?;
        let button = backend
            .wait_until(
                Condition::Clickable(classes::CONSENT_BUTTON.to_string()),
                self.detector.deadline,
            )
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    HarvestError::ExplorationTimeout {
                        expected: "to click the accept-cookies button".to_string(),
                    }
                } else {
                    err.into()
                }
            })?;
        backend.click(&button).await?;
        Ok(())
    }

    async fn materialize(&self, backend: &dyn Backend) -> Result<MaterializedView, HarvestError> {
        let groups = self
            .detector
            .materialize_grouped(backend, classes::ROUND_GROUP, classes::EXPAND_CONTROL)
            .await?;
        Ok(MaterializedView::Grouped(groups))
    }

    async fn enumerate(
        &self,
        backend: &dyn Backend,
        view: &MaterializedView,
    ) -> Result<Vec<CandidateRecord>, HarvestError> {
        let MaterializedView::Grouped(groups) = view else {
            return Ok(Vec::new());
        };
        let mut candidates = Vec::new();
        // The round label carries forward across label-less groups.
        let mut round_label: Option<String> = None;
        for group in groups {
            if let Some(label) = backend.find_within(group, classes::ROUND_LABEL).await?.first() {
                round_label = Some(backend.read_text(label).await?);
            }
            for block in backend.find_within(group, classes::MATCH_BLOCK).await? {
                if backend.read_text(&block).await?.is_empty() {
                    continue;
                }
                if let Some(candidate) =
                    self.extract_block(backend, &block, &round_label).await?
                {
                    trace!(home = %candidate.home, away = %candidate.away, "candidate enumerated");
                    candidates.push(candidate);
                }
            }
        }
        Ok(candidates)
    }

    async fn fetch_supplement(
        &self,
        backend: &dyn Backend,
        candidate: &CandidateRecord,
    ) -> Result<Supplement, HarvestError> {
        backend.navigate(&self.match_query_url(candidate)).await?;

        let control = backend
            .wait_until(
                Condition::Clickable(classes::DETAILS_CONTROL.to_string()),
                self.detector.deadline,
            )
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    HarvestError::ExplorationTimeout {
                        expected: "to click the match-details button".to_string(),
                    }
                } else {
                    err.into()
                }
            })?;
        backend.click(&control).await?;

        // A match without published statistics is an expected outcome, not a
        // failure: the panel simply never shows up.
        match backend
            .wait_until(
                Condition::PresenceOf(classes::STAT_ROW.to_string()),
                self.detector.deadline,
            )
            .await
        {
            Ok(_) => {}
            Err(err) if err.is_timeout() => return Ok(Supplement::unavailable(STAT_SLOTS)),
            Err(err) => return Err(err.into()),
        }

        let rows = backend.find_all(classes::STAT_ROW).await?;
        let mut slots = vec![None; STAT_SLOTS];
        for (i, row) in rows.iter().take(STAT_NAMES.len()).enumerate() {
            let text = backend.read_text(row).await?;
            let (home, away) = Self::parse_stat_row(&text);
            slots[i * 2] = home;
            slots[i * 2 + 1] = away;
        }
        Ok(Supplement::new(slots))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitchside_backend::script::{
        BlockScript, ExpandControl, GroupScript, HarvestScript, MatchDetailScript, PageScript,
        SearchResultsScript,
    };
    use pitchside_backend::ScriptedBackend;
    use std::collections::BTreeMap;
    use std::time::Duration;

    const LISTING: &str = "https://www.google.com/search?q=Premier+League+Spiele+2024+25";

    fn adapter() -> SearchResultsAdapter {
        SearchResultsAdapter::new(
            "Premier League",
            LISTING,
            "2025-03-12".parse().unwrap(),
            ConvergenceDetector::new(Duration::from_millis(10)),
        )
    }

    fn finished(date: &str, home: &str, away: &str, score: (u32, u32)) -> BlockScript {
        BlockScript {
            date_text: date.into(),
            home: home.into(),
            away: away.into(),
            score_home: Some(score.0),
            score_away: Some(score.1),
            finished: true,
            malformed: false,
            empty: false,
        }
    }

    fn script_with(groups: Vec<GroupScript>) -> HarvestScript {
        let mut pages = BTreeMap::new();
        pages.insert(
            LISTING.to_string(),
            PageScript::SearchResults(SearchResultsScript {
                consent_button: true,
                expand_control: Some(ExpandControl { clickable: true }),
                groups,
                groups_above: vec![],
                groups_below: vec![],
                reveal_batch: 1,
            }),
        );
        HarvestScript { pages }
    }

    async fn enumerate(script: HarvestScript) -> Vec<CandidateRecord> {
        let adapter = adapter();
        let backend = ScriptedBackend::new(script);
        adapter.handshake(&backend).await.unwrap();
        let view = adapter.materialize(&backend).await.unwrap();
        adapter.enumerate(&backend, &view).await.unwrap()
    }

    #[tokio::test]
    async fn enumerates_finished_matches_with_round_labels() {
        let script = script_with(vec![GroupScript {
            round_label: Some("Matchday 28".into()),
            blocks: vec![
                finished("Sa., 8.3.", "Arsenal", "Chelsea", (2, 1)),
                finished("So., 9.3.", "Everton", "Fulham", (0, 0)),
            ],
        }]);
        let candidates = enumerate(script).await;
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].round_label.as_deref(), Some("Matchday 28"));
        assert_eq!(candidates[0].home, "Arsenal");
        assert_eq!(candidates[0].score_away, Some(1));
        assert_eq!(candidates[0].date, "2025-03-08".parse().unwrap());
        assert!(!candidates[0].upcoming);
    }

    #[tokio::test]
    async fn blocks_without_result_marker_yield_no_candidates() {
        let script = script_with(vec![GroupScript {
            round_label: Some("Matchday 29".into()),
            blocks: vec![BlockScript {
                date_text: "Sa., 15.3.".into(),
                home: "Leeds".into(),
                away: "Derby".into(),
                score_home: None,
                score_away: None,
                finished: false,
                malformed: false,
                empty: false,
            }],
        }]);
        assert!(enumerate(script).await.is_empty());
    }

    #[tokio::test]
    async fn malformed_and_empty_blocks_are_skipped_silently() {
        let mut bad = finished("Sa., 8.3.", "Arsenal", "Chelsea", (2, 1));
        bad.malformed = true;
        let script = script_with(vec![GroupScript {
            round_label: None,
            blocks: vec![
                bad,
                BlockScript {
                    date_text: String::new(),
                    home: String::new(),
                    away: String::new(),
                    score_home: None,
                    score_away: None,
                    finished: false,
                    malformed: false,
                    empty: true,
                },
                finished("So., 9.3.", "Everton", "Fulham", (0, 0)),
            ],
        }]);
        let candidates = enumerate(script).await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].home, "Everton");
    }

    #[tokio::test]
    async fn supplement_reads_paired_statistics() {
        let adapter = adapter();
        let candidate = CandidateRecord {
            date: "2025-03-08".parse().unwrap(),
            round_label: None,
            home: "Arsenal".into(),
            away: "Chelsea".into(),
            score_home: Some(2),
            score_away: Some(1),
            upcoming: false,
        };
        let mut pages = BTreeMap::new();
        let rows: Vec<String> = STAT_NAMES
            .iter()
            .enumerate()
            .map(|(i, name)| format!("{} {} {}", i + 10, name.replace('_', " "), i + 3))
            .collect();
        pages.insert(
            adapter.match_query_url(&candidate),
            PageScript::MatchDetail(MatchDetailScript {
                details_control: true,
                stat_rows: Some(rows),
            }),
        );
        let backend = ScriptedBackend::new(HarvestScript { pages });

        let supplement = adapter.fetch_supplement(&backend, &candidate).await.unwrap();
        assert_eq!(supplement.len(), STAT_SLOTS);
        assert_eq!(supplement.slots()[0], Some(10.0));
        assert_eq!(supplement.slots()[1], Some(3.0));
        assert_eq!(supplement.slots()[18], Some(19.0));
        assert!(!supplement.is_unavailable());
    }

    #[tokio::test]
    async fn missing_statistics_panel_degrades_to_sentinel() {
        let adapter = adapter();
        let candidate = CandidateRecord {
            date: "2025-03-08".parse().unwrap(),
            round_label: None,
            home: "Arsenal".into(),
            away: "Chelsea".into(),
            score_home: Some(2),
            score_away: Some(1),
            upcoming: false,
        };
        let mut pages = BTreeMap::new();
        pages.insert(
            adapter.match_query_url(&candidate),
            PageScript::MatchDetail(MatchDetailScript {
                details_control: true,
                stat_rows: None,
            }),
        );
        let backend = ScriptedBackend::new(HarvestScript { pages });

        let supplement = adapter.fetch_supplement(&backend, &candidate).await.unwrap();
        assert!(supplement.is_unavailable());
        assert_eq!(supplement.len(), STAT_SLOTS);
    }

    #[tokio::test]
    async fn missing_details_control_is_an_exploration_timeout() {
        let adapter = adapter();
        let candidate = CandidateRecord {
            date: "2025-03-08".parse().unwrap(),
            round_label: None,
            home: "Arsenal".into(),
            away: "Chelsea".into(),
            score_home: Some(2),
            score_away: Some(1),
            upcoming: false,
        };
        // The query URL is not scripted at all: a dead page.
        let backend = ScriptedBackend::new(HarvestScript::default());
        let err = adapter
            .fetch_supplement(&backend, &candidate)
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::ExplorationTimeout { .. }));
    }
}
