//! Odds-listing adapter: a paginated results table where most rows inherit
//! their date from an earlier date row, plus a per-row detail context with
//! named-source price triples.

use async_trait::async_trait;
use chrono::NaiveDate;
use pitchside_backend::{classes, Backend, Condition, Element};
use pitchside_core::{CandidateRecord, HarvestError, Supplement, ODDS_SLOTS, ODDS_SOURCES};
use tracing::{debug, trace, warn};

use crate::convergence::ConvergenceDetector;
use crate::dates::extract_listing_date;
use crate::{CapturedRow, MaterializedView, SourceAdapter};

pub struct OddsListingAdapter {
    listing_url: String,
    today: NaiveDate,
    detector: ConvergenceDetector,
}

impl OddsListingAdapter {
    pub fn new(
        listing_url: impl Into<String>,
        today: NaiveDate,
        detector: ConvergenceDetector,
    ) -> Self {
        Self {
            listing_url: listing_url.into(),
            today,
            detector,
        }
    }

    /// Detail context URL for one listing row.
    pub fn detail_url(&self, candidate: &CandidateRecord) -> String {
        format!("{}#{}", self.listing_url, candidate.key())
    }

    async fn capture_row(
        &self,
        backend: &dyn Backend,
        row: &Element,
    ) -> Result<Option<CapturedRow>, HarvestError> {
        let Some(home) = read_first(backend, row, classes::ODDS_HOME).await? else {
            return Ok(None);
        };
        let Some(away) = read_first(backend, row, classes::ODDS_AWAY).await? else {
            return Ok(None);
        };
        if home.is_empty() || away.is_empty() {
            return Ok(None);
        }

        Ok(Some(CapturedRow {
            date_text: read_first(backend, row, classes::ODDS_DATE).await?,
            home,
            away,
            score_text: read_first(backend, row, classes::ODDS_SCORE).await?,
        }))
    }

    fn parse_score(text: &str) -> Option<(u32, u32)> {
        let (home, away) = text.split_once(':')?;
        Some((home.trim().parse().ok()?, away.trim().parse().ok()?))
    }
}

async fn read_first(
    backend: &dyn Backend,
    row: &Element,
    class: &str,
) -> Result<Option<String>, HarvestError> {
    match backend.find_within(row, class).await?.first() {
        Some(cell) => Ok(Some(backend.read_text(cell).await?)),
        None => Ok(None),
    }
}

#[async_trait]
impl SourceAdapter for OddsListingAdapter {
    fn source_name(&self) -> &'static str {
        "odds-listing"
    }

    fn listing_url(&self) -> &str {
        &self.listing_url
    }

    fn supplement_slots(&self) -> usize {
        ODDS_SLOTS
    }

    async fn handshake(&self, backend: &dyn Backend) -> Result<(), HarvestError> {
        backend.navigate(&self.listing_url).await?;
        match backend
            .wait_until(
                Condition::Clickable(classes::CONSENT_BUTTON.to_string()),
                self.detector.deadline,
            )
            .await
        {
            Ok(button) => backend.click(&button).await?,
            Err(err) if err.is_timeout() => {
                debug!("no consent interstitial on odds listing");
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// Walk every results page front to back, capturing row texts as they are
    /// seen. Rows must be captured eagerly: clicking to the next page discards
    /// the elements of the current one.
    async fn materialize(&self, backend: &dyn Backend) -> Result<MaterializedView, HarvestError> {
        backend
            .wait_until(
                Condition::PresenceOf(classes::ODDS_ROW.to_string()),
                self.detector.deadline,
            )
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    HarvestError::ExplorationTimeout {
                        expected: format!("the .{} results table", classes::ODDS_ROW),
                    }
                } else {
                    err.into()
                }
            })?;

        let mut captured = Vec::new();
        loop {
            for row in backend.find_all(classes::ODDS_ROW).await? {
                if let Some(row) = self.capture_row(backend, &row).await? {
                    captured.push(row);
                }
            }
            match backend
                .wait_until(
                    Condition::Clickable(classes::ODDS_NEXT_PAGE.to_string()),
                    self.detector.deadline,
                )
                .await
            {
                Ok(next) => backend.click(&next).await?,
                Err(err) if err.is_timeout() => break,
                Err(err) => return Err(err.into()),
            }
        }
        debug!(rows = captured.len(), "odds listing materialized");
        Ok(MaterializedView::Paged(captured))
    }

    async fn enumerate(
        &self,
        _backend: &dyn Backend,
        view: &MaterializedView,
    ) -> Result<Vec<CandidateRecord>, HarvestError> {
        let MaterializedView::Paged(rows) = view else {
            return Ok(Vec::new());
        };
        let mut candidates = Vec::new();
        // Date rows are sparse: a parsed date applies to every following row
        // until the next one. Rows ahead of the first parsable date have no
        // date to inherit and are dropped.
        let mut current_date: Option<NaiveDate> = None;
        for row in rows {
            if let Some(text) = &row.date_text {
                if let Some(date) = extract_listing_date(text, self.today) {
                    current_date = Some(date);
                }
            }
            let Some(date) = current_date else {
                warn!(home = %row.home, away = %row.away, "row precedes first date, dropped");
                continue;
            };

            let score = row.score_text.as_deref().and_then(Self::parse_score);
            let candidate = CandidateRecord {
                date,
                round_label: None,
                home: row.home.clone(),
                away: row.away.clone(),
                score_home: score.map(|s| s.0),
                score_away: score.map(|s| s.1),
                upcoming: score.is_none(),
            };
            trace!(key = %candidate.key(), upcoming = candidate.upcoming, "candidate enumerated");
            candidates.push(candidate);
        }
        Ok(candidates)
    }

    /// Quotes live in a per-row context; the context is closed again on every
    /// return path so the listing context stays current for the next row.
    async fn fetch_supplement(
        &self,
        backend: &dyn Backend,
        candidate: &CandidateRecord,
    ) -> Result<Supplement, HarvestError> {
        let context = backend.open_context(&self.detail_url(candidate)).await?;
        let result = self.read_quotes(backend).await;
        backend.close_context(context).await?;
        result
    }
}

impl OddsListingAdapter {
    async fn read_quotes(&self, backend: &dyn Backend) -> Result<Supplement, HarvestError> {
        match backend
            .wait_until(
                Condition::PresenceOf(classes::ODDS_QUOTE_ROW.to_string()),
                self.detector.deadline,
            )
            .await
        {
            Ok(_) => {}
            // No quote table at all is a legitimate outcome for obscure
            // fixtures, not a structural failure.
            Err(err) if err.is_timeout() => return Ok(Supplement::unavailable(ODDS_SLOTS)),
            Err(err) => return Err(err.into()),
        }

        let mut slots = vec![None; ODDS_SLOTS];
        for row in backend.find_all(classes::ODDS_QUOTE_ROW).await? {
            let sources = backend.find_within(&row, classes::ODDS_QUOTE_SOURCE).await?;
            let Some(source_cell) = sources.first() else {
                continue;
            };
            let source = backend.read_text(source_cell).await?;
            let Some(index) = ODDS_SOURCES.iter().position(|s| *s == source) else {
                continue;
            };
            for (offset, class) in [
                classes::ODDS_QUOTE_HOME,
                classes::ODDS_QUOTE_DRAW,
                classes::ODDS_QUOTE_AWAY,
            ]
            .into_iter()
            .enumerate()
            {
                if let Some(cell) = backend.find_within(&row, class).await?.first() {
                    let text = backend.read_text(cell).await?;
                    slots[index * 3 + offset] = text.trim().parse().ok();
                }
            }
        }
        Ok(Supplement::new(slots))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitchside_backend::script::{
        HarvestScript, OddsDetailScript, OddsListingScript, OddsPageScript, OddsQuoteScript,
        OddsRowScript, PageScript,
    };
    use pitchside_backend::ScriptedBackend;
    use std::collections::BTreeMap;
    use std::time::Duration;

    const LISTING: &str = "https://www.oddsportal.com/football/england/premier-league/results/";

    fn adapter() -> OddsListingAdapter {
        OddsListingAdapter::new(
            LISTING,
            "2025-03-12".parse().unwrap(),
            ConvergenceDetector::new(Duration::from_millis(10)),
        )
    }

    fn row(date: Option<&str>, home: &str, away: &str, score: Option<&str>) -> OddsRowScript {
        OddsRowScript {
            date_text: date.map(Into::into),
            home: home.into(),
            away: away.into(),
            score_text: score.map(Into::into),
        }
    }

    fn listing_script(pages: Vec<OddsPageScript>) -> HarvestScript {
        let mut map = BTreeMap::new();
        map.insert(
            LISTING.to_string(),
            PageScript::OddsListing(OddsListingScript {
                consent_button: true,
                pages,
            }),
        );
        HarvestScript { pages: map }
    }

    async fn enumerate(script: HarvestScript) -> Vec<CandidateRecord> {
        let adapter = adapter();
        let backend = ScriptedBackend::new(script);
        adapter.handshake(&backend).await.unwrap();
        let view = adapter.materialize(&backend).await.unwrap();
        adapter.enumerate(&backend, &view).await.unwrap()
    }

    #[tokio::test]
    async fn walks_every_page_and_carries_dates_forward() {
        let script = listing_script(vec![
            OddsPageScript {
                rows: vec![
                    row(Some("08.03.2025"), "Arsenal", "Chelsea", Some("2:1")),
                    row(None, "Everton", "Fulham", Some("0:0")),
                ],
            },
            OddsPageScript {
                rows: vec![row(Some("07.03.2025"), "Leeds", "Derby", Some("3:2"))],
            },
        ]);
        let candidates = enumerate(script).await;
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[1].home, "Everton");
        assert_eq!(candidates[1].date, "2025-03-08".parse().unwrap());
        assert_eq!(candidates[2].date, "2025-03-07".parse().unwrap());
        assert_eq!(candidates[2].score_home, Some(3));
    }

    #[tokio::test]
    async fn upcoming_row_yields_candidate_with_no_scores() {
        let script = listing_script(vec![OddsPageScript {
            rows: vec![row(Some("Today, 12 Mar"), "Arsenal", "Chelsea", None)],
        }]);
        let candidates = enumerate(script).await;
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].upcoming);
        assert_eq!(candidates[0].score_home, None);
        assert_eq!(candidates[0].score_away, None);
        assert_eq!(candidates[0].date, "2025-03-12".parse().unwrap());
    }

    #[tokio::test]
    async fn rows_before_the_first_date_are_dropped() {
        let script = listing_script(vec![OddsPageScript {
            rows: vec![
                row(None, "Orphan", "Row", Some("1:1")),
                row(Some("08.03.2025"), "Arsenal", "Chelsea", Some("2:1")),
            ],
        }]);
        let candidates = enumerate(script).await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].home, "Arsenal");
    }

    #[tokio::test]
    async fn empty_listing_is_an_exploration_timeout() {
        let adapter = adapter();
        let backend = ScriptedBackend::new(listing_script(vec![]));
        adapter.handshake(&backend).await.unwrap();
        let err = adapter.materialize(&backend).await.unwrap_err();
        assert!(matches!(err, HarvestError::ExplorationTimeout { .. }));
    }

    fn completed_candidate() -> CandidateRecord {
        CandidateRecord {
            date: "2025-03-08".parse().unwrap(),
            round_label: None,
            home: "Arsenal".into(),
            away: "Chelsea".into(),
            score_home: Some(2),
            score_away: Some(1),
            upcoming: false,
        }
    }

    #[tokio::test]
    async fn supplement_fills_slots_by_source_position() {
        let adapter = adapter();
        let candidate = completed_candidate();
        let mut pages = BTreeMap::new();
        pages.insert(
            adapter.detail_url(&candidate),
            PageScript::OddsDetail(OddsDetailScript {
                quotes: vec![
                    OddsQuoteScript {
                        source: "Unibet".into(),
                        home: 1.85,
                        draw: 3.6,
                        away: 4.2,
                    },
                    OddsQuoteScript {
                        source: "Bet365".into(),
                        home: 1.9,
                        draw: 3.5,
                        away: 4.0,
                    },
                    OddsQuoteScript {
                        source: "NoSuchBook".into(),
                        home: 9.9,
                        draw: 9.9,
                        away: 9.9,
                    },
                ],
            }),
        );
        let backend = ScriptedBackend::new(HarvestScript { pages });

        let supplement = adapter.fetch_supplement(&backend, &candidate).await.unwrap();
        assert_eq!(supplement.len(), ODDS_SLOTS);
        // Bet365 occupies the first triple regardless of page order.
        assert_eq!(supplement.slots()[0], Some(1.9));
        assert_eq!(supplement.slots()[2], Some(4.0));
        // Pinnacle never appeared.
        assert_eq!(supplement.slots()[3], None);
        assert_eq!(supplement.slots()[6], Some(1.85));
        let mut expected = vec![None; ODDS_SLOTS];
        expected[0] = Some(1.9);
        expected[1] = Some(3.5);
        expected[2] = Some(4.0);
        expected[6] = Some(1.85);
        expected[7] = Some(3.6);
        expected[8] = Some(4.2);
        assert_eq!(supplement.slots(), expected.as_slice());
        // The detail context was closed again.
        assert_eq!(backend.open_contexts(), 1);
    }

    #[tokio::test]
    async fn missing_quote_table_degrades_to_sentinel_and_closes_context() {
        let adapter = adapter();
        let candidate = completed_candidate();
        let backend = ScriptedBackend::new(HarvestScript::default());

        let supplement = adapter.fetch_supplement(&backend, &candidate).await.unwrap();
        assert!(supplement.is_unavailable());
        assert_eq!(supplement.len(), ODDS_SLOTS);
        assert_eq!(backend.open_contexts(), 1);
    }
}
