//! The harvest session state machine.
//!
//! A session exclusively owns one backend handle and drives one adapter
//! through the full lifecycle. Whatever happens after enumeration, operator
//! abort included, the tables accumulated so far are flushed and the backend
//! is released before the session reports back.

use pitchside_adapters::{MaterializedView, SourceAdapter};
use pitchside_backend::Backend;
use pitchside_core::{
    CandidateRecord, Diagnostic, EnrichedRecord, HarvestError, Operator, OperatorChoice,
    Supplement,
};
use pitchside_store::{OddsRecord, StatsRecord, StoreError, Table, TableRecord};
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use crate::recovery::resolve_stall;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Exploring,
    Extracting,
    Enriching,
    Exporting,
    Completed,
    Aborted,
}

/// Counts of one finished run.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub run_id: Uuid,
    pub source: &'static str,
    pub state: SessionState,
    /// Candidates enumerated from the materialized view.
    pub enumerated: usize,
    /// Enumerated candidates whose key was not in the store yet.
    pub new_candidates: usize,
    /// Candidates enriched this run.
    pub enriched: usize,
    /// Candidates skipped because an enriched row already existed.
    pub skipped_existing: usize,
    /// Rows in the enriched table after the final flush.
    pub flushed_rows: usize,
    pub aborted: bool,
}

pub struct HarvestSession<R: TableRecord> {
    run_id: Uuid,
    adapter: Box<dyn SourceAdapter>,
    backend: Box<dyn Backend>,
    operator: Box<dyn Operator>,
    /// The plain match table; only the search flavor keeps one.
    candidates: Option<Table<CandidateRecord>>,
    enriched: Table<R>,
    wrap: fn(EnrichedRecord) -> R,
    state: SessionState,
    enumerated: usize,
    new_candidates: usize,
    enriched_count: usize,
    skipped_existing: usize,
}

impl HarvestSession<StatsRecord> {
    /// Search harvest: match table plus per-match statistics table.
    pub fn matches(
        adapter: Box<dyn SourceAdapter>,
        backend: Box<dyn Backend>,
        operator: Box<dyn Operator>,
        matches_path: &Path,
        stats_path: &Path,
    ) -> Result<Self, HarvestError> {
        Ok(Self {
            run_id: Uuid::new_v4(),
            adapter,
            backend,
            operator,
            candidates: Some(Table::load(matches_path).map_err(storage)?),
            enriched: Table::load(stats_path).map_err(storage)?,
            wrap: StatsRecord,
            state: SessionState::Initializing,
            enumerated: 0,
            new_candidates: 0,
            enriched_count: 0,
            skipped_existing: 0,
        })
    }
}

impl HarvestSession<OddsRecord> {
    /// Odds harvest: a single table of priced fixtures.
    pub fn odds(
        adapter: Box<dyn SourceAdapter>,
        backend: Box<dyn Backend>,
        operator: Box<dyn Operator>,
        odds_path: &Path,
    ) -> Result<Self, HarvestError> {
        Ok(Self {
            run_id: Uuid::new_v4(),
            adapter,
            backend,
            operator,
            candidates: None,
            enriched: Table::load(odds_path).map_err(storage)?,
            wrap: OddsRecord,
            state: SessionState::Initializing,
            enumerated: 0,
            new_candidates: 0,
            enriched_count: 0,
            skipped_existing: 0,
        })
    }
}

impl<R: TableRecord> HarvestSession<R> {
    /// Run the session to completion. `Ok` covers both a full harvest and an
    /// operator abort; the report tells them apart. Hard failures are
    /// returned after a best-effort flush, and the backend is released on
    /// every path.
    pub async fn run(mut self) -> Result<SessionReport, HarvestError> {
        info!(run_id = %self.run_id, source = self.adapter.source_name(), "harvest session starting");
        let outcome = self.drive().await;

        self.transition(SessionState::Exporting);
        let flushed = self.export();
        if let Err(err) = self.backend.close().await {
            warn!(%err, "backend did not close cleanly");
        }

        match outcome {
            Ok(()) => {
                flushed?;
                self.transition(SessionState::Completed);
                Ok(self.report(false))
            }
            Err(HarvestError::SessionAborted) => {
                flushed?;
                self.transition(SessionState::Aborted);
                Ok(self.report(true))
            }
            Err(err) => {
                if let Err(flush_err) = flushed {
                    warn!(%flush_err, "flush after failure also failed");
                }
                Err(err)
            }
        }
    }

    async fn drive(&mut self) -> Result<(), HarvestError> {
        self.transition(SessionState::Exploring);
        self.handshake().await?;
        let view = self.materialize().await?;

        self.transition(SessionState::Extracting);
        let candidates = self
            .adapter
            .enumerate(self.backend.as_ref(), &view)
            .await?;
        self.enumerated = candidates.len();
        info!(candidates = candidates.len(), "enumeration complete");

        for candidate in &candidates {
            let is_new = match self.candidates.as_mut() {
                Some(table) => table.merge(candidate.clone()),
                None => !self.enriched.contains(&candidate.key()),
            };
            if is_new {
                self.new_candidates += 1;
            }
        }
        // The match table is durable before enrichment begins, so an abort
        // mid-enrichment never loses the enumerated fixtures.
        if let Some(table) = &self.candidates {
            table.flush(self.operator.as_ref()).map_err(storage)?;
        }

        self.transition(SessionState::Enriching);
        let total = candidates.len();
        for (index, candidate) in candidates.into_iter().enumerate() {
            if self.enriched.contains(&candidate.key()) {
                self.skipped_existing += 1;
                continue;
            }
            info!(
                item = index + 1,
                total,
                home = %candidate.home,
                away = %candidate.away,
                "enriching"
            );
            let supplement = self.fetch_supplement(&candidate).await?;
            self.enriched.merge((self.wrap)(EnrichedRecord {
                candidate,
                supplement,
            }));
            self.enriched_count += 1;
        }
        Ok(())
    }

    /// Consent handshake, recovery-looped. A retry re-navigates from scratch;
    /// continuing without means the operator cleared the interstitial by hand.
    async fn handshake(&mut self) -> Result<(), HarvestError> {
        loop {
            match self.adapter.handshake(self.backend.as_ref()).await {
                Ok(()) => return Ok(()),
                Err(HarvestError::ExplorationTimeout { expected }) => {
                    match resolve_stall(self.operator.as_ref(), &Diagnostic::expecting(expected)) {
                        OperatorChoice::FixedRetry => continue,
                        OperatorChoice::ContinueWithout => return Ok(()),
                        OperatorChoice::Abort => return Err(HarvestError::SessionAborted),
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Materialization, recovery-looped. Abandoning the step yields an empty
    /// view: the harvest proceeds and simply finds nothing new.
    async fn materialize(&mut self) -> Result<MaterializedView, HarvestError> {
        loop {
            match self.adapter.materialize(self.backend.as_ref()).await {
                Ok(view) => {
                    info!(items = view.len(), "listing materialized");
                    return Ok(view);
                }
                Err(HarvestError::ExplorationTimeout { expected }) => {
                    match resolve_stall(self.operator.as_ref(), &Diagnostic::expecting(expected)) {
                        OperatorChoice::FixedRetry => continue,
                        OperatorChoice::ContinueWithout => {
                            return Ok(MaterializedView::Grouped(Vec::new()))
                        }
                        OperatorChoice::Abort => return Err(HarvestError::SessionAborted),
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Per-candidate enrichment, recovery-looped. A skip degrades to the
    /// sentinel supplement; the candidate is kept either way.
    async fn fetch_supplement(
        &mut self,
        candidate: &CandidateRecord,
    ) -> Result<Supplement, HarvestError> {
        loop {
            match self
                .adapter
                .fetch_supplement(self.backend.as_ref(), candidate)
                .await
            {
                Ok(supplement) => return Ok(supplement),
                Err(HarvestError::ExplorationTimeout { expected }) => {
                    match resolve_stall(self.operator.as_ref(), &Diagnostic::expecting(expected)) {
                        OperatorChoice::FixedRetry => continue,
                        OperatorChoice::ContinueWithout => {
                            return Ok(Supplement::unavailable(self.adapter.supplement_slots()))
                        }
                        OperatorChoice::Abort => return Err(HarvestError::SessionAborted),
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    fn export(&self) -> Result<(), HarvestError> {
        if let Some(table) = &self.candidates {
            table.flush(self.operator.as_ref()).map_err(storage)?;
        }
        self.enriched.flush(self.operator.as_ref()).map_err(storage)
    }

    fn transition(&mut self, next: SessionState) {
        info!(from = ?self.state, to = ?next, "session state change");
        self.state = next;
    }

    fn report(&self, aborted: bool) -> SessionReport {
        SessionReport {
            run_id: self.run_id,
            source: self.adapter.source_name(),
            state: self.state,
            enumerated: self.enumerated,
            new_candidates: self.new_candidates,
            enriched: self.enriched_count,
            skipped_existing: self.skipped_existing,
            flushed_rows: self.enriched.len(),
            aborted,
        }
    }
}

fn storage(err: StoreError) -> HarvestError {
    match err {
        StoreError::Io { ref path, ref source }
            if source.kind() == std::io::ErrorKind::PermissionDenied =>
        {
            HarvestError::OutputResourceLocked { path: path.clone() }
        }
        other => HarvestError::Storage(other.to_string()),
    }
}
