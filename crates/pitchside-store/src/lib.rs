//! Durable flat-table persistence keyed by composite key.
//!
//! One CSV table per (table kind, target descriptor). Loading is fail-soft:
//! a missing table yields an empty one and its header row is written out
//! right away. Mutation is merge-only (insert or overwrite by key, never
//! delete) and flushing writes the whole mapping through a temp file and an
//! atomic rename, so the prior file survives any failed attempt. Flushing an
//! unchanged table twice produces byte-identical output.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use pitchside_core::{
    CandidateRecord, CompositeKey, EnrichedRecord, Operator, Supplement, ODDS_SLOTS, ODDS_SOURCES,
    STAT_NAMES, STAT_SLOTS,
};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CRATE_NAME: &str = "pitchside-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed table {}: {message}", path.display())]
    Malformed { path: PathBuf, message: String },
}

/// Row shape of one table kind: column set, key derivation, field mapping.
pub trait TableRecord: Sized {
    fn columns() -> Vec<String>;
    fn key(&self) -> CompositeKey;
    fn to_row(&self) -> Vec<String>;
    fn from_row(fields: &[String]) -> Result<Self, String>;
}

const DATE_FORMAT: &str = "%Y-%m-%d";

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(text: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(text, DATE_FORMAT).map_err(|e| format!("bad date {text:?}: {e}"))
}

fn format_opt_u32(value: Option<u32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn parse_opt_u32(text: &str) -> Result<Option<u32>, String> {
    if text.is_empty() {
        return Ok(None);
    }
    text.parse()
        .map(Some)
        .map_err(|e| format!("bad score {text:?}: {e}"))
}

fn format_slot(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn parse_slot(text: &str) -> Result<Option<f64>, String> {
    if text.is_empty() {
        return Ok(None);
    }
    text.parse()
        .map(Some)
        .map_err(|e| format!("bad numeric field {text:?}: {e}"))
}

fn candidate_columns() -> Vec<String> {
    ["Key", "Date", "Matchday", "Team_Home", "Team_Away", "Goals_Home", "Goals_Away"]
        .map(String::from)
        .to_vec()
}

fn candidate_fields(candidate: &CandidateRecord) -> Vec<String> {
    vec![
        candidate.key().to_string(),
        format_date(candidate.date),
        candidate.round_label.clone().unwrap_or_default(),
        candidate.home.clone(),
        candidate.away.clone(),
        format_opt_u32(candidate.score_home),
        format_opt_u32(candidate.score_away),
    ]
}

fn candidate_from_fields(fields: &[String]) -> Result<CandidateRecord, String> {
    // fields[0] is the key column, recomputed rather than trusted.
    let score_home = parse_opt_u32(&fields[5])?;
    let score_away = parse_opt_u32(&fields[6])?;
    Ok(CandidateRecord {
        date: parse_date(&fields[1])?,
        round_label: (!fields[2].is_empty()).then(|| fields[2].clone()),
        home: fields[3].clone(),
        away: fields[4].clone(),
        score_home,
        score_away,
        upcoming: score_home.is_none() && score_away.is_none(),
    })
}

fn check_width(fields: &[String], expected: usize) -> Result<(), String> {
    if fields.len() == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} fields, found {}", fields.len()))
    }
}

impl TableRecord for CandidateRecord {
    fn columns() -> Vec<String> {
        candidate_columns()
    }

    fn key(&self) -> CompositeKey {
        self.key()
    }

    fn to_row(&self) -> Vec<String> {
        candidate_fields(self)
    }

    fn from_row(fields: &[String]) -> Result<Self, String> {
        check_width(fields, Self::columns().len())?;
        candidate_from_fields(fields)
    }
}

/// Row of the supplemental-statistics table: match identity plus the 20
/// paired home/away metrics (or the all-sentinel form).
#[derive(Debug, Clone, PartialEq)]
pub struct StatsRecord(pub EnrichedRecord);

impl TableRecord for StatsRecord {
    fn columns() -> Vec<String> {
        let mut cols = candidate_columns();
        for stat in STAT_NAMES {
            for side in ["Home", "Away"] {
                cols.push(format!("{stat}_{side}"));
            }
        }
        cols
    }

    fn key(&self) -> CompositeKey {
        self.0.key()
    }

    fn to_row(&self) -> Vec<String> {
        let mut row = candidate_fields(&self.0.candidate);
        let slots = self.0.supplement.slots();
        for i in 0..STAT_SLOTS {
            row.push(format_slot(slots.get(i).copied().flatten()));
        }
        row
    }

    fn from_row(fields: &[String]) -> Result<Self, String> {
        check_width(fields, Self::columns().len())?;
        let candidate = candidate_from_fields(&fields[..7])?;
        let slots = fields[7..]
            .iter()
            .map(|f| parse_slot(f))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(EnrichedRecord {
            candidate,
            supplement: Supplement::new(slots),
        }))
    }
}

/// Row of the odds table: fixture identity (scores nullable for upcoming
/// listings), one home/draw/away price triple per named source, and the
/// forward-looking flag.
#[derive(Debug, Clone, PartialEq)]
pub struct OddsRecord(pub EnrichedRecord);

impl TableRecord for OddsRecord {
    fn columns() -> Vec<String> {
        let mut cols = ["Key", "Date", "Team_Home", "Team_Away", "Goals_Home", "Goals_Away"]
            .map(String::from)
            .to_vec();
        for source in ODDS_SOURCES {
            for outcome in ["Home", "Draw", "Away"] {
                cols.push(format!("{source}_{outcome}"));
            }
        }
        cols.push("Upcoming".to_string());
        cols
    }

    fn key(&self) -> CompositeKey {
        self.0.key()
    }

    fn to_row(&self) -> Vec<String> {
        let candidate = &self.0.candidate;
        let mut row = vec![
            candidate.key().to_string(),
            format_date(candidate.date),
            candidate.home.clone(),
            candidate.away.clone(),
            format_opt_u32(candidate.score_home),
            format_opt_u32(candidate.score_away),
        ];
        let slots = self.0.supplement.slots();
        for i in 0..ODDS_SLOTS {
            row.push(format_slot(slots.get(i).copied().flatten()));
        }
        row.push(candidate.upcoming.to_string());
        row
    }

    fn from_row(fields: &[String]) -> Result<Self, String> {
        check_width(fields, Self::columns().len())?;
        let score_home = parse_opt_u32(&fields[4])?;
        let score_away = parse_opt_u32(&fields[5])?;
        let upcoming = fields
            .last()
            .expect("width checked")
            .parse::<bool>()
            .map_err(|e| format!("bad upcoming flag: {e}"))?;
        let slots = fields[6..6 + ODDS_SLOTS]
            .iter()
            .map(|f| parse_slot(f))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(EnrichedRecord {
            candidate: CandidateRecord {
                date: parse_date(&fields[1])?,
                round_label: None,
                home: fields[2].clone(),
                away: fields[3].clone(),
                score_home,
                score_away,
                upcoming,
            },
            supplement: Supplement::new(slots),
        }))
    }
}

/// One persisted flat table, held in memory for the session lifetime.
#[derive(Debug)]
pub struct Table<R: TableRecord> {
    path: PathBuf,
    rows: BTreeMap<CompositeKey, R>,
}

impl<R: TableRecord> Table<R> {
    /// Load the table, fail-soft: a missing file yields an empty table whose
    /// header row is written immediately, the way a first harvest seeds its
    /// output files.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let table = match fs::metadata(&path) {
            Ok(_) => {
                let mut table = Self {
                    path: path.clone(),
                    rows: BTreeMap::new(),
                };
                table.read_existing()?;
                debug!(path = %path.display(), rows = table.rows.len(), "loaded table");
                table
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "table not harvested yet, seeding empty file");
                let table = Self {
                    path,
                    rows: BTreeMap::new(),
                };
                table.write_atomic()?;
                table
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(table)
    }

    fn read_existing(&mut self) -> Result<(), StoreError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)
            .map_err(|e| self.map_csv(e))?;
        for result in reader.records() {
            let record = result.map_err(|e| self.map_csv(e))?;
            let fields: Vec<String> = record.iter().map(str::to_string).collect();
            let row = R::from_row(&fields).map_err(|message| StoreError::Malformed {
                path: self.path.clone(),
                message,
            })?;
            self.rows.insert(row.key(), row);
        }
        Ok(())
    }

    fn map_csv(&self, err: csv::Error) -> StoreError {
        match err.into_kind() {
            csv::ErrorKind::Io(source) => StoreError::Io {
                path: self.path.clone(),
                source,
            },
            other => StoreError::Malformed {
                path: self.path.clone(),
                message: format!("{other:?}"),
            },
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, key: &CompositeKey) -> bool {
        self.rows.contains_key(key)
    }

    pub fn get(&self, key: &CompositeKey) -> Option<&R> {
        self.rows.get(key)
    }

    /// Insert or overwrite by key. Returns whether the key was new.
    pub fn merge(&mut self, record: R) -> bool {
        self.rows.insert(record.key(), record).is_none()
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(R::columns())
            .map_err(|e| self.map_csv(e))?;
        for row in self.rows.values() {
            writer.write_record(row.to_row()).map_err(|e| self.map_csv(e))?;
        }
        writer
            .into_inner()
            .map_err(|e| StoreError::Malformed {
                path: self.path.clone(),
                message: e.to_string(),
            })
    }

    fn write_atomic(&self) -> Result<(), StoreError> {
        let bytes = self.encode()?;
        let temp = self.path.with_extension("csv.tmp");
        fs::write(&temp, &bytes).map_err(|source| StoreError::Io {
            path: temp.clone(),
            source,
        })?;
        match fs::rename(&temp, &self.path) {
            Ok(()) => Ok(()),
            Err(source) => {
                let _ = fs::remove_file(&temp);
                Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }

    /// Flush the full mapping. A locked output (another program holding the
    /// file open for exclusive access) blocks on explicit operator
    /// acknowledgement and retries; there is no timed retry.
    pub fn flush(&self, operator: &dyn Operator) -> Result<(), StoreError> {
        run_with_lock_retries(operator, || self.write_atomic())?;
        info!(path = %self.path.display(), rows = self.rows.len(), "flushed table");
        Ok(())
    }
}

/// Retry `attempt` for as long as it keeps failing with a permission error,
/// blocking on the operator's release acknowledgement between attempts. Any
/// other failure surfaces immediately.
fn run_with_lock_retries(
    operator: &dyn Operator,
    mut attempt: impl FnMut() -> Result<(), StoreError>,
) -> Result<(), StoreError> {
    loop {
        match attempt() {
            Ok(()) => return Ok(()),
            Err(StoreError::Io { path, source })
                if source.kind() == ErrorKind::PermissionDenied =>
            {
                warn!(path = %path.display(), "output file is locked, waiting for operator");
                operator.confirm_output_released(&path);
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitchside_core::{Diagnostic, OperatorChoice};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct NoPromptOperator;

    impl Operator for NoPromptOperator {
        fn resolve_timeout(&self, _diagnostic: &Diagnostic) -> OperatorChoice {
            panic!("store tests must not reach the recovery prompt");
        }

        fn confirm_output_released(&self, _path: &Path) {
            panic!("store tests must not hit a locked output");
        }
    }

    fn candidate(date: &str, home: &str, away: &str, score: (u32, u32)) -> CandidateRecord {
        CandidateRecord {
            date: date.parse().unwrap(),
            round_label: Some("Matchday 7".into()),
            home: home.into(),
            away: away.into(),
            score_home: Some(score.0),
            score_away: Some(score.1),
            upcoming: false,
        }
    }

    #[test]
    fn loading_a_missing_table_seeds_headers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("matches.csv");
        let table: Table<CandidateRecord> = Table::load(&path).unwrap();
        assert!(table.is_empty());
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Key,Date,Matchday,Team_Home"));
    }

    #[test]
    fn merge_is_idempotent_by_key() {
        let dir = tempdir().unwrap();
        let mut table: Table<CandidateRecord> = Table::load(dir.path().join("m.csv")).unwrap();
        assert!(table.merge(candidate("2025-03-12", "Arsenal", "Chelsea", (2, 1))));
        assert!(!table.merge(candidate("2025-03-12", "Arsenal", "Chelsea", (2, 1))));
        assert!(table.merge(candidate("2025-03-13", "Everton", "Fulham", (0, 0))));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn flush_is_idempotent_and_reloadable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.csv");
        let mut table: Table<CandidateRecord> = Table::load(&path).unwrap();
        table.merge(candidate("2025-03-12", "Arsenal", "Chelsea", (2, 1)));
        table.merge(candidate("2025-03-13", "Everton", "Fulham", (0, 0)));

        table.flush(&NoPromptOperator).unwrap();
        let first = fs::read(&path).unwrap();
        table.flush(&NoPromptOperator).unwrap();
        let second = fs::read(&path).unwrap();
        assert_eq!(first, second);

        let reloaded: Table<CandidateRecord> = Table::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        let key = candidate("2025-03-12", "Arsenal", "Chelsea", (2, 1)).key();
        assert_eq!(
            reloaded.get(&key).unwrap().round_label.as_deref(),
            Some("Matchday 7")
        );
    }

    #[test]
    fn rerunning_an_identical_harvest_does_not_grow_the_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.csv");
        let harvest = vec![
            candidate("2025-03-12", "Arsenal", "Chelsea", (2, 1)),
            candidate("2025-03-13", "Everton", "Fulham", (0, 0)),
        ];

        let mut table: Table<CandidateRecord> = Table::load(&path).unwrap();
        for c in &harvest {
            table.merge(c.clone());
        }
        table.flush(&NoPromptOperator).unwrap();
        let first = fs::read(&path).unwrap();

        let mut table: Table<CandidateRecord> = Table::load(&path).unwrap();
        for c in &harvest {
            table.merge(c.clone());
        }
        table.flush(&NoPromptOperator).unwrap();
        let second = fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    /// Acknowledges a release by actually unlocking; counts the exchanges.
    struct ReleasingOperator {
        locked: AtomicBool,
        acknowledgements: AtomicUsize,
    }

    impl ReleasingOperator {
        fn new() -> Self {
            Self {
                locked: AtomicBool::new(true),
                acknowledgements: AtomicUsize::new(0),
            }
        }
    }

    impl Operator for ReleasingOperator {
        fn resolve_timeout(&self, _diagnostic: &Diagnostic) -> OperatorChoice {
            panic!("a locked output must not reach the timeout prompt");
        }

        fn confirm_output_released(&self, _path: &Path) {
            self.locked.store(false, Ordering::SeqCst);
            self.acknowledgements.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn locked_output_retries_after_operator_acknowledgement() {
        let operator = ReleasingOperator::new();
        let attempts = AtomicUsize::new(0);

        let path = PathBuf::from("m.csv");
        run_with_lock_retries(&operator, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            if operator.locked.load(Ordering::SeqCst) {
                Err(StoreError::Io {
                    path: path.clone(),
                    source: std::io::Error::from(ErrorKind::PermissionDenied),
                })
            } else {
                Ok(())
            }
        })
        .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(operator.acknowledgements.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn non_lock_write_failures_surface_and_leave_the_prior_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.csv");
        let mut table: Table<CandidateRecord> = Table::load(&path).unwrap();
        table.merge(candidate("2025-03-12", "Arsenal", "Chelsea", (2, 1)));
        table.flush(&NoPromptOperator).unwrap();
        let before = fs::read(&path).unwrap();

        // Squat on the temp path so the next write fails outright.
        fs::create_dir(path.with_extension("csv.tmp")).unwrap();
        table.merge(candidate("2025-03-13", "Everton", "Fulham", (0, 0)));
        assert!(table.flush(&NoPromptOperator).is_err());

        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn stats_rows_round_trip_including_sentinel() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.csv");
        let mut table: Table<StatsRecord> = Table::load(&path).unwrap();

        let mut slots: Vec<Option<f64>> = (0..STAT_SLOTS).map(|i| Some(i as f64)).collect();
        slots[4] = Some(55.0);
        let with_stats = StatsRecord(EnrichedRecord {
            candidate: candidate("2025-03-12", "Arsenal", "Chelsea", (2, 1)),
            supplement: Supplement::new(slots),
        });
        let sentinel = StatsRecord(EnrichedRecord {
            candidate: candidate("2025-03-13", "Everton", "Fulham", (0, 0)),
            supplement: Supplement::unavailable(STAT_SLOTS),
        });
        table.merge(with_stats.clone());
        table.merge(sentinel.clone());
        table.flush(&NoPromptOperator).unwrap();

        let reloaded: Table<StatsRecord> = Table::load(&path).unwrap();
        assert_eq!(reloaded.get(&with_stats.key()).unwrap(), &with_stats);
        let restored = reloaded.get(&sentinel.key()).unwrap();
        assert!(restored.0.supplement.is_unavailable());
        assert_eq!(restored.0.supplement.len(), STAT_SLOTS);
    }

    #[test]
    fn odds_rows_preserve_upcoming_flag_and_null_scores() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("odds.csv");
        let mut table: Table<OddsRecord> = Table::load(&path).unwrap();

        let upcoming = OddsRecord(EnrichedRecord {
            candidate: CandidateRecord {
                date: "2025-05-02".parse().unwrap(),
                round_label: None,
                home: "Leeds".into(),
                away: "Derby".into(),
                score_home: None,
                score_away: None,
                upcoming: true,
            },
            supplement: Supplement::new(vec![Some(1.8); ODDS_SLOTS]),
        });
        table.merge(upcoming.clone());
        table.flush(&NoPromptOperator).unwrap();

        let reloaded: Table<OddsRecord> = Table::load(&path).unwrap();
        let restored = reloaded.get(&upcoming.key()).unwrap();
        assert!(restored.0.candidate.upcoming);
        assert_eq!(restored.0.candidate.score_home, None);
        assert_eq!(restored, &upcoming);
    }
}
