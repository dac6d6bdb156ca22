//! Harvestable leagues and per-target URL/file derivation.
//!
//! A target is one (league, season) pair. From it follow the search listing
//! URL, the odds listing URL and the three table paths, all derived with the
//! same naming scheme so repeated harvests of the same target find their
//! earlier output.

use std::path::{Path, PathBuf};

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct League {
    pub number: u8,
    pub name: &'static str,
    /// Country/competition path segment on the odds portal.
    pub odds_path: &'static str,
}

pub const LEAGUES: [League; 13] = [
    League { number: 1, name: "1. Bundesliga", odds_path: "germany/bundesliga" },
    League { number: 2, name: "2. Bundesliga", odds_path: "germany/2-bundesliga" },
    League { number: 3, name: "Premier League", odds_path: "england/premier-league" },
    League { number: 4, name: "EFL Championship", odds_path: "england/championship" },
    League { number: 5, name: "La Liga", odds_path: "spain/laliga" },
    League { number: 6, name: "Segunda División", odds_path: "spain/laliga2" },
    League { number: 7, name: "Serie A", odds_path: "italy/serie-a" },
    League { number: 8, name: "Serie B", odds_path: "italy/serie-b" },
    League { number: 9, name: "Ligue 1", odds_path: "france/ligue-1" },
    League { number: 10, name: "Ligue 2", odds_path: "france/ligue-2" },
    League { number: 11, name: "Champions League", odds_path: "europe/champions-league" },
    League { number: 12, name: "Europa League", odds_path: "europe/europa-league" },
    League { number: 13, name: "Conference League", odds_path: "europe/conference-league" },
];

pub fn league_by_number(number: u8) -> Option<&'static League> {
    LEAGUES.iter().find(|l| l.number == number)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("no league with number {0}; valid numbers are 1 through 13")]
    UnknownLeague(u8),
    #[error("season must look like YYYY/YY, for example 2024/25")]
    MalformedSeason,
    #[error("the season must not start in the future")]
    FutureSeason,
    #[error("the season end year must directly follow the start year")]
    MismatchedSeasonYears,
}

/// A validated `YYYY/YY` season.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Season {
    start: i32,
}

impl Season {
    /// `current_year` is injected so validation is deterministic under test.
    pub fn parse(text: &str, current_year: i32) -> Result<Self, TargetError> {
        let (start, end) = text.split_once('/').ok_or(TargetError::MalformedSeason)?;
        if start.len() != 4 || end.len() != 2 {
            return Err(TargetError::MalformedSeason);
        }
        let start: i32 = start.parse().map_err(|_| TargetError::MalformedSeason)?;
        let end: i32 = end.parse().map_err(|_| TargetError::MalformedSeason)?;
        if start > current_year {
            return Err(TargetError::FutureSeason);
        }
        if end != (start % 100) + 1 {
            return Err(TargetError::MismatchedSeasonYears);
        }
        Ok(Self { start })
    }

    pub fn start_year(&self) -> i32 {
        self.start
    }

    fn end_fragment(&self) -> i32 {
        (self.start % 100) + 1
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:02}", self.start, self.end_fragment())
    }
}

/// Everything one harvest run needs to know about where to read and write.
#[derive(Debug, Clone)]
pub struct HarvestTarget {
    pub league: &'static League,
    pub season: Season,
    pub search_url: String,
    pub odds_url: String,
    pub matches_path: PathBuf,
    pub stats_path: PathBuf,
    pub odds_table_path: PathBuf,
}

impl HarvestTarget {
    pub fn new(
        league_number: u8,
        season: Season,
        data_dir: &Path,
    ) -> Result<Self, TargetError> {
        let league =
            league_by_number(league_number).ok_or(TargetError::UnknownLeague(league_number))?;

        let search_url = format!(
            "https://www.google.com/search?q={}+Spiele+{}+{:02}",
            league.name.replace(' ', "+"),
            season.start_year(),
            season.end_fragment(),
        );
        let odds_url = format!(
            "https://www.oddsportal.com/football/{}-{}-20{:02}/results/",
            league.odds_path,
            season.start_year(),
            season.end_fragment(),
        );

        let stem = format!(
            "{}_{}_{:02}",
            league.name.replace(' ', "_").replace('.', ""),
            season.start_year(),
            season.end_fragment(),
        );
        Ok(Self {
            league,
            season,
            search_url,
            odds_url,
            matches_path: data_dir.join(format!("{stem}_matches.csv")),
            stats_path: data_dir.join(format!("{stem}_google_statistics.csv")),
            odds_table_path: data_dir.join(format!("{stem}_oddsportal_odds.csv")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seasons_parse_and_render() {
        let season = Season::parse("2024/25", 2025).unwrap();
        assert_eq!(season.start_year(), 2024);
        assert_eq!(season.to_string(), "2024/25");
    }

    #[test]
    fn invalid_seasons_are_rejected() {
        assert_eq!(Season::parse("2024-25", 2025), Err(TargetError::MalformedSeason));
        assert_eq!(Season::parse("24/25", 2025), Err(TargetError::MalformedSeason));
        assert_eq!(Season::parse("2030/31", 2025), Err(TargetError::FutureSeason));
        assert_eq!(
            Season::parse("2024/26", 2025),
            Err(TargetError::MismatchedSeasonYears)
        );
    }

    #[test]
    fn targets_derive_urls_and_paths() {
        let season = Season::parse("2024/25", 2025).unwrap();
        let target = HarvestTarget::new(1, season, Path::new("/data")).unwrap();
        assert_eq!(
            target.search_url,
            "https://www.google.com/search?q=1.+Bundesliga+Spiele+2024+25"
        );
        assert_eq!(
            target.odds_url,
            "https://www.oddsportal.com/football/germany/bundesliga-2024-2025/results/"
        );
        assert_eq!(
            target.matches_path,
            Path::new("/data/1_Bundesliga_2024_25_matches.csv")
        );
        assert_eq!(
            target.stats_path,
            Path::new("/data/1_Bundesliga_2024_25_google_statistics.csv")
        );
        assert_eq!(
            target.odds_table_path,
            Path::new("/data/1_Bundesliga_2024_25_oddsportal_odds.csv")
        );
    }

    #[test]
    fn unknown_league_numbers_are_rejected() {
        let season = Season::parse("2024/25", 2025).unwrap();
        assert!(matches!(
            HarvestTarget::new(14, season, Path::new(".")),
            Err(TargetError::UnknownLeague(14))
        ));
    }
}
