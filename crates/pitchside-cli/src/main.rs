use std::fs;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{Datelike, Local};
use clap::{Parser, Subcommand};
use pitchside_adapters::{ConvergenceDetector, OddsListingAdapter, SearchResultsAdapter};
use pitchside_backend::ScriptedBackend;
use pitchside_session::{
    ConsoleOperator, HarvestConfig, HarvestSession, HarvestTarget, Season, SessionReport, LEAGUES,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pitchside")]
#[command(about = "Incremental football match, statistics and odds harvester")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Harvest match results and per-match statistics for one league season.
    Matches {
        /// League number, as listed by `leagues`.
        #[arg(long)]
        league: u8,
        /// Season in YYYY/YY form, for example 2024/25.
        #[arg(long)]
        season: String,
    },
    /// Harvest bookmaker odds for one league season.
    Odds {
        #[arg(long)]
        league: u8,
        #[arg(long)]
        season: String,
    },
    /// List the harvestable leagues.
    Leagues,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match run(Cli::parse()).await {
        Ok(Some(report)) if report.aborted => {
            eprintln!("harvest aborted by operator; captured work was exported");
            ExitCode::from(2)
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<Option<SessionReport>> {
    match cli.command {
        Commands::Leagues => {
            for league in LEAGUES {
                println!("{:2}: {}", league.number, league.name);
            }
            Ok(None)
        }
        Commands::Matches { league, season } => {
            let target = target_for(league, &season)?;
            let config = HarvestConfig::from_env();
            let session = HarvestSession::matches(
                Box::new(SearchResultsAdapter::new(
                    target.league.name,
                    target.search_url.clone(),
                    Local::now().date_naive(),
                    ConvergenceDetector::new(config.deadline),
                )),
                backend(&config)?,
                Box::new(ConsoleOperator),
                &target.matches_path,
                &target.stats_path,
            )?;
            let report = session.run().await?;
            print_report(&report);
            Ok(Some(report))
        }
        Commands::Odds { league, season } => {
            let target = target_for(league, &season)?;
            let config = HarvestConfig::from_env();
            let session = HarvestSession::odds(
                Box::new(OddsListingAdapter::new(
                    target.odds_url.clone(),
                    Local::now().date_naive(),
                    ConvergenceDetector::new(config.deadline),
                )),
                backend(&config)?,
                Box::new(ConsoleOperator),
                &target.odds_table_path,
            )?;
            let report = session.run().await?;
            print_report(&report);
            Ok(Some(report))
        }
    }
}

fn target_for(league: u8, season: &str) -> Result<HarvestTarget> {
    let config = HarvestConfig::from_env();
    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;
    let season = Season::parse(season, Local::now().year())?;
    Ok(HarvestTarget::new(league, season, &config.data_dir)?)
}

fn backend(config: &HarvestConfig) -> Result<Box<ScriptedBackend>> {
    let path = config
        .script_path
        .as_ref()
        .context("PITCHSIDE_SCRIPT must point to a backend page-script file")?;
    Ok(Box::new(ScriptedBackend::from_file(path)?))
}

fn print_report(report: &SessionReport) {
    println!(
        "harvest complete: run_id={} source={} enumerated={} new={} enriched={} skipped={} rows={}",
        report.run_id,
        report.source,
        report.enumerated,
        report.new_candidates,
        report.enriched,
        report.skipped_existing,
        report.flushed_rows,
    );
}
