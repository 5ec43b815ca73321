//! Seed games (and box scores for started games) from the league stats
//! scoreboard across a date range.

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::Parser;
use hoopsync::database_ops::db::Db;
use hoopsync::database_ops::nba::{NbaStatsClient, NbaStatsConfig};
use hoopsync::database_ops::resolver::ResolverOptions;
use hoopsync::util::env::{bootstrap_cli, db_url, env_opt, preflight_check};
use hoopsync::{seed_games_pipeline, SeedOptions};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "seed_games", about = "Seed games and box scores for a date range")]
struct Cli {
    /// Process a single Eastern date (YYYY-MM-DD)
    #[arg(long, conflicts_with_all = ["start_date", "end_date"])]
    date: Option<NaiveDate>,
    /// First date of the range (YYYY-MM-DD)
    #[arg(long, requires = "end_date")]
    start_date: Option<NaiveDate>,
    /// Last date of the range (YYYY-MM-DD)
    #[arg(long, requires = "start_date")]
    end_date: Option<NaiveDate>,
    /// Season label written on new game rows (falls back to NBA_STATS_SEASON)
    #[arg(long)]
    season: Option<String>,
    /// Run all read/match logic but roll back every write
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap_cli("seed_games");
    let cli = Cli::parse();

    let (start, end) = match (cli.date, cli.start_date, cli.end_date) {
        (Some(date), _, _) => (date, date),
        (None, Some(start), Some(end)) => (start, end),
        _ => bail!("provide --date or --start-date/--end-date"),
    };
    if start > end {
        bail!("--start-date must not be after --end-date");
    }

    let season = cli
        .season
        .or_else(|| env_opt("NBA_STATS_SEASON"))
        .unwrap_or_else(|| "2025-26".to_string());

    preflight_check(
        "seed_games",
        &[],
        &[
            "SUPABASE_DB_URL",
            "DATABASE_URL",
            "NBA_STATS_SEASON",
            "NBA_STATS_REQUEST_DELAY_MS",
        ],
    )?;
    let database_url = db_url().context("no database URL env vars set")?;
    let db = Db::connect(&database_url, 5).await?;
    let client = NbaStatsClient::new(NbaStatsConfig::from_env())?;

    info!(%start, %end, %season, dry_run = cli.dry_run, "seeding games");
    let summary = seed_games_pipeline(
        &db,
        &client,
        &SeedOptions {
            start,
            end,
            season,
            dry_run: cli.dry_run,
            resolver: ResolverOptions::default(),
        },
    )
    .await?;

    info!(
        days = summary.days,
        games_seen = summary.games_seen,
        games_upserted = summary.games_upserted,
        boxscores = summary.boxscores_written,
        skipped = summary.skipped,
        failed = summary.failed,
        dry_run = cli.dry_run,
        "game seed complete"
    );
    Ok(())
}
