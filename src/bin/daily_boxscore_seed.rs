//! Daily box score seeding with multiple source fallbacks.
//!
//! Sources, in order of reliability: the league stats API (official, but
//! delayed after the final buzzer) and external scrapers configured via
//! BREF_SCRAPER_CMD / NBA_COM_SCRAPER_CMD. Recent games try the scraper
//! first because it updates faster; older games try the stats API first.

use anyhow::Context;
use chrono::{Days, NaiveDate, Utc};
use chrono_tz::America::New_York;
use clap::Parser;
use hoopsync::database_ops::db::Db;
use hoopsync::database_ops::nba::{NbaStatsClient, NbaStatsConfig};
use hoopsync::database_ops::reconcile::{final_games_without_boxscores, PendingGame};
use hoopsync::database_ops::resolver::{
    is_bdl_game_id, nba_game_id_for, resolve_team_mapping, ResolverOptions,
};
use hoopsync::database_ops::scrape::{run_scraper_for_game, ScraperConfig};
use hoopsync::database_ops::DateRange;
use hoopsync::process_boxscore_game;
use hoopsync::util::env::{bootstrap_cli, db_url, preflight_check};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "daily_boxscore_seed",
    about = "Seed box scores for Final games, falling back across sources"
)]
struct Cli {
    /// Target Eastern date (YYYY-MM-DD); defaults to today
    #[arg(long)]
    date: Option<NaiveDate>,
    /// Process games from the last N days instead of a single date
    #[arg(long, default_value_t = 0)]
    days_back: u64,
    /// Maximum number of games to process
    #[arg(long, default_value_t = 50)]
    max_games: usize,
    /// Run read/match logic only; skips scrapers and rolls back API writes
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

struct Sources {
    bref: Option<ScraperConfig>,
    nba_com: Option<ScraperConfig>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap_cli("daily_boxscore_seed");
    let cli = Cli::parse();

    let today = Utc::now().with_timezone(&New_York).date_naive();
    let range = match (cli.date, cli.days_back) {
        (Some(date), _) => DateRange::single(date),
        (None, 0) => DateRange::single(today),
        (None, days_back) => DateRange {
            start: today.checked_sub_days(Days::new(days_back)),
            end: Some(today),
        },
    };

    preflight_check(
        "daily_boxscore_seed",
        &[],
        &["SUPABASE_DB_URL", "BREF_SCRAPER_CMD", "NBA_COM_SCRAPER_CMD"],
    )?;
    let database_url = db_url().context("no database URL env vars set")?;
    let db = Db::connect(&database_url, 5).await?;
    let client = NbaStatsClient::new(NbaStatsConfig::from_env())?;

    let mut games = final_games_without_boxscores(&db, range).await?;
    if games.is_empty() {
        info!("no Final games without box scores found");
        return Ok(());
    }
    games.truncate(cli.max_games);
    info!(games = games.len(), "found Final games without box scores");

    let team_map = resolve_team_mapping(&db).await?;
    let sources = Sources {
        bref: ScraperConfig::from_env("BREF_SCRAPER_CMD"),
        nba_com: ScraperConfig::from_env("NBA_COM_SCRAPER_CMD"),
    };
    let resolver_opts = ResolverOptions::default();

    let mut successful = 0usize;
    let mut failed = 0usize;
    let mut by_source: HashMap<&'static str, usize> = HashMap::new();

    for (idx, game) in games.iter().enumerate() {
        info!(
            progress = %format!("{}/{}", idx + 1, games.len()),
            matchup = %format!("{} @ {}", game.away_abbr, game.home_abbr),
            date = %game.game_date,
            "processing game"
        );

        let hours_since_game = NaiveDate::parse_from_str(&game.game_date, "%Y-%m-%d")
            .map(|d| (today - d).num_days() * 24)
            .unwrap_or(24);

        let source = if hours_since_game < 4 {
            // Recent game: scrapers update faster than the official feed.
            try_chain(
                &db,
                &client,
                &resolver_opts,
                &team_map,
                &sources,
                game,
                cli.dry_run,
                &["bref", "nba_stats", "nba_com"],
            )
            .await?
        } else {
            try_chain(
                &db,
                &client,
                &resolver_opts,
                &team_map,
                &sources,
                game,
                cli.dry_run,
                &["nba_stats", "bref"],
            )
            .await?
        };

        match source {
            Some(source) => {
                successful += 1;
                *by_source.entry(source).or_insert(0) += 1;
                info!(game_id = %game.game_id, source, "box score fetched");
            }
            None => {
                failed += 1;
                warn!(game_id = %game.game_id, "all sources failed");
            }
        }

        if idx + 1 < games.len() {
            client.pace().await;
        }
    }

    info!(successful, failed, dry_run = cli.dry_run, "daily seed complete");
    for (source, count) in &by_source {
        info!(source, count, "source breakdown");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn try_chain(
    db: &Db,
    client: &NbaStatsClient,
    resolver_opts: &ResolverOptions,
    team_map: &HashMap<String, String>,
    sources: &Sources,
    game: &PendingGame,
    dry_run: bool,
    order: &[&'static str],
) -> anyhow::Result<Option<&'static str>> {
    for source in order {
        let ok = match *source {
            "nba_stats" => {
                try_stats_api(db, client, resolver_opts, team_map, game, dry_run).await?
            }
            "bref" => try_scraper(db, sources.bref.as_ref(), game, dry_run).await?,
            "nba_com" => try_scraper(db, sources.nba_com.as_ref(), game, dry_run).await?,
            _ => false,
        };
        if ok {
            return Ok(Some(source));
        }
    }
    Ok(None)
}

async fn try_stats_api(
    db: &Db,
    client: &NbaStatsClient,
    resolver_opts: &ResolverOptions,
    team_map: &HashMap<String, String>,
    game: &PendingGame,
    dry_run: bool,
) -> anyhow::Result<bool> {
    let Some(nba_game_id) = nba_game_id_for(db, &game.game_id).await? else {
        if is_bdl_game_id(&game.game_id) {
            warn!(
                game_id = %game.game_id,
                "secondary-provider game has no stats mapping yet; run sync_game_mappings"
            );
        }
        return Ok(false);
    };
    info!(game_id = %game.game_id, nba_game_id = %nba_game_id, "trying stats API");
    match process_boxscore_game(
        db,
        client,
        resolver_opts,
        team_map,
        &game.game_id,
        &nba_game_id,
        dry_run,
    )
    .await
    {
        Ok(stored) => Ok(stored),
        Err(err) => {
            warn!(game_id = %game.game_id, error = %err, "stats API source failed");
            Ok(false)
        }
    }
}

async fn try_scraper(
    db: &Db,
    cfg: Option<&ScraperConfig>,
    game: &PendingGame,
    dry_run: bool,
) -> anyhow::Result<bool> {
    let Some(cfg) = cfg else {
        return Ok(false);
    };
    if dry_run {
        // Scraper writes happen out of process and cannot be rolled back.
        info!(game_id = %game.game_id, "dry run: skipping scraper source");
        return Ok(false);
    }
    run_scraper_for_game(db, cfg, &game.game_id).await
}
