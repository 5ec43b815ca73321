//! Seed player and team box scores for Final games that don't have them
//! yet, resolving stats-provider game ids through the mapping table.

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use hoopsync::database_ops::db::Db;
use hoopsync::database_ops::nba::{NbaStatsClient, NbaStatsConfig};
use hoopsync::database_ops::reconcile::find_games_for_boxscores;
use hoopsync::database_ops::resolver::{resolve_team_mapping, ResolverOptions};
use hoopsync::database_ops::DateRange;
use hoopsync::process_boxscore_game;
use hoopsync::util::env::{bootstrap_cli, db_url};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "seed_boxscores", about = "Seed box scores for Final games")]
struct Cli {
    /// Process a single Eastern date (YYYY-MM-DD)
    #[arg(long, conflicts_with_all = ["start_date", "end_date"])]
    date: Option<NaiveDate>,
    /// First date of the range (YYYY-MM-DD)
    #[arg(long)]
    start_date: Option<NaiveDate>,
    /// Last date of the range (YYYY-MM-DD)
    #[arg(long)]
    end_date: Option<NaiveDate>,
    /// Reprocess games that already have box scores
    #[arg(long, default_value_t = false)]
    update_existing: bool,
    /// Require exact provider-id resolution; never link players by name
    #[arg(long, default_value_t = false)]
    no_name_link: bool,
    /// Run all read/match logic but roll back every write
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap_cli("seed_boxscores");
    let cli = Cli::parse();

    let range = match cli.date {
        Some(date) => DateRange::single(date),
        None => DateRange {
            start: cli.start_date,
            end: cli.end_date,
        },
    };

    let database_url = db_url().context("no database URL env vars set")?;
    let db = Db::connect(&database_url, 5).await?;
    let client = NbaStatsClient::new(NbaStatsConfig::from_env())?;
    let resolver_opts = ResolverOptions {
        link_by_name: !cli.no_name_link,
    };

    info!("finding games to process");
    let targets = find_games_for_boxscores(&db, range, cli.update_existing).await?;
    if targets.is_empty() {
        info!("no games found to process");
        return Ok(());
    }
    info!(games = targets.len(), "found games to process");

    let team_map = resolve_team_mapping(&db).await?;
    info!(teams = team_map.len(), "resolved team mappings");

    let mut successful = 0usize;
    let mut failed = 0usize;
    for (idx, target) in targets.iter().enumerate() {
        info!(
            progress = %format!("{}/{}", idx + 1, targets.len()),
            game_id = %target.internal_game_id,
            nba_game_id = %target.nba_game_id,
            "processing game"
        );
        match process_boxscore_game(
            &db,
            &client,
            &resolver_opts,
            &team_map,
            &target.internal_game_id,
            &target.nba_game_id,
            cli.dry_run,
        )
        .await
        {
            Ok(true) => successful += 1,
            Ok(false) => {
                warn!(game_id = %target.internal_game_id, "no box score data");
                failed += 1;
            }
            Err(err) => {
                warn!(game_id = %target.internal_game_id, error = %err, "game failed; rolled back");
                failed += 1;
            }
        }
        if idx + 1 < targets.len() {
            client.pace().await;
        }
    }

    info!(
        successful,
        failed,
        total = targets.len(),
        dry_run = cli.dry_run,
        "box score seed complete"
    );
    Ok(())
}
