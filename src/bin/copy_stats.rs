//! Copy player and team stats from stats-feed games to matching secondary
//! provider games, so both duplicate game records carry the data.

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use hoopsync::database_ops::db::Db;
use hoopsync::database_ops::reconcile::{copy_player_stats, copy_team_stats, find_copy_candidates};
use hoopsync::database_ops::DateRange;
use hoopsync::util::env::{bootstrap_cli, db_url};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "copy_stats",
    about = "Copy stats from stats-feed games to matched secondary games"
)]
struct Cli {
    /// First date of the range (YYYY-MM-DD)
    #[arg(long)]
    start_date: Option<NaiveDate>,
    /// Last date of the range (YYYY-MM-DD)
    #[arg(long)]
    end_date: Option<NaiveDate>,
    /// Show what would be copied without writing
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap_cli("copy_stats");
    let cli = Cli::parse();
    let range = DateRange {
        start: cli.start_date,
        end: cli.end_date,
    };

    let database_url = db_url().context("no database URL env vars set")?;
    let db = Db::connect(&database_url, 5).await?;

    if range.is_open() {
        info!("no date range given; scanning all matched games");
    }
    let matches = find_copy_candidates(&db, range).await?;
    if matches.is_empty() {
        info!("no matching games found");
        return Ok(());
    }
    info!(pairs = matches.len(), "found matching games to copy stats for");

    if cli.dry_run {
        for pair in matches.iter().take(10) {
            info!(bdl = %pair.bdl_game_id, nba = %pair.nba_game_id, "would copy");
        }
        if matches.len() > 10 {
            info!(more = matches.len() - 10, "additional pairs not shown");
        }
        return Ok(());
    }

    let mut total_player_rows = 0u64;
    let mut total_team_rows = 0u64;
    let mut failed = 0usize;
    for pair in &matches {
        let unit = async {
            let mut tx = db.pool.begin().await?;
            let players = copy_player_stats(&mut *tx, &pair.bdl_game_id, &pair.nba_game_id).await?;
            let teams = copy_team_stats(&mut *tx, &pair.bdl_game_id, &pair.nba_game_id).await?;
            tx.commit().await?;
            anyhow::Ok((players, teams))
        };
        match unit.await {
            Ok((players, teams)) => {
                total_player_rows += players;
                total_team_rows += teams;
                info!(
                    bdl = %pair.bdl_game_id,
                    nba = %pair.nba_game_id,
                    players,
                    teams,
                    "copied stats"
                );
            }
            Err(err) => {
                warn!(
                    bdl = %pair.bdl_game_id,
                    nba = %pair.nba_game_id,
                    error = %err,
                    "copy failed; rolled back"
                );
                failed += 1;
            }
        }
    }

    info!(
        pairs = matches.len(),
        player_rows = total_player_rows,
        team_rows = total_team_rows,
        failed,
        "stat copy complete"
    );
    Ok(())
}
