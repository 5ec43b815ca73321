//! Sync game provider mappings: cross-reference games between the stats
//! feed and the secondary provider, then fill in self-mappings for
//! unmatched stats games.

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use hoopsync::database_ops::db::Db;
use hoopsync::database_ops::reconcile::{
    create_primary_mappings, cross_reference_games, sample_linked_games,
};
use hoopsync::database_ops::DateRange;
use hoopsync::util::env::{bootstrap_cli, db_url};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "sync_game_mappings",
    about = "Cross-reference games between providers and sync mapping rows"
)]
struct Cli {
    /// First date of the range (YYYY-MM-DD)
    #[arg(long)]
    start_date: Option<NaiveDate>,
    /// Last date of the range (YYYY-MM-DD)
    #[arg(long)]
    end_date: Option<NaiveDate>,
    /// Run all matching logic but roll back every write
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap_cli("sync_game_mappings");
    let cli = Cli::parse();
    let range = DateRange {
        start: cli.start_date,
        end: cli.end_date,
    };

    let database_url = db_url().context("no database URL env vars set")?;
    let db = Db::connect(&database_url, 5).await?;

    let mut tx = db.pool.begin().await?;
    // Cross-reference first so matched stats games link to their duplicate
    // record; the remaining stats games then self-map.
    let crossref = cross_reference_games(&mut *tx, range).await?;
    let primary = create_primary_mappings(&mut *tx).await?;
    if cli.dry_run {
        tx.rollback().await?;
    } else {
        tx.commit().await?;
    }

    info!(
        nba_links = crossref.nba_links,
        bdl_links = crossref.bdl_links,
        primary_mappings = primary,
        dry_run = cli.dry_run,
        "provider mapping sync complete"
    );

    info!("sample cross-referenced games:");
    for line in sample_linked_games(&db, 5).await? {
        info!("  {line}");
    }
    Ok(())
}
