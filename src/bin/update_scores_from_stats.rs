//! Fill missing game scores from aggregated player stats.

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use hoopsync::database_ops::db::Db;
use hoopsync::database_ops::merge::update_scores_from_stats;
use hoopsync::database_ops::DateRange;
use hoopsync::util::env::{bootstrap_cli, db_url};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "update_scores_from_stats",
    about = "Fill missing game scores from player stat sums"
)]
struct Cli {
    /// First date of the range (YYYY-MM-DD)
    #[arg(long)]
    start_date: Option<NaiveDate>,
    /// Last date of the range (YYYY-MM-DD)
    #[arg(long)]
    end_date: Option<NaiveDate>,
    /// Count affected games without writing
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap_cli("update_scores_from_stats");
    let cli = Cli::parse();
    let range = DateRange {
        start: cli.start_date,
        end: cli.end_date,
    };

    let database_url = db_url().context("no database URL env vars set")?;
    let db = Db::connect(&database_url, 5).await?;

    let mut tx = db.pool.begin().await?;
    let updated = update_scores_from_stats(&mut *tx, range).await?;
    if cli.dry_run {
        tx.rollback().await?;
    } else {
        tx.commit().await?;
    }

    info!(updated, dry_run = cli.dry_run, "updated scores from player stats");
    println!("Updated scores for {updated} games");
    Ok(())
}
