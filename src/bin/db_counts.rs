//! Print row counts for the core tables plus data-quality probes.

use anyhow::Context;
use clap::Parser;
use hoopsync::database_ops::db::Db;
use hoopsync::database_ops::reports::{
    final_games_missing_boxscores, multi_mapped_players, orphaned_player_mappings, table_counts,
};
use hoopsync::util::env::{bootstrap_cli, db_url};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "db_counts", about = "Row counts and data-quality probes")]
struct Cli {
    /// Optional override for the database URL
    #[arg(long)]
    db_url: Option<String>,
    /// Max rows to show per probe
    #[arg(long, default_value_t = 25)]
    limit: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap_cli("db_counts");
    let cli = Cli::parse();

    let database_url = match cli.db_url {
        Some(url) => url,
        None => db_url().context("no database URL env vars set")?,
    };
    let db = Db::connect(&database_url, 2).await?;

    for (table, count) in table_counts(&db).await? {
        println!("{table:>20}: {count}");
    }

    let missing = final_games_missing_boxscores(&db).await?;
    println!("\nFinal games without box scores: {missing}");

    let orphans = orphaned_player_mappings(&db, cli.limit).await?;
    if orphans.is_empty() {
        println!("No orphaned player mappings");
    } else {
        println!("Orphaned player mappings ({}):", orphans.len());
        for (provider_id, internal_id) in &orphans {
            println!("  provider_id={provider_id} -> internal_id={internal_id} (missing player)");
        }
    }

    let multi = multi_mapped_players(&db, cli.limit).await?;
    if !multi.is_empty() {
        println!("Players with multiple provider mappings ({}):", multi.len());
        for (internal_id, mappings) in &multi {
            println!("  {internal_id}: {mappings} mappings");
        }
    }

    info!("db counts complete");
    Ok(())
}
