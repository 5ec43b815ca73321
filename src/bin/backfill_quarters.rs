//! Backfill quarter-by-quarter points for games whose team stat rows were
//! seeded before line scores were captured.

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use hoopsync::database_ops::db::Db;
use hoopsync::database_ops::merge::update_quarter_points;
use hoopsync::database_ops::nba::{NbaStatsClient, NbaStatsConfig};
use hoopsync::database_ops::resolver::{nba_game_id_for, resolve_team_mapping};
use hoopsync::database_ops::DateRange;
use hoopsync::normalization::boxscore::QuarterPoints;
use hoopsync::reverse_team_map;
use hoopsync::util::env::{bootstrap_cli, db_url};
use sqlx::Row;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "backfill_quarters",
    about = "Backfill quarter points on existing team stat rows"
)]
struct Cli {
    /// First date of the range (YYYY-MM-DD)
    #[arg(long)]
    start_date: Option<NaiveDate>,
    /// Last date of the range (YYYY-MM-DD)
    #[arg(long)]
    end_date: Option<NaiveDate>,
    /// Run all fetch/match logic but roll back every write
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap_cli("backfill_quarters");
    let cli = Cli::parse();
    let range = DateRange {
        start: cli.start_date,
        end: cli.end_date,
    };

    let database_url = db_url().context("no database URL env vars set")?;
    let db = Db::connect(&database_url, 5).await?;
    let client = NbaStatsClient::new(NbaStatsConfig::from_env())?;

    let team_map = resolve_team_mapping(&db).await?;
    let reverse_map = reverse_team_map(&team_map);

    let games: Vec<String> = sqlx::query(
        "SELECT DISTINCT g.game_id
         FROM games g
         JOIN team_game_stats tgs ON g.game_id = tgs.game_id
         WHERE g.status = 'Final'
           AND tgs.points_q1 IS NULL
           AND tgs.points_q2 IS NULL
           AND tgs.points_q3 IS NULL
           AND tgs.points_q4 IS NULL
           AND ($1::date IS NULL OR g.start_time::date >= $1::date)
           AND ($2::date IS NULL OR g.start_time::date <= $2::date)
         ORDER BY g.game_id",
    )
    .bind(range.start)
    .bind(range.end)
    .fetch_all(&db.pool)
    .await?
    .into_iter()
    .map(|r| r.get("game_id"))
    .collect();

    info!(games = games.len(), "games needing quarter data");

    let mut updated = 0usize;
    let mut failed = 0usize;
    for (idx, game_id) in games.iter().enumerate() {
        let Some(nba_game_id) = nba_game_id_for(&db, game_id).await? else {
            warn!(game_id = %game_id, "no stats-provider id; skipping");
            failed += 1;
            continue;
        };

        let lines = client
            .retry()
            .run("line_score", || client.line_score(&nba_game_id))
            .await
            .unwrap_or_default();
        if lines.is_empty() {
            warn!(game_id = %game_id, "no quarter data available");
            failed += 1;
            if idx + 1 < games.len() {
                client.pace().await;
            }
            continue;
        }
        let quarters: HashMap<String, QuarterPoints> = lines
            .iter()
            .map(|line| (line.team_id.to_string(), QuarterPoints::from_line(line)))
            .collect();

        let unit = async {
            let mut tx = db.pool.begin().await?;
            let team_ids: Vec<String> =
                sqlx::query("SELECT DISTINCT team_id FROM team_game_stats WHERE game_id = $1")
                    .bind(game_id)
                    .fetch_all(&mut *tx)
                    .await?
                    .into_iter()
                    .map(|r| r.get("team_id"))
                    .collect();

            let mut rows_touched = 0usize;
            for team_internal_id in &team_ids {
                let Some(provider_team_id) = reverse_map.get(team_internal_id) else {
                    warn!(game_id = %game_id, team_id = %team_internal_id, "no provider mapping for team");
                    continue;
                };
                let Some(points) = quarters.get(provider_team_id) else {
                    continue;
                };
                if !points.is_usable() {
                    continue;
                }
                if update_quarter_points(&mut *tx, game_id, team_internal_id, *points).await? {
                    rows_touched += 1;
                }
            }
            if cli.dry_run {
                tx.rollback().await?;
            } else {
                tx.commit().await?;
            }
            anyhow::Ok(rows_touched)
        };

        match unit.await {
            Ok(rows) if rows > 0 => {
                updated += 1;
                info!(game_id = %game_id, rows, "quarter data backfilled");
            }
            Ok(_) => {
                warn!(game_id = %game_id, "no usable quarter rows");
                failed += 1;
            }
            Err(err) => {
                warn!(game_id = %game_id, error = %err, "backfill failed; rolled back");
                failed += 1;
            }
        }

        if idx + 1 < games.len() {
            client.pace().await;
        }
    }

    info!(updated, failed, dry_run = cli.dry_run, "quarter backfill complete");
    Ok(())
}
