//! Seed the players table from team rosters.
//!
//! Workflow: resolve canonical team ids via provider_id_map, fetch the
//! roster for each team, stage raw payloads for replay, then upsert player
//! and mapping rows in one transaction per team.

use anyhow::Context;
use clap::Parser;
use hoopsync::database_ops::db::Db;
use hoopsync::database_ops::merge::{upsert_roster_player, RosterUpsert};
use hoopsync::database_ops::nba::{NbaStatsClient, NbaStatsConfig};
use hoopsync::database_ops::resolver::{resolve_team_mapping, upsert_player_mapping};
use hoopsync::database_ops::staging::StagingGuard;
use hoopsync::normalization::boxscore::split_name;
use hoopsync::util::env::{bootstrap_cli, db_url, env_flag, env_opt};
use serde_json::json;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "seed_players", about = "Seed players from team rosters")]
struct Cli {
    /// Season to fetch rosters for (falls back to NBA_STATS_SEASON)
    #[arg(long)]
    season: Option<String>,
    /// Only process this provider team id
    #[arg(long)]
    team_id: Option<String>,
    /// Run all read/match logic but roll back every write
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap_cli("seed_players");
    let cli = Cli::parse();

    let season = cli
        .season
        .or_else(|| env_opt("NBA_STATS_SEASON"))
        .unwrap_or_else(|| "2025-26".to_string());

    let database_url = db_url().context("no database URL env vars set")?;
    let db = Db::connect(&database_url, 5).await?;
    let client = NbaStatsClient::new(NbaStatsConfig::from_env())?;

    let team_map = resolve_team_mapping(&db).await?;
    let mut teams: Vec<(String, String)> = team_map
        .iter()
        .filter(|(provider_id, _)| {
            cli.team_id
                .as_deref()
                .map(|only| *provider_id == only)
                .unwrap_or(true)
        })
        .map(|(p, i)| (p.clone(), i.clone()))
        .collect();
    teams.sort();
    info!(teams = teams.len(), %season, "seeding rosters");

    // Staging is opt-out; the guard disables itself for the rest of the
    // run after a first failure.
    let mut staging = StagingGuard::new(
        env_flag("NBA_STATS_STAGE_EVENTS", true) && !cli.dry_run,
    );

    let mut players_upserted = 0usize;
    let mut teams_failed = 0usize;
    for (idx, (provider_team_id, internal_team_id)) in teams.iter().enumerate() {
        let roster = client
            .retry()
            .run("team_roster", || client.team_roster(provider_team_id, &season))
            .await
            .unwrap_or_default();
        if roster.is_empty() {
            warn!(team_id = %provider_team_id, "no roster rows; skipping team");
            teams_failed += 1;
            if idx + 1 < teams.len() {
                client.pace().await;
            }
            continue;
        }

        let unit = async {
            let mut tx = db.pool.begin().await?;
            for player in &roster {
                let provider_player_id = player.player_id.to_string();
                staging
                    .record(
                        &db.pool,
                        "nba_api",
                        "roster_player",
                        &json!({
                            "season": season,
                            "team_id": provider_team_id,
                            "player_id": provider_player_id,
                            "player": player.player_name,
                        }),
                    )
                    .await?;

                let (first_name, last_name) = split_name(&player.player_name);
                upsert_roster_player(
                    &mut *tx,
                    &RosterUpsert {
                        player_id: provider_player_id.clone(),
                        full_name: player.player_name.clone(),
                        first_name,
                        last_name,
                        position: player.position.clone(),
                        height: player.height.clone(),
                        weight: player.weight.clone(),
                        dob: player.parsed_birth_date(),
                        active: player.is_active(),
                    },
                )
                .await?;

                upsert_player_mapping(
                    &mut *tx,
                    &provider_player_id,
                    &provider_player_id,
                    json!({
                        "source": "nba_api",
                        "seeded_from_roster": true,
                        "season": season,
                        "team_id": internal_team_id,
                    }),
                )
                .await?;
            }
            if cli.dry_run {
                tx.rollback().await?;
            } else {
                tx.commit().await?;
            }
            anyhow::Ok(roster.len())
        };

        match unit.await {
            Ok(count) => {
                players_upserted += count;
                info!(team_id = %provider_team_id, players = count, "roster seeded");
            }
            Err(err) => {
                warn!(team_id = %provider_team_id, error = %err, "team unit failed; rolled back");
                teams_failed += 1;
            }
        }

        if idx + 1 < teams.len() {
            client.pace().await;
        }
    }

    info!(
        players_upserted,
        teams = teams.len(),
        teams_failed,
        dry_run = cli.dry_run,
        "player seed complete"
    );
    Ok(())
}
