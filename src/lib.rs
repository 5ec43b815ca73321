pub mod database_ops;
pub mod normalization;
pub mod tracing;

pub mod util {
    pub mod env;
}

// Schedule + box-score seeding pipeline (library functions, not bins).
// Walks a date range day by day, upserting games and, for started games,
// their player box scores, one transaction per game.
use ::tracing::{info, warn};
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::HashMap;

use database_ops::db::Db;
use database_ops::merge;
use database_ops::nba::NbaStatsClient;
use database_ops::resolver::{self, ResolverOptions};
use normalization::boxscore::{
    normalize_player_line, NormalizedPlayerStat, QuarterPoints, RawPlayerLine,
};
use normalization::schedule::{normalize_game, NormalizedGame};

#[derive(Debug, Clone)]
pub struct SeedOptions {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub season: String,
    pub dry_run: bool,
    pub resolver: ResolverOptions,
}

#[derive(Debug, Default)]
pub struct SeedSummary {
    pub days: u32,
    pub games_seen: usize,
    pub games_upserted: usize,
    pub boxscores_written: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub async fn seed_games_pipeline(
    db: &Db,
    client: &NbaStatsClient,
    opts: &SeedOptions,
) -> Result<SeedSummary> {
    let team_map = resolver::resolve_team_mapping(db).await?;
    info!(teams = team_map.len(), "resolved team mappings");

    let mut summary = SeedSummary::default();
    let mut day = opts.start;
    loop {
        summary.days += 1;
        info!(date = %day, "processing day");

        let headers = client
            .retry()
            .run("scoreboard", || client.scoreboard(day))
            .await
            .unwrap_or_default();

        for raw in &headers {
            summary.games_seen += 1;
            let game = match normalize_game(raw, &team_map, &opts.season) {
                Ok(game) => game,
                Err(err) => {
                    warn!(game_id = %raw.game_id, error = %err, "skipping game");
                    summary.skipped += 1;
                    continue;
                }
            };

            match seed_one_game(db, client, opts, &team_map, &game).await {
                Ok(wrote_boxscore) => {
                    summary.games_upserted += 1;
                    if wrote_boxscore {
                        summary.boxscores_written += 1;
                    }
                }
                Err(err) => {
                    warn!(game_id = %game.game_id, error = %err, "game unit failed; rolled back");
                    summary.failed += 1;
                }
            }
            client.pace().await;
        }

        if day >= opts.end {
            break;
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    Ok(summary)
}

/// One unit of work: the game row plus (when the game has started) its
/// player box score, inside a single transaction. Dry runs execute the
/// full read/match path and roll back at the end.
async fn seed_one_game(
    db: &Db,
    client: &NbaStatsClient,
    opts: &SeedOptions,
    team_map: &HashMap<String, String>,
    game: &NormalizedGame,
) -> Result<bool> {
    let mut tx = db.pool.begin().await?;
    merge::upsert_game(&mut *tx, game).await?;

    let mut wrote_boxscore = false;
    if game.status.has_started() {
        // Newly seeded stats games use the provider-native id as the
        // internal id, so the game id doubles as the fetch id here.
        let raw_lines = client
            .retry()
            .run("boxscore", || client.boxscore_traditional(&game.game_id))
            .await
            .unwrap_or_default();

        if !raw_lines.is_empty() {
            let stats =
                resolve_player_lines(&mut *tx, &opts.resolver, team_map, &raw_lines).await?;
            if !stats.is_empty() {
                merge::upsert_player_stats(&mut *tx, &game.game_id, &stats).await?;
                merge::promote_game_scores(&mut *tx, game, &stats).await?;
                wrote_boxscore = true;
            }
        }
    }

    if opts.dry_run {
        tx.rollback().await?;
    } else {
        tx.commit().await?;
    }
    Ok(wrote_boxscore)
}

/// Resolve raw player lines to canonical stat records. Lines referencing an
/// unmapped team are skipped with a warning; player identities are resolved
/// (and created/linked) through the resolver.
pub async fn resolve_player_lines(
    conn: &mut sqlx::PgConnection,
    resolver_opts: &ResolverOptions,
    team_map: &HashMap<String, String>,
    raw_lines: &[RawPlayerLine],
) -> Result<Vec<NormalizedPlayerStat>> {
    let mut stats = Vec::with_capacity(raw_lines.len());
    for raw in raw_lines {
        let Some(team_internal_id) = team_map.get(&raw.team_provider_id) else {
            warn!(
                team_provider_id = %raw.team_provider_id,
                player = %raw.player_name,
                "missing team mapping; skipping stat line"
            );
            continue;
        };
        let player_internal_id = resolver::resolve_player(
            &mut *conn,
            resolver_opts,
            &raw.player_provider_id,
            &raw.player_name,
        )
        .await?;
        stats.push(normalize_player_line(
            raw,
            team_internal_id.clone(),
            player_internal_id,
        ));
    }
    Ok(stats)
}

/// Fetch and persist the full box score for one already-seeded game:
/// player lines, then team aggregates enriched with quarter points from
/// the game summary. Returns false when the upstream has no data yet.
pub async fn process_boxscore_game(
    db: &Db,
    client: &NbaStatsClient,
    resolver_opts: &ResolverOptions,
    team_map: &HashMap<String, String>,
    internal_game_id: &str,
    nba_game_id: &str,
    dry_run: bool,
) -> Result<bool> {
    let raw_lines = client
        .retry()
        .run("boxscore", || client.boxscore_traditional(nba_game_id))
        .await
        .unwrap_or_default();
    if raw_lines.is_empty() {
        warn!(
            game_id = internal_game_id,
            nba_game_id, "no player stats returned"
        );
        return Ok(false);
    }

    client.pace().await;
    let quarter_lines = client
        .retry()
        .run("line_score", || client.line_score(nba_game_id))
        .await
        .unwrap_or_default();
    let quarters: HashMap<String, QuarterPoints> = quarter_lines
        .iter()
        .map(|line| (line.team_id.to_string(), QuarterPoints::from_line(line)))
        .collect();

    let mut tx = db.pool.begin().await?;
    let stats = resolve_player_lines(&mut *tx, resolver_opts, team_map, &raw_lines).await?;
    if stats.is_empty() {
        tx.rollback().await?;
        warn!(game_id = internal_game_id, "no resolvable stat lines");
        return Ok(false);
    }

    let players_written =
        merge::upsert_player_stats(&mut *tx, internal_game_id, &stats).await?;
    let aggregates = merge::aggregate_team_stats(&mut *tx, internal_game_id).await?;
    let reverse_map = reverse_team_map(team_map);
    let teams_written = merge::upsert_team_stats(
        &mut *tx,
        internal_game_id,
        &aggregates,
        &quarters,
        &reverse_map,
    )
    .await?;

    if dry_run {
        tx.rollback().await?;
    } else {
        tx.commit().await?;
    }

    info!(
        game_id = internal_game_id,
        players = players_written,
        teams = teams_written,
        dry_run,
        "processed box score"
    );
    Ok(teams_written > 0)
}

/// Invert the provider->internal team map for line-score lookups.
pub fn reverse_team_map(team_map: &HashMap<String, String>) -> HashMap<String, String> {
    team_map
        .iter()
        .map(|(provider_id, internal_id)| (internal_id.clone(), provider_id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_team_map_inverts_pairs() {
        let mut forward = HashMap::new();
        forward.insert("1610612738".to_string(), "BOS".to_string());
        forward.insert("1610612748".to_string(), "MIA".to_string());
        let reverse = reverse_team_map(&forward);
        assert_eq!(reverse.get("BOS").map(String::as_str), Some("1610612738"));
        assert_eq!(reverse.get("MIA").map(String::as_str), Some("1610612748"));
    }
}
