//! Cross-provider game reconciliation.
//!
//! Games from the league stats feed (`002…` ids) and the secondary provider
//! (`184…` ids) are matched on the Eastern calendar date plus home/away
//! team abbreviations. Matched pairs get bidirectional `provider_id_map`
//! rows, and stat rows can be copied from the data-complete side to the
//! data-empty side with do-nothing conflict handling so existing rows are
//! never overwritten.
//!
//! A same-day rematch between the same two abbreviations would produce a
//! false link; there is no correction mechanism for that, it is an accepted
//! limitation of the heuristic.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Row};
use tracing::info;

use crate::database_ops::db::Db;
use crate::database_ops::DateRange;

/// Shared join clause matching `002%` games to `184%` games by Eastern date
/// and team abbreviations.
const MATCHED_GAMES_JOIN: &str = "
    FROM games nba_game
    JOIN teams nba_home ON nba_game.home_team_id = nba_home.team_id
    JOIN teams nba_away ON nba_game.away_team_id = nba_away.team_id
    JOIN games bdl_game ON (
        (nba_game.start_time AT TIME ZONE 'America/New_York')::date =
        (bdl_game.start_time AT TIME ZONE 'America/New_York')::date
    )
    JOIN teams bdl_home ON bdl_game.home_team_id = bdl_home.team_id
    JOIN teams bdl_away ON bdl_game.away_team_id = bdl_away.team_id
    WHERE nba_game.game_id LIKE '002%'
      AND bdl_game.game_id LIKE '184%'
      AND nba_home.abbreviation = bdl_home.abbreviation
      AND nba_away.abbreviation = bdl_away.abbreviation";

/// Self-mappings for league-stats games that have no provider row yet, so
/// later runs can resolve them without the prefix convention.
pub async fn create_primary_mappings(conn: &mut PgConnection) -> Result<u64> {
    let result = sqlx::query(
        "INSERT INTO provider_id_map (
             entity_type, internal_id, provider, provider_id, metadata,
             fetched_at, created_at, updated_at
         )
         SELECT
             'game',
             g.game_id,
             'nba',
             g.game_id,
             jsonb_build_object('source', 'nba_stats', 'seeded_from_scoreboard', true),
             now(), now(), now()
         FROM games g
         WHERE g.game_id LIKE '002%'
           AND NOT EXISTS (
               SELECT 1
               FROM provider_id_map pm
               WHERE pm.entity_type = 'game'
                 AND pm.provider = 'nba'
                 AND pm.provider_id = g.game_id
           )
         ON CONFLICT (entity_type, provider, provider_id) DO NOTHING",
    )
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CrossRefCounts {
    pub nba_links: u64,
    pub bdl_links: u64,
}

/// Establish bidirectional mappings for matched game pairs. For a matched
/// pair (A = stats game, B = secondary game) this writes
/// `('nba', A) -> B` and `('balldontlie', B) -> A`, which serves lookups in
/// all four directions. Mapping creation is unconditional on the date+team
/// match; conflict rows are left untouched. Run this before
/// [`create_primary_mappings`] so matched stats games link to their
/// duplicate record instead of self-mapping.
pub async fn cross_reference_games(
    conn: &mut PgConnection,
    range: DateRange,
) -> Result<CrossRefCounts> {
    let nba_sql = format!(
        "INSERT INTO provider_id_map (
             entity_type, internal_id, provider, provider_id, metadata,
             fetched_at, created_at, updated_at
         )
         SELECT DISTINCT
             'game',
             bdl_game.game_id,
             'nba',
             nba_game.game_id,
             jsonb_build_object(
                 'source', 'nba_stats',
                 'cross_referenced_from', 'balldontlie',
                 'matched_by', 'date_and_teams'
             ),
             now(), now(), now()
         {MATCHED_GAMES_JOIN}
           AND ($1::date IS NULL OR nba_game.start_time::date >= $1::date)
           AND ($2::date IS NULL OR nba_game.start_time::date <= $2::date)
         ON CONFLICT (entity_type, provider, provider_id) DO NOTHING"
    );
    let nba_links = sqlx::query(&nba_sql)
        .bind(range.start)
        .bind(range.end)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    let bdl_sql = format!(
        "INSERT INTO provider_id_map (
             entity_type, internal_id, provider, provider_id, metadata,
             fetched_at, created_at, updated_at
         )
         SELECT DISTINCT
             'game',
             nba_game.game_id,
             'balldontlie',
             bdl_game.game_id,
             jsonb_build_object(
                 'source', 'balldontlie',
                 'cross_referenced_from', 'nba_stats',
                 'matched_by', 'date_and_teams'
             ),
             now(), now(), now()
         {MATCHED_GAMES_JOIN}
           AND ($1::date IS NULL OR bdl_game.start_time::date >= $1::date)
           AND ($2::date IS NULL OR bdl_game.start_time::date <= $2::date)
         ON CONFLICT (entity_type, provider, provider_id) DO NOTHING"
    );
    let bdl_links = sqlx::query(&bdl_sql)
        .bind(range.start)
        .bind(range.end)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    info!(nba_links, bdl_links, "cross-referenced games between providers");
    Ok(CrossRefCounts {
        nba_links,
        bdl_links,
    })
}

/// A matched pair where copying stats would be useful: the stats-side game
/// has player lines, the secondary-side game has none.
#[derive(Debug, Clone)]
pub struct CopyCandidate {
    pub bdl_game_id: String,
    pub nba_game_id: String,
}

pub async fn find_copy_candidates(db: &Db, range: DateRange) -> Result<Vec<CopyCandidate>> {
    let sql = format!(
        "SELECT DISTINCT
             bdl_game.game_id AS bdl_id,
             nba_game.game_id AS nba_id,
             bdl_game.start_time
         {MATCHED_GAMES_JOIN}
           AND bdl_game.status = 'Final'
           AND EXISTS (SELECT 1 FROM player_game_stats WHERE game_id = nba_game.game_id)
           AND NOT EXISTS (SELECT 1 FROM player_game_stats WHERE game_id = bdl_game.game_id)
           AND ($1::date IS NULL OR bdl_game.start_time::date >= $1::date)
           AND ($2::date IS NULL OR bdl_game.start_time::date <= $2::date)
         ORDER BY bdl_game.start_time"
    );
    let rows = sqlx::query(&sql)
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&db.pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|r| CopyCandidate {
            bdl_game_id: r.get("bdl_id"),
            nba_game_id: r.get("nba_id"),
        })
        .collect())
}

/// Copy player stat rows from the source game id to the destination game
/// id. Existing destination rows are never overwritten.
pub async fn copy_player_stats(
    conn: &mut PgConnection,
    dest_game_id: &str,
    src_game_id: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "INSERT INTO player_game_stats (
             game_id, player_id, team_id, minutes, points, rebounds, assists,
             steals, blocks, turnovers, field_goals_made, field_goals_attempted,
             three_pointers_made, three_pointers_attempted, free_throws_made,
             free_throws_attempted, plus_minus, started, dnp_reason, created_at, updated_at
         )
         SELECT
             $1,
             player_id, team_id, minutes, points, rebounds, assists,
             steals, blocks, turnovers, field_goals_made, field_goals_attempted,
             three_pointers_made, three_pointers_attempted, free_throws_made,
             free_throws_attempted, plus_minus, started, dnp_reason, created_at, updated_at
         FROM player_game_stats
         WHERE game_id = $2
         ON CONFLICT (game_id, player_id) DO NOTHING",
    )
    .bind(dest_game_id)
    .bind(src_game_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Copy team stat rows from the source game id to the destination game id.
pub async fn copy_team_stats(
    conn: &mut PgConnection,
    dest_game_id: &str,
    src_game_id: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "INSERT INTO team_game_stats (
             game_id, team_id, is_home, minutes, points, field_goals_made,
             field_goals_attempted, three_pointers_made, three_pointers_attempted,
             free_throws_made, free_throws_attempted, rebounds, assists, steals,
             blocks, turnovers, possessions,
             points_q1, points_q2, points_q3, points_q4, points_ot,
             created_at, updated_at
         )
         SELECT
             $1,
             team_id, is_home, minutes, points, field_goals_made,
             field_goals_attempted, three_pointers_made, three_pointers_attempted,
             free_throws_made, free_throws_attempted, rebounds, assists, steals,
             blocks, turnovers, possessions,
             points_q1, points_q2, points_q3, points_q4, points_ot,
             created_at, updated_at
         FROM team_game_stats
         WHERE game_id = $2
         ON CONFLICT (game_id, team_id) DO NOTHING",
    )
    .bind(dest_game_id)
    .bind(src_game_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// A game to process for box scores: the internal id plus the provider id
/// to fetch from.
#[derive(Debug, Clone)]
pub struct BoxscoreTarget {
    pub internal_game_id: String,
    pub nba_game_id: String,
}

/// Find Final games to fetch box scores for, across three discovery paths:
/// games with an explicit stats mapping, native `002%` games, and `184%`
/// games matched to a stats game by date+teams. Duplicate internal ids
/// keep the earliest sighting.
pub async fn find_games_for_boxscores(
    db: &Db,
    range: DateRange,
    update_existing: bool,
) -> Result<Vec<BoxscoreTarget>> {
    // Applied to each discovery query; games already carrying box scores
    // are skipped unless the caller asked to reprocess them.
    let missing_filter = |alias: &str| {
        if update_existing {
            String::new()
        } else {
            format!(
                " AND NOT EXISTS (SELECT 1 FROM player_game_stats pgs WHERE pgs.game_id = {alias}.game_id)"
            )
        }
    };

    let mapped_sql = format!(
        "SELECT DISTINCT g.game_id, pm.provider_id AS nba_game_id, g.start_time
         FROM games g
         JOIN provider_id_map pm ON g.game_id = pm.internal_id
             AND pm.entity_type = 'game' AND pm.provider = 'nba'
         WHERE g.status = 'Final'
           AND ($1::date IS NULL OR g.start_time::date >= $1::date)
           AND ($2::date IS NULL OR g.start_time::date <= $2::date){}",
        missing_filter("g")
    );

    let native_sql = format!(
        "SELECT game_id, game_id AS nba_game_id, start_time
         FROM games g
         WHERE status = 'Final'
           AND game_id LIKE '002%'
           AND ($1::date IS NULL OR start_time::date >= $1::date)
           AND ($2::date IS NULL OR start_time::date <= $2::date){}",
        missing_filter("g")
    );

    let matched_sql = format!(
        "SELECT DISTINCT bdl_game.game_id, nba_game.game_id AS nba_game_id, bdl_game.start_time
         {MATCHED_GAMES_JOIN}
           AND bdl_game.status = 'Final'
           AND ($1::date IS NULL OR bdl_game.start_time::date >= $1::date)
           AND ($2::date IS NULL OR bdl_game.start_time::date <= $2::date){}",
        missing_filter("bdl_game")
    );

    let mut found: Vec<(String, String, DateTime<Utc>)> = Vec::new();
    for sql in [&mapped_sql, &native_sql, &matched_sql] {
        let rows = sqlx::query(sql)
            .bind(range.start)
            .bind(range.end)
            .fetch_all(&db.pool)
            .await?;
        for r in rows {
            found.push((r.get("game_id"), r.get("nba_game_id"), r.get("start_time")));
        }
    }

    Ok(dedup_targets_by_start_time(found))
}

/// Sort by start time and keep the first provider id seen per internal
/// game, matching how overlapping discovery paths are reconciled.
fn dedup_targets_by_start_time(
    mut found: Vec<(String, String, DateTime<Utc>)>,
) -> Vec<BoxscoreTarget> {
    found.sort_by_key(|(_, _, start)| *start);
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for (internal, provider, _) in found {
        if seen.insert(internal.clone()) {
            out.push(BoxscoreTarget {
                internal_game_id: internal,
                nba_game_id: provider,
            });
        }
    }
    out
}

/// A Final game with no box score yet, with enough context to retry a
/// specific game by hand.
#[derive(Debug, Clone)]
pub struct PendingGame {
    pub game_id: String,
    pub home_abbr: String,
    pub away_abbr: String,
    pub game_date: String,
}

/// Final games without player stat rows for one Eastern date (or the last
/// `days_back` days).
pub async fn final_games_without_boxscores(
    db: &Db,
    range: DateRange,
) -> Result<Vec<PendingGame>> {
    let rows = sqlx::query(
        "SELECT
             g.game_id,
             ht.abbreviation AS home_abbr,
             at.abbreviation AS away_abbr,
             (g.start_time AT TIME ZONE 'America/New_York')::date::text AS game_date
         FROM games g
         JOIN teams ht ON g.home_team_id = ht.team_id
         JOIN teams at ON g.away_team_id = at.team_id
         WHERE g.status = 'Final'
           AND NOT EXISTS (
               SELECT 1 FROM player_game_stats pgs WHERE pgs.game_id = g.game_id
           )
           AND ($1::date IS NULL
                OR (g.start_time AT TIME ZONE 'America/New_York')::date >= $1::date)
           AND ($2::date IS NULL
                OR (g.start_time AT TIME ZONE 'America/New_York')::date <= $2::date)
         ORDER BY g.start_time DESC",
    )
    .bind(range.start)
    .bind(range.end)
    .fetch_all(&db.pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| PendingGame {
            game_id: r.get("game_id"),
            home_abbr: r.get("home_abbr"),
            away_abbr: r.get("away_abbr"),
            game_date: r.get("game_date"),
        })
        .collect())
}

/// Short sample of linked games for operator eyeballing after a sync run.
pub async fn sample_linked_games(db: &Db, limit: i64) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT
             g.game_id AS internal_id,
             nba_pm.provider_id AS nba_game_id,
             bdl_pm.provider_id AS bdl_game_id,
             g.status,
             g.home_score,
             g.away_score
         FROM games g
         LEFT JOIN provider_id_map nba_pm ON g.game_id = nba_pm.internal_id
             AND nba_pm.entity_type = 'game' AND nba_pm.provider = 'nba'
         LEFT JOIN provider_id_map bdl_pm ON g.game_id = bdl_pm.internal_id
             AND bdl_pm.entity_type = 'game' AND bdl_pm.provider = 'balldontlie'
         WHERE nba_pm.provider_id IS NOT NULL OR bdl_pm.provider_id IS NOT NULL
         ORDER BY g.start_time DESC
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(&db.pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| {
            format!(
                "internal={} nba={} bdl={} status={} score={}-{}",
                r.get::<String, _>("internal_id"),
                r.get::<Option<String>, _>("nba_game_id")
                    .unwrap_or_else(|| "n/a".into()),
                r.get::<Option<String>, _>("bdl_game_id")
                    .unwrap_or_else(|| "n/a".into()),
                r.get::<Option<String>, _>("status")
                    .unwrap_or_else(|| "?".into()),
                r.get::<Option<i32>, _>("home_score")
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "?".into()),
                r.get::<Option<i32>, _>("away_score")
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "?".into()),
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn dedup_keeps_first_provider_id_by_start_time() {
        let t0 = Utc.with_ymd_and_hms(2025, 11, 20, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 11, 21, 0, 0, 0).unwrap();
        let found = vec![
            ("18444929".to_string(), "0022500307".to_string(), t1),
            ("18444929".to_string(), "0022500306".to_string(), t0),
            ("0022500306".to_string(), "0022500306".to_string(), t0),
        ];
        let out = dedup_targets_by_start_time(found);
        assert_eq!(out.len(), 2);
        let bdl = out
            .iter()
            .find(|t| t.internal_game_id == "18444929")
            .unwrap();
        assert_eq!(bdl.nba_game_id, "0022500306");
    }
}
