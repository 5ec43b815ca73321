//! Conflict-tolerant upserts into the canonical tables.
//!
//! Field-level merge policy:
//! - `games.status` only moves forward (Scheduled/InProgress -> Final);
//!   Postponed/Cancelled are terminal side states reachable only when the
//!   existing value is unknown.
//! - `games.home_score`/`away_score`: a non-null incoming value wins, a
//!   null incoming value never erases an existing non-null value.
//! - stat columns are last-write-wins on conflict.
//!
//! The status/score rules live in the ON CONFLICT clause itself so that
//! concurrent script invocations racing on the same rows stay safe without
//! application-level locking.

use anyhow::Result;
use sqlx::{PgConnection, Row};
use std::collections::HashMap;
use tracing::warn;

use crate::database_ops::DateRange;
use crate::normalization::boxscore::{
    possessions_estimate, sum_points_by_team, NormalizedPlayerStat, QuarterPoints,
};
use crate::normalization::schedule::{GameStatus, NormalizedGame};

const UPSERT_GAME_SQL: &str = "
    INSERT INTO games (
        game_id, season, start_time, status, home_team_id, away_team_id,
        home_score, away_score, venue, created_at, updated_at
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now(), now())
    ON CONFLICT (game_id) DO UPDATE SET
        season = excluded.season,
        start_time = excluded.start_time,
        status = CASE
            WHEN games.status IS NULL
                 OR games.status NOT IN ('Final', 'Scheduled', 'InProgress', 'Postponed', 'Cancelled')
                THEN excluded.status
            WHEN games.status = 'Scheduled' AND excluded.status IN ('InProgress', 'Final')
                THEN excluded.status
            WHEN games.status = 'InProgress' AND excluded.status = 'Final'
                THEN excluded.status
            ELSE games.status
        END,
        home_team_id = excluded.home_team_id,
        away_team_id = excluded.away_team_id,
        home_score = CASE
            WHEN games.home_score IS NULL THEN excluded.home_score
            WHEN excluded.home_score IS NOT NULL THEN excluded.home_score
            ELSE games.home_score
        END,
        away_score = CASE
            WHEN games.away_score IS NULL THEN excluded.away_score
            WHEN excluded.away_score IS NOT NULL THEN excluded.away_score
            ELSE games.away_score
        END,
        venue = excluded.venue,
        updated_at = now()";

pub async fn upsert_game(conn: &mut PgConnection, game: &NormalizedGame) -> Result<()> {
    sqlx::query(UPSERT_GAME_SQL)
        .bind(&game.game_id)
        .bind(&game.season)
        .bind(game.start_time_utc)
        .bind(game.status.as_str())
        .bind(&game.home_team_internal_id)
        .bind(&game.away_team_internal_id)
        .bind(game.home_score)
        .bind(game.away_score)
        .bind(&game.arena)
        .execute(conn)
        .await?;
    Ok(())
}

const UPSERT_PLAYER_STAT_SQL: &str = "
    INSERT INTO player_game_stats (
        game_id, player_id, team_id, minutes, points, rebounds, assists,
        steals, blocks, turnovers, field_goals_made, field_goals_attempted,
        three_pointers_made, three_pointers_attempted, free_throws_made,
        free_throws_attempted, plus_minus, started, dnp_reason, created_at, updated_at
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19,
        now(), now()
    )
    ON CONFLICT (game_id, player_id) DO UPDATE SET
        team_id = excluded.team_id,
        minutes = excluded.minutes,
        points = excluded.points,
        rebounds = excluded.rebounds,
        assists = excluded.assists,
        steals = excluded.steals,
        blocks = excluded.blocks,
        turnovers = excluded.turnovers,
        field_goals_made = excluded.field_goals_made,
        field_goals_attempted = excluded.field_goals_attempted,
        three_pointers_made = excluded.three_pointers_made,
        three_pointers_attempted = excluded.three_pointers_attempted,
        free_throws_made = excluded.free_throws_made,
        free_throws_attempted = excluded.free_throws_attempted,
        plus_minus = excluded.plus_minus,
        started = excluded.started,
        dnp_reason = excluded.dnp_reason,
        updated_at = now()";

/// Upsert one player stat line per call, keyed on (game_id, player_id).
/// Returns the number of rows written.
pub async fn upsert_player_stats(
    conn: &mut PgConnection,
    internal_game_id: &str,
    stats: &[NormalizedPlayerStat],
) -> Result<usize> {
    for stat in stats {
        sqlx::query(UPSERT_PLAYER_STAT_SQL)
            .bind(internal_game_id)
            .bind(&stat.player_id)
            .bind(&stat.team_internal_id)
            .bind(stat.minutes)
            .bind(stat.points)
            .bind(stat.rebounds)
            .bind(stat.assists)
            .bind(stat.steals)
            .bind(stat.blocks)
            .bind(stat.turnovers)
            .bind(stat.field_goals_made)
            .bind(stat.field_goals_attempted)
            .bind(stat.three_pointers_made)
            .bind(stat.three_pointers_attempted)
            .bind(stat.free_throws_made)
            .bind(stat.free_throws_attempted)
            .bind(stat.plus_minus)
            .bind(stat.started)
            .bind(&stat.dnp_reason)
            .execute(&mut *conn)
            .await?;
    }
    Ok(stats.len())
}

/// Promote game scores from freshly written player lines: team point sums
/// fill any missing home/away score (coalesce keeps existing non-null
/// values), and the status moves forward per [`GameStatus::promote`].
pub async fn promote_game_scores(
    conn: &mut PgConnection,
    game: &NormalizedGame,
    stats: &[NormalizedPlayerStat],
) -> Result<()> {
    let totals = sum_points_by_team(stats);
    let home_points = totals.get(&game.home_team_internal_id).map(|p| *p as i32);
    let away_points = totals.get(&game.away_team_internal_id).map(|p| *p as i32);
    if home_points.is_none() && away_points.is_none() {
        return Ok(());
    }

    let existing: Option<Option<String>> =
        sqlx::query_scalar("SELECT status FROM games WHERE game_id = $1")
            .bind(&game.game_id)
            .fetch_optional(&mut *conn)
            .await?;
    let existing_status = existing
        .flatten()
        .map(|s| GameStatus::parse(&s))
        .unwrap_or(GameStatus::Unknown);
    let next_status = GameStatus::promote(existing_status, game.status);

    sqlx::query(
        "UPDATE games
         SET home_score = COALESCE($1, home_score),
             away_score = COALESCE($2, away_score),
             status = $3,
             updated_at = now()
         WHERE game_id = $4",
    )
    .bind(home_points)
    .bind(away_points)
    .bind(next_status.as_str())
    .bind(&game.game_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Team totals aggregated from player lines, keyed by internal team id.
#[derive(Debug, Clone)]
pub struct TeamAggregate {
    pub team_internal_id: String,
    pub points: i64,
    pub field_goals_made: i64,
    pub field_goals_attempted: i64,
    pub three_pointers_made: i64,
    pub three_pointers_attempted: i64,
    pub free_throws_made: i64,
    pub free_throws_attempted: i64,
    pub rebounds: i64,
    pub assists: i64,
    pub steals: i64,
    pub blocks: i64,
    pub turnovers: i64,
    pub minutes: f64,
}

/// Sum player lines per team for one game, excluding DNP rows.
pub async fn aggregate_team_stats(
    conn: &mut PgConnection,
    internal_game_id: &str,
) -> Result<Vec<TeamAggregate>> {
    let rows = sqlx::query(
        "SELECT
             team_id,
             COALESCE(SUM(points), 0)::bigint AS points,
             COALESCE(SUM(field_goals_made), 0)::bigint AS field_goals_made,
             COALESCE(SUM(field_goals_attempted), 0)::bigint AS field_goals_attempted,
             COALESCE(SUM(three_pointers_made), 0)::bigint AS three_pointers_made,
             COALESCE(SUM(three_pointers_attempted), 0)::bigint AS three_pointers_attempted,
             COALESCE(SUM(free_throws_made), 0)::bigint AS free_throws_made,
             COALESCE(SUM(free_throws_attempted), 0)::bigint AS free_throws_attempted,
             COALESCE(SUM(rebounds), 0)::bigint AS rebounds,
             COALESCE(SUM(assists), 0)::bigint AS assists,
             COALESCE(SUM(steals), 0)::bigint AS steals,
             COALESCE(SUM(blocks), 0)::bigint AS blocks,
             COALESCE(SUM(turnovers), 0)::bigint AS turnovers,
             COALESCE(SUM(minutes), 0)::float8 AS minutes
         FROM player_game_stats
         WHERE game_id = $1 AND dnp_reason IS NULL
         GROUP BY team_id",
    )
    .bind(internal_game_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| TeamAggregate {
            team_internal_id: r.get("team_id"),
            points: r.get("points"),
            field_goals_made: r.get("field_goals_made"),
            field_goals_attempted: r.get("field_goals_attempted"),
            three_pointers_made: r.get("three_pointers_made"),
            three_pointers_attempted: r.get("three_pointers_attempted"),
            free_throws_made: r.get("free_throws_made"),
            free_throws_attempted: r.get("free_throws_attempted"),
            rebounds: r.get("rebounds"),
            assists: r.get("assists"),
            steals: r.get("steals"),
            blocks: r.get("blocks"),
            turnovers: r.get("turnovers"),
            minutes: r.get("minutes"),
        })
        .collect())
}

const UPSERT_TEAM_STAT_SQL: &str = "
    INSERT INTO team_game_stats (
        game_id, team_id, points, field_goals_made, field_goals_attempted,
        three_pointers_made, three_pointers_attempted, free_throws_made,
        free_throws_attempted, rebounds, assists, steals, blocks, turnovers,
        minutes, is_home, possessions,
        points_q1, points_q2, points_q3, points_q4, points_ot,
        created_at, updated_at
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
        $18, $19, $20, $21, $22, now(), now()
    )
    ON CONFLICT (game_id, team_id) DO UPDATE SET
        points = excluded.points,
        field_goals_made = excluded.field_goals_made,
        field_goals_attempted = excluded.field_goals_attempted,
        three_pointers_made = excluded.three_pointers_made,
        three_pointers_attempted = excluded.three_pointers_attempted,
        free_throws_made = excluded.free_throws_made,
        free_throws_attempted = excluded.free_throws_attempted,
        rebounds = excluded.rebounds,
        assists = excluded.assists,
        steals = excluded.steals,
        blocks = excluded.blocks,
        turnovers = excluded.turnovers,
        minutes = excluded.minutes,
        is_home = excluded.is_home,
        possessions = excluded.possessions,
        points_q1 = excluded.points_q1,
        points_q2 = excluded.points_q2,
        points_q3 = excluded.points_q3,
        points_q4 = excluded.points_q4,
        points_ot = excluded.points_ot,
        updated_at = now()";

/// Write team totals (with quarter points where known) for one game.
/// `quarters` is keyed by provider-native team id, so the reverse of the
/// team mapping bridges the aggregate rows to their line-score entries.
pub async fn upsert_team_stats(
    conn: &mut PgConnection,
    internal_game_id: &str,
    aggregates: &[TeamAggregate],
    quarters: &HashMap<String, QuarterPoints>,
    reverse_team_map: &HashMap<String, String>,
) -> Result<usize> {
    let game_row = sqlx::query(
        "SELECT home_team_id, away_team_id FROM games WHERE game_id = $1",
    )
    .bind(internal_game_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(game_row) = game_row else {
        warn!(game_id = internal_game_id, "game not found; skipping team stats");
        return Ok(0);
    };
    let home_team_id: String = game_row.get("home_team_id");

    let mut written = 0usize;
    for agg in aggregates {
        let quarter_points = reverse_team_map
            .get(&agg.team_internal_id)
            .and_then(|provider_id| quarters.get(provider_id))
            .copied()
            .unwrap_or_default();
        if reverse_team_map.get(&agg.team_internal_id).is_none() {
            warn!(
                game_id = internal_game_id,
                team_id = %agg.team_internal_id,
                "no provider mapping for team; quarter points unavailable"
            );
        }

        let possessions = possessions_estimate(
            agg.field_goals_attempted,
            agg.free_throws_attempted,
            agg.rebounds,
            agg.turnovers,
        );
        let is_home = agg.team_internal_id == home_team_id;

        sqlx::query(UPSERT_TEAM_STAT_SQL)
            .bind(internal_game_id)
            .bind(&agg.team_internal_id)
            .bind(agg.points)
            .bind(agg.field_goals_made)
            .bind(agg.field_goals_attempted)
            .bind(agg.three_pointers_made)
            .bind(agg.three_pointers_attempted)
            .bind(agg.free_throws_made)
            .bind(agg.free_throws_attempted)
            .bind(agg.rebounds)
            .bind(agg.assists)
            .bind(agg.steals)
            .bind(agg.blocks)
            .bind(agg.turnovers)
            .bind(agg.minutes)
            .bind(is_home)
            .bind(possessions)
            .bind(quarter_points.q1)
            .bind(quarter_points.q2)
            .bind(quarter_points.q3)
            .bind(quarter_points.q4)
            .bind(quarter_points.ot)
            .execute(&mut *conn)
            .await?;
        written += 1;
    }
    Ok(written)
}

/// Backfill quarter points onto an existing team stat row. Returns true
/// when a row was updated.
pub async fn update_quarter_points(
    conn: &mut PgConnection,
    internal_game_id: &str,
    team_internal_id: &str,
    quarter_points: QuarterPoints,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE team_game_stats
         SET points_q1 = $1,
             points_q2 = $2,
             points_q3 = $3,
             points_q4 = $4,
             points_ot = $5,
             updated_at = now()
         WHERE game_id = $6 AND team_id = $7",
    )
    .bind(quarter_points.q1)
    .bind(quarter_points.q2)
    .bind(quarter_points.q3)
    .bind(quarter_points.q4)
    .bind(quarter_points.ot)
    .bind(internal_game_id)
    .bind(team_internal_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Canonical player attributes from a roster feed.
#[derive(Debug, Clone)]
pub struct RosterUpsert {
    pub player_id: String,
    pub full_name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub position: Option<String>,
    pub height: Option<String>,
    pub weight: Option<String>,
    pub dob: Option<chrono::NaiveDate>,
    pub active: Option<bool>,
}

pub async fn upsert_roster_player(conn: &mut PgConnection, player: &RosterUpsert) -> Result<()> {
    sqlx::query(
        "INSERT INTO players (
             player_id, full_name, first_name, last_name, position, height,
             weight, dob, active, created_at, updated_at
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now(), now())
         ON CONFLICT (player_id) DO UPDATE SET
             full_name = excluded.full_name,
             first_name = excluded.first_name,
             last_name = excluded.last_name,
             position = excluded.position,
             height = excluded.height,
             weight = excluded.weight,
             dob = excluded.dob,
             active = excluded.active,
             updated_at = now()",
    )
    .bind(&player.player_id)
    .bind(&player.full_name)
    .bind(&player.first_name)
    .bind(&player.last_name)
    .bind(&player.position)
    .bind(&player.height)
    .bind(&player.weight)
    .bind(player.dob)
    .bind(player.active)
    .execute(conn)
    .await?;
    Ok(())
}

/// Promote league-stats games carrying both scores to Final. Terminal
/// states (Final, Postponed, Cancelled) are left alone.
pub async fn update_game_statuses(conn: &mut PgConnection, range: DateRange) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE games
         SET status = 'Final', updated_at = now()
         WHERE home_score IS NOT NULL
           AND away_score IS NOT NULL
           AND (status IS NULL OR status NOT IN ('Final', 'Postponed', 'Cancelled'))
           AND game_id LIKE '002%'
           AND ($1::date IS NULL OR start_time::date >= $1::date)
           AND ($2::date IS NULL OR start_time::date <= $2::date)",
    )
    .bind(range.start)
    .bind(range.end)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Fill missing game scores from summed player points. Only touches
/// league-stats games where at least one score is null.
pub async fn update_scores_from_stats(conn: &mut PgConnection, range: DateRange) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE games g
         SET home_score = home_totals.total_points,
             away_score = away_totals.total_points,
             status = 'Final',
             updated_at = now()
         FROM (
             SELECT game_id, team_id, SUM(points) AS total_points
             FROM player_game_stats
             GROUP BY game_id, team_id
         ) home_totals,
         (
             SELECT game_id, team_id, SUM(points) AS total_points
             FROM player_game_stats
             GROUP BY game_id, team_id
         ) away_totals
         WHERE g.game_id = home_totals.game_id
           AND g.game_id = away_totals.game_id
           AND g.home_team_id = home_totals.team_id
           AND g.away_team_id = away_totals.team_id
           AND (g.home_score IS NULL OR g.away_score IS NULL)
           AND g.game_id LIKE '002%'
           AND ($1::date IS NULL OR g.start_time::date >= $1::date)
           AND ($2::date IS NULL OR g.start_time::date <= $2::date)",
    )
    .bind(range.start)
    .bind(range.end)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}
