//! Read-only report queries: row counts and data-quality probes.

use anyhow::Result;
use sqlx::Row;

use crate::database_ops::db::Db;

const CORE_TABLES: &[&str] = &[
    "games",
    "players",
    "teams",
    "player_game_stats",
    "team_game_stats",
    "provider_id_map",
];

pub async fn table_counts(db: &Db) -> Result<Vec<(&'static str, i64)>> {
    let mut counts = Vec::with_capacity(CORE_TABLES.len());
    for table in CORE_TABLES {
        // Table names come from the fixed list above, never from input.
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&db.pool)
            .await?;
        counts.push((*table, count));
    }
    Ok(counts)
}

pub async fn final_games_missing_boxscores(db: &Db) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*)
         FROM games g
         WHERE g.status = 'Final'
           AND NOT EXISTS (
               SELECT 1 FROM player_game_stats pgs WHERE pgs.game_id = g.game_id
           )",
    )
    .fetch_one(&db.pool)
    .await?;
    Ok(count)
}

/// Mapping rows whose referenced internal entity no longer exists. The
/// resolver self-heals these lazily; this report surfaces them eagerly.
pub async fn orphaned_player_mappings(db: &Db, limit: i64) -> Result<Vec<(String, String)>> {
    let rows = sqlx::query(
        "SELECT pm.provider_id, pm.internal_id
         FROM provider_id_map pm
         LEFT JOIN players p ON p.player_id = pm.internal_id
         WHERE pm.entity_type = 'player'
           AND p.player_id IS NULL
         ORDER BY pm.updated_at DESC
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(&db.pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| (r.get("provider_id"), r.get("internal_id")))
        .collect())
}

/// Players carrying more than one provider mapping - usually the output of
/// the name-link heuristic, occasionally a sign of a bad merge.
pub async fn multi_mapped_players(db: &Db, limit: i64) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query(
        "SELECT internal_id, COUNT(*) AS mappings
         FROM provider_id_map
         WHERE entity_type = 'player'
         GROUP BY internal_id
         HAVING COUNT(*) > 1
         ORDER BY COUNT(*) DESC, internal_id
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(&db.pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| (r.get("internal_id"), r.get("mappings")))
        .collect())
}
