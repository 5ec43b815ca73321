//! Entity resolution between provider-native identifiers and canonical rows.
//!
//! Resolution order: provider mapping hit (verifying the referenced row
//! still exists), then an optional name heuristic against players seeded by
//! other providers, then creation with the provider-native id as the
//! internal id. Every path leaves a `provider_id_map` row behind so the
//! next run short-circuits at step one.

use anyhow::{bail, Result};
use serde_json::json;
use sqlx::{PgConnection, Row};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::database_ops::db::Db;
use crate::normalization::boxscore::split_name;

pub const PROVIDER_NBA: &str = "nba";

/// League stats game ids carry a fixed numeric prefix (regular-season ids
/// start with 002); the secondary provider's ids start with 184. These
/// prefixes are how reconciliation tells the two source systems apart.
pub fn is_nba_stats_game_id(game_id: &str) -> bool {
    game_id.starts_with("002")
}

pub fn is_bdl_game_id(game_id: &str) -> bool {
    game_id.starts_with("184")
}

/// Knobs for the player-identity fallback. `link_by_name` keeps the
/// original first-match-wins heuristic; turning it off requires an exact
/// provider-id mapping and otherwise creates a fresh row. Two distinct
/// players sharing a first+last name would be merged by the heuristic, so
/// cautious runs can disable it.
#[derive(Debug, Clone, Copy)]
pub struct ResolverOptions {
    pub link_by_name: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self { link_by_name: true }
    }
}

/// Load the provider-to-internal team id map. An empty map means the
/// mapping seed never ran, and every downstream resolution would silently
/// produce wrong data, so this fails fast.
pub async fn resolve_team_mapping(db: &Db) -> Result<HashMap<String, String>> {
    let rows = sqlx::query(
        "SELECT provider_id, internal_id
         FROM provider_id_map
         WHERE entity_type = 'team'
           AND provider = $1",
    )
    .bind(PROVIDER_NBA)
    .fetch_all(&db.pool)
    .await?;

    let mapping: HashMap<String, String> = rows
        .into_iter()
        .map(|r| (r.get("provider_id"), r.get("internal_id")))
        .collect();

    if mapping.is_empty() {
        bail!("no team mappings found for provider='nba'; seed provider_id_map first");
    }
    Ok(mapping)
}

/// Resolve a provider-native player id to an internal player id, creating
/// or linking rows as needed. Idempotent once the mapping exists.
pub async fn resolve_player(
    conn: &mut PgConnection,
    opts: &ResolverOptions,
    provider_player_id: &str,
    player_name: &str,
) -> Result<String> {
    let mapped: Option<String> = sqlx::query_scalar(
        "SELECT internal_id
         FROM provider_id_map
         WHERE entity_type = 'player'
           AND provider = $1
           AND provider_id = $2
         LIMIT 1",
    )
    .bind(PROVIDER_NBA)
    .bind(provider_player_id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(internal_id) = mapped {
        let exists: Option<String> =
            sqlx::query_scalar("SELECT player_id FROM players WHERE player_id = $1")
                .bind(&internal_id)
                .fetch_optional(&mut *conn)
                .await?;
        if exists.is_some() {
            return Ok(internal_id);
        }
        // Orphaned mapping: the player row is gone. Self-heal by falling
        // through to the creation path rather than erroring the batch.
        warn!(
            player = player_name,
            provider_id = provider_player_id,
            internal_id = %internal_id,
            "provider mapping points at a missing player; recreating"
        );
    }

    if opts.link_by_name {
        if let Some(existing_id) =
            find_player_by_name(&mut *conn, player_name).await?
        {
            info!(
                player = player_name,
                provider_id = provider_player_id,
                internal_id = %existing_id,
                "linking provider id to existing player by name match"
            );
            upsert_player_mapping(
                &mut *conn,
                &existing_id,
                provider_player_id,
                json!({
                    "source": "nba_api",
                    "seeded_from_boxscore": true,
                    "linked_to_existing": true,
                }),
            )
            .await?;
            return Ok(existing_id);
        }
    }

    // No match anywhere: create the player, using the provider-native id as
    // the internal id (the convention for the first provider that ever
    // introduces the entity).
    let (first_name, last_name) = split_name(player_name);
    sqlx::query(
        "INSERT INTO players (player_id, full_name, first_name, last_name, created_at, updated_at)
         VALUES ($1, $2, $3, $4, now(), now())
         ON CONFLICT (player_id) DO UPDATE SET
             full_name = excluded.full_name,
             first_name = excluded.first_name,
             last_name = excluded.last_name,
             updated_at = now()",
    )
    .bind(provider_player_id)
    .bind(player_name)
    .bind(&first_name)
    .bind(&last_name)
    .execute(&mut *conn)
    .await?;

    upsert_player_mapping(
        &mut *conn,
        provider_player_id,
        provider_player_id,
        json!({"source": "nba_api", "seeded_from_boxscore": true}),
    )
    .await?;

    Ok(provider_player_id.to_string())
}

/// Case-insensitive first+last or full-name substring match. First match
/// wins; ties resolve by underlying row order.
async fn find_player_by_name(
    conn: &mut PgConnection,
    player_name: &str,
) -> Result<Option<String>> {
    let (Some(first_name), Some(last_name)) = split_name(player_name) else {
        return Ok(None);
    };

    let row: Option<String> = sqlx::query_scalar(
        "SELECT player_id
         FROM players
         WHERE (first_name ILIKE $1 AND last_name ILIKE $2)
            OR full_name ILIKE $3
         LIMIT 1",
    )
    .bind(&first_name)
    .bind(&last_name)
    .bind(format!("%{}%", player_name))
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

/// The single mapping write shared by the link and create paths. Repoints
/// `internal_id` and refreshes metadata when the triple already exists.
pub async fn upsert_player_mapping(
    conn: &mut PgConnection,
    internal_id: &str,
    provider_player_id: &str,
    metadata: serde_json::Value,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO provider_id_map (
             entity_type, internal_id, provider, provider_id, metadata,
             fetched_at, created_at, updated_at
         ) VALUES ('player', $1, $2, $3, $4, now(), now(), now())
         ON CONFLICT (entity_type, provider, provider_id) DO UPDATE SET
             internal_id = excluded.internal_id,
             metadata = excluded.metadata,
             fetched_at = excluded.fetched_at,
             updated_at = now()",
    )
    .bind(internal_id)
    .bind(PROVIDER_NBA)
    .bind(provider_player_id)
    .bind(metadata)
    .execute(conn)
    .await?;
    Ok(())
}

/// Look up the league stats game id for an internal game. Falls back to
/// the id-prefix convention: a `002`-prefixed internal id *is* a stats id.
pub async fn nba_game_id_for(db: &Db, internal_game_id: &str) -> Result<Option<String>> {
    let mapped: Option<String> = sqlx::query_scalar(
        "SELECT provider_id
         FROM provider_id_map
         WHERE entity_type = 'game'
           AND provider = $1
           AND internal_id = $2
         LIMIT 1",
    )
    .bind(PROVIDER_NBA)
    .bind(internal_game_id)
    .fetch_optional(&db.pool)
    .await?;

    if mapped.is_some() {
        return Ok(mapped);
    }
    if is_nba_stats_game_id(internal_game_id) {
        return Ok(Some(internal_game_id.to_string()));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_game_id_prefixes() {
        assert!(is_nba_stats_game_id("0022500306"));
        assert!(!is_nba_stats_game_id("18444929"));
        assert!(is_bdl_game_id("18444929"));
        assert!(!is_bdl_game_id("0022500306"));
        assert!(!is_nba_stats_game_id(""));
    }

    #[test]
    fn name_link_defaults_on() {
        assert!(ResolverOptions::default().link_by_name);
    }
}
