//! Opaque scraper fallback.
//!
//! When the stats API has no data for a game yet, an external scraper can
//! be invoked as a subprocess. The only contract with it is exit status
//! plus the side effect of rows appearing in `player_game_stats`; nothing
//! about its output is parsed.

use anyhow::{bail, Result};
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

use crate::database_ops::db::Db;
use crate::util::env::env_opt;

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub argv: Vec<String>,
    pub timeout: Duration,
}

impl ScraperConfig {
    /// Read an argv template from the named env var, e.g.
    /// `BREF_SCRAPER_CMD="npx tsx scripts/scrape-basketball-reference.ts"`.
    pub fn from_env(key: &str) -> Option<Self> {
        let raw = env_opt(key)?;
        let argv = parse_argv(&raw);
        if argv.is_empty() {
            return None;
        }
        Some(Self {
            argv,
            timeout: Duration::from_secs(60),
        })
    }
}

fn parse_argv(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(|s| s.to_string()).collect()
}

pub async fn has_player_stats(db: &Db, game_id: &str) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM player_game_stats WHERE game_id = $1")
            .bind(game_id)
            .fetch_one(&db.pool)
            .await?;
    Ok(count > 0)
}

/// Run the scraper for one game. Success means the process exited zero AND
/// player stat rows now exist for the game; a timeout or non-zero exit is
/// reported as failure, not an error, so the caller can try the next
/// source.
pub async fn run_scraper_for_game(db: &Db, cfg: &ScraperConfig, game_id: &str) -> Result<bool> {
    let Some((program, rest)) = cfg.argv.split_first() else {
        bail!("scraper argv is empty");
    };

    info!(scraper = %program, game_id, "invoking scraper fallback");
    let child = Command::new(program)
        .args(rest)
        .arg("--game-id")
        .arg(game_id)
        .output();

    let output = match tokio::time::timeout(cfg.timeout, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            warn!(scraper = %program, game_id, error = %err, "scraper failed to launch");
            return Ok(false);
        }
        Err(_) => {
            warn!(scraper = %program, game_id, timeout_secs = cfg.timeout.as_secs(), "scraper timed out");
            return Ok(false);
        }
    };

    if !output.status.success() {
        warn!(
            scraper = %program,
            game_id,
            status = ?output.status.code(),
            "scraper exited non-zero"
        );
        return Ok(false);
    }

    let stored = has_player_stats(db, game_id).await?;
    if !stored {
        warn!(scraper = %program, game_id, "scraper exited zero but stored no rows");
    }
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_argv_template() {
        assert_eq!(
            parse_argv("npx tsx scripts/scrape-basketball-reference.ts"),
            vec!["npx", "tsx", "scripts/scrape-basketball-reference.ts"]
        );
        assert!(parse_argv("   ").is_empty());
    }
}
