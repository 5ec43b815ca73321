//! Raw-payload staging for replay and debugging.
//!
//! Staging writes are best-effort: the first insert failure disables
//! further staging for the rest of that run. The disable flag lives on the
//! guard owned by the run, not in process-global state, so repeated or
//! concurrent invocations do not leak the decision across runs.

use anyhow::Result;
use sqlx::PgPool;
use tracing::warn;

#[derive(Debug)]
pub struct StagingGuard {
    enabled: bool,
}

impl StagingGuard {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Insert one raw event. Failures are logged, never propagated, and
    /// switch staging off for the remainder of this guard's run. Staging
    /// writes go through the pool, outside the caller's unit transaction,
    /// so a staging failure cannot poison the transaction.
    pub async fn record(
        &mut self,
        pool: &PgPool,
        source: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let result = sqlx::query(
            "INSERT INTO staging_events (source, event_type, payload, created_at)
             VALUES ($1, $2, $3, now())",
        )
        .bind(source)
        .bind(event_type)
        .bind(payload)
        .execute(pool)
        .await;

        if let Err(err) = result {
            warn!(
                source,
                event_type,
                error = %err,
                "staging insert failed; disabling staging for this run"
            );
            self.enabled = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_respects_initial_setting() {
        assert!(StagingGuard::new(true).is_enabled());
        assert!(!StagingGuard::new(false).is_enabled());
    }
}
