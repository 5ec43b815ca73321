//! Typed normalization of scoreboard payloads.
//!
//! Raw scoreboard rows are decoded into [`ScoreboardGameHeader`] before any
//! database logic runs; rows that fail to decode are logged and skipped by
//! the caller. [`NormalizedGame`] is the canonical record the merge engine
//! writes from.

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::America::New_York;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Canonical game lifecycle states. Anything outside this set is `Unknown`
/// and only ever accepted over an unknown/null existing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameStatus {
    Scheduled,
    InProgress,
    Final,
    Postponed,
    Cancelled,
    Unknown,
}

impl GameStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Scheduled" => Self::Scheduled,
            "InProgress" => Self::InProgress,
            "Final" => Self::Final,
            "Postponed" => Self::Postponed,
            "Cancelled" => Self::Cancelled,
            _ => Self::Unknown,
        }
    }

    /// Map a scoreboard GAME_STATUS_ID (1=scheduled, 2=live, 3=final) plus
    /// its status text to a canonical state. The text wins for the terminal
    /// postponed/cancelled cases, which share status ids with scheduled.
    pub fn from_scoreboard(status_id: i64, status_text: &str) -> Self {
        let text = status_text.trim().to_ascii_lowercase();
        if text.contains("ppd") || text.contains("postponed") {
            return Self::Postponed;
        }
        if text.contains("cancel") {
            return Self::Cancelled;
        }
        match status_id {
            1 => Self::Scheduled,
            2 => Self::InProgress,
            3 => Self::Final,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "Scheduled",
            Self::InProgress => "InProgress",
            Self::Final => "Final",
            Self::Postponed => "Postponed",
            Self::Cancelled => "Cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// A started game has a box score worth fetching.
    pub fn has_started(&self) -> bool {
        matches!(self, Self::InProgress | Self::Final)
    }

    /// Forward-only status merge. `Final` is sticky; `Postponed` and
    /// `Cancelled` are reachable only from an unknown existing value; an
    /// unknown incoming value never replaces a known one.
    pub fn promote(existing: GameStatus, incoming: GameStatus) -> GameStatus {
        match (existing, incoming) {
            (GameStatus::Unknown, next) => next,
            (GameStatus::Final, _) => GameStatus::Final,
            (_, GameStatus::Unknown) => existing,
            (GameStatus::Postponed, _) | (GameStatus::Cancelled, _) => existing,
            (_, GameStatus::Postponed) | (_, GameStatus::Cancelled) => existing,
            (GameStatus::Scheduled, GameStatus::InProgress) => GameStatus::InProgress,
            (_, GameStatus::Final) => GameStatus::Final,
            (cur, GameStatus::Scheduled) | (cur, GameStatus::InProgress) => cur,
        }
    }
}

/// One GameHeader row from the scoreboard endpoint, decoded out of the
/// zipped `{headers, rowSet}` tabular form.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoreboardGameHeader {
    #[serde(rename = "GAME_ID")]
    pub game_id: String,
    #[serde(rename = "GAME_STATUS_TEXT")]
    pub game_status_text: String,
    #[serde(rename = "GAME_STATUS_ID")]
    pub game_status_id: i64,
    #[serde(rename = "GAME_DATE_EST")]
    pub game_date_est: String,
    #[serde(rename = "HOME_TEAM_ID")]
    pub home_team_id: i64,
    #[serde(rename = "VISITOR_TEAM_ID")]
    pub visitor_team_id: i64,
    #[serde(rename = "SEASON")]
    pub season: String,
    #[serde(rename = "ARENA_NAME", default)]
    pub arena_name: Option<String>,
}

/// Canonical game record ready for upsert.
#[derive(Debug, Clone)]
pub struct NormalizedGame {
    pub game_id: String,
    pub season: String,
    pub start_time_utc: DateTime<Utc>,
    pub status: GameStatus,
    pub home_team_internal_id: String,
    pub away_team_internal_id: String,
    pub home_team_provider_id: String,
    pub away_team_provider_id: String,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub arena: Option<String>,
}

/// Resolve team references and fold the raw header into a canonical record.
/// A header referencing an unmapped team is a data inconsistency: the caller
/// skips the row with a warning rather than aborting the batch.
pub fn normalize_game(
    raw: &ScoreboardGameHeader,
    team_map: &HashMap<String, String>,
    season: &str,
) -> Result<NormalizedGame> {
    let home_provider_id = raw.home_team_id.to_string();
    let away_provider_id = raw.visitor_team_id.to_string();

    let (Some(home_internal), Some(away_internal)) = (
        team_map.get(&home_provider_id),
        team_map.get(&away_provider_id),
    ) else {
        bail!(
            "missing team mapping for game {}: home={}, away={}",
            raw.game_id,
            home_provider_id,
            away_provider_id
        );
    };

    Ok(NormalizedGame {
        game_id: raw.game_id.clone(),
        season: if raw.season.trim().is_empty() {
            season.to_string()
        } else {
            raw.season.clone()
        },
        start_time_utc: parse_start_time(&raw.game_date_est, &raw.game_status_text),
        status: GameStatus::from_scoreboard(raw.game_status_id, &raw.game_status_text),
        home_team_internal_id: home_internal.clone(),
        away_team_internal_id: away_internal.clone(),
        home_team_provider_id: home_provider_id,
        away_team_provider_id: away_provider_id,
        home_score: None,
        away_score: None,
        arena: raw.arena_name.clone(),
    })
}

fn tipoff_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{1,2}):(\d{2})\s*([ap]m)").expect("tipoff regex"))
}

/// Derive the UTC start time from the Eastern game date plus the tip-off
/// time embedded in the status text ("7:30 pm ET"). Falls back to midnight
/// Eastern when no time is present (live/final statuses carry none).
pub fn parse_start_time(game_date_est: &str, status_text: &str) -> DateTime<Utc> {
    let date = game_date_est
        .get(0..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .unwrap_or_else(|| Utc::now().date_naive());

    let time = tipoff_regex()
        .captures(&status_text.to_ascii_lowercase())
        .and_then(|caps| {
            let hour: u32 = caps[1].parse().ok()?;
            let minute: u32 = caps[2].parse().ok()?;
            let hour = match (&caps[3], hour) {
                (_, h) if h > 12 => return None,
                (m, 12) if m == "am" => 0,
                (m, h) if m == "pm" && h != 12 => h + 12,
                (_, h) => h,
            };
            NaiveTime::from_hms_opt(hour, minute, 0)
        })
        .unwrap_or_else(|| NaiveTime::from_hms_opt(0, 0, 0).expect("midnight"));

    let local = NaiveDateTime::new(date, time);
    match New_York.from_local_datetime(&local).earliest() {
        Some(dt) => dt.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&local),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn status_from_scoreboard_maps_ids_and_terminal_text() {
        assert_eq!(
            GameStatus::from_scoreboard(1, "7:30 pm ET"),
            GameStatus::Scheduled
        );
        assert_eq!(
            GameStatus::from_scoreboard(2, "Q3 4:12"),
            GameStatus::InProgress
        );
        assert_eq!(GameStatus::from_scoreboard(3, "Final"), GameStatus::Final);
        assert_eq!(
            GameStatus::from_scoreboard(1, "PPD"),
            GameStatus::Postponed
        );
        assert_eq!(
            GameStatus::from_scoreboard(1, "Cancelled"),
            GameStatus::Cancelled
        );
        assert_eq!(GameStatus::from_scoreboard(9, "???"), GameStatus::Unknown);
    }

    #[test]
    fn promote_never_downgrades_final() {
        for incoming in [
            GameStatus::Scheduled,
            GameStatus::InProgress,
            GameStatus::Postponed,
            GameStatus::Cancelled,
            GameStatus::Unknown,
        ] {
            assert_eq!(
                GameStatus::promote(GameStatus::Final, incoming),
                GameStatus::Final
            );
        }
    }

    #[test]
    fn promote_moves_forward_only() {
        assert_eq!(
            GameStatus::promote(GameStatus::Scheduled, GameStatus::Final),
            GameStatus::Final
        );
        assert_eq!(
            GameStatus::promote(GameStatus::InProgress, GameStatus::Final),
            GameStatus::Final
        );
        assert_eq!(
            GameStatus::promote(GameStatus::Scheduled, GameStatus::InProgress),
            GameStatus::InProgress
        );
        assert_eq!(
            GameStatus::promote(GameStatus::InProgress, GameStatus::Scheduled),
            GameStatus::InProgress
        );
    }

    #[test]
    fn promote_terminal_side_states_only_from_unknown() {
        assert_eq!(
            GameStatus::promote(GameStatus::Unknown, GameStatus::Postponed),
            GameStatus::Postponed
        );
        assert_eq!(
            GameStatus::promote(GameStatus::Scheduled, GameStatus::Postponed),
            GameStatus::Scheduled
        );
        assert_eq!(
            GameStatus::promote(GameStatus::InProgress, GameStatus::Cancelled),
            GameStatus::InProgress
        );
    }

    #[test]
    fn promote_unknown_incoming_keeps_existing() {
        assert_eq!(
            GameStatus::promote(GameStatus::Scheduled, GameStatus::Unknown),
            GameStatus::Scheduled
        );
        assert_eq!(
            GameStatus::promote(GameStatus::Unknown, GameStatus::Unknown),
            GameStatus::Unknown
        );
    }

    #[test]
    fn parses_tipoff_time_from_status_text() {
        let dt = parse_start_time("2025-11-20T00:00:00", "7:30 pm ET");
        // 19:30 Eastern in November is UTC-5.
        assert_eq!(dt.hour(), 0);
        assert_eq!(dt.minute(), 30);
        assert_eq!(dt.date_naive().to_string(), "2025-11-21");
    }

    #[test]
    fn falls_back_to_midnight_eastern_without_tipoff() {
        let dt = parse_start_time("2025-11-20T00:00:00", "Final");
        assert_eq!(dt.hour(), 5);
        assert_eq!(dt.date_naive().to_string(), "2025-11-20");
    }

    #[test]
    fn decodes_header_from_zipped_record() {
        let record = serde_json::json!({
            "GAME_ID": "0022500306",
            "GAME_STATUS_TEXT": "Final",
            "GAME_STATUS_ID": 3,
            "GAME_DATE_EST": "2025-11-20T00:00:00",
            "HOME_TEAM_ID": 1610612738,
            "VISITOR_TEAM_ID": 1610612748,
            "SEASON": "2025",
            "ARENA_NAME": "TD Garden",
        });
        let header: ScoreboardGameHeader = serde_json::from_value(record).unwrap();
        assert_eq!(header.game_id, "0022500306");
        assert_eq!(header.home_team_id, 1610612738);
        assert_eq!(header.arena_name.as_deref(), Some("TD Garden"));
    }

    #[test]
    fn normalize_game_requires_team_mappings() {
        let header = ScoreboardGameHeader {
            game_id: "0022500306".into(),
            game_status_text: "Final".into(),
            game_status_id: 3,
            game_date_est: "2025-11-20T00:00:00".into(),
            home_team_id: 1610612738,
            visitor_team_id: 1610612748,
            season: "2025".into(),
            arena_name: None,
        };
        let mut team_map = HashMap::new();
        team_map.insert("1610612738".to_string(), "BOS".to_string());
        assert!(normalize_game(&header, &team_map, "2025-26").is_err());

        team_map.insert("1610612748".to_string(), "MIA".to_string());
        let game = normalize_game(&header, &team_map, "2025-26").unwrap();
        assert_eq!(game.home_team_internal_id, "BOS");
        assert_eq!(game.away_team_internal_id, "MIA");
        assert_eq!(game.status, GameStatus::Final);
        assert_eq!(game.season, "2025");
    }
}
