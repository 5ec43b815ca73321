use anyhow::{anyhow, Result};
use chrono::{NaiveDate, NaiveDateTime};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::normalization::boxscore::{RawPlayerLine, TeamLineScore};
use crate::normalization::schedule::ScoreboardGameHeader;
use crate::util::env::env_parse;

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        s.truncate(max_len);
        s.push('…');
    }
    s
}

/// Bounded retry with a fixed delay between attempts. Exhausting the
/// attempts yields `None` so the caller can skip the entity and keep the
/// batch moving; the policy values live here so tests can exercise the loop
/// without sleeping.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Some(value),
                Err(err) if attempt <= self.max_retries => {
                    warn!(what, attempt, error = %err, "upstream fetch failed; retrying");
                    tokio::time::sleep(self.delay).await;
                }
                Err(err) => {
                    warn!(
                        what,
                        attempts = attempt,
                        error = %err,
                        "upstream fetch failed; giving up"
                    );
                    return None;
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct NbaStatsConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Static pause between successive API calls, to stay polite with an
    /// upstream that publishes no formal rate limits.
    pub request_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for NbaStatsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://stats.nba.com/stats".to_string(),
            timeout_secs: 30,
            request_delay: Duration::from_millis(1000),
            retry: RetryPolicy {
                max_retries: 3,
                delay: Duration::from_millis(5000),
            },
        }
    }
}

impl NbaStatsConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            request_delay: Duration::from_millis(env_parse(
                "NBA_STATS_REQUEST_DELAY_MS",
                defaults.request_delay.as_millis() as u64,
            )),
            retry: RetryPolicy {
                max_retries: env_parse("NBA_STATS_MAX_RETRIES", defaults.retry.max_retries),
                delay: Duration::from_millis(env_parse(
                    "NBA_STATS_RETRY_DELAY_MS",
                    defaults.retry.delay.as_millis() as u64,
                )),
            },
            ..defaults
        }
    }
}

/// Read-only client for the league stats API.
///
/// Endpoints used:
/// - GET /scoreboardv2?GameDate=MM/DD/YYYY - schedule + status per day
/// - GET /boxscoretraditionalv3?GameID=... - per-player box score
/// - GET /boxscoresummaryv2?GameID=... - LineScore quarter totals
/// - GET /commonteamroster?TeamID=...&Season=... - team roster
///
/// The host rejects requests without browser-like headers, so the client
/// pins User-Agent/Referer/origin headers the way the official site sends
/// them.
#[derive(Debug, Clone)]
pub struct NbaStatsClient {
    cfg: NbaStatsConfig,
    http: Client,
}

impl NbaStatsClient {
    pub fn new(cfg: NbaStatsConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        headers.insert(
            "Referer",
            HeaderValue::from_static("https://www.nba.com/"),
        );
        headers.insert("Origin", HeaderValue::from_static("https://www.nba.com"));
        headers.insert("x-nba-stats-origin", HeaderValue::from_static("stats"));
        headers.insert("x-nba-stats-token", HeaderValue::from_static("true"));

        let http = Client::builder()
            .user_agent(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                 Chrome/124.0 Safari/537.36",
            )
            .default_headers(headers)
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;

        Ok(Self { cfg, http })
    }

    pub fn retry(&self) -> RetryPolicy {
        self.cfg.retry
    }

    /// Static inter-request pause; call between successive fetches.
    pub async fn pace(&self) {
        tokio::time::sleep(self.cfg.request_delay).await;
    }

    async fn get_json(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/{}", self.cfg.base_url.trim_end_matches('/'), endpoint);
        let resp = self.http.get(&url).query(query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = truncate_for_log(resp.text().await.unwrap_or_default(), 2000);
            return Err(anyhow!("stats api {endpoint} failed: {status} body={body}"));
        }
        Ok(resp.json().await?)
    }

    /// Fetch the schedule for one Eastern calendar date. Malformed rows are
    /// logged and skipped; an empty day returns an empty list.
    pub async fn scoreboard(&self, game_date: NaiveDate) -> Result<Vec<ScoreboardGameHeader>> {
        let body = self
            .get_json(
                "scoreboardv2",
                &[
                    ("GameDate", game_date.format("%m/%d/%Y").to_string()),
                    ("LeagueID", "00".to_string()),
                    ("DayOffset", "0".to_string()),
                ],
            )
            .await?;

        let mut headers = Vec::new();
        for record in result_set_records(&body, "GameHeader") {
            match serde_json::from_value::<ScoreboardGameHeader>(Value::Object(record)) {
                Ok(h) => headers.push(h),
                Err(err) => {
                    warn!(date = %game_date, error = %err, "failed to parse scoreboard game");
                }
            }
        }
        debug!(date = %game_date, games = headers.len(), "scoreboard fetched");
        Ok(headers)
    }

    /// Fetch the traditional box score (V3 shape) for one game. Returns an
    /// empty list when the payload carries no player lines yet.
    pub async fn boxscore_traditional(&self, provider_game_id: &str) -> Result<Vec<RawPlayerLine>> {
        let body = self
            .get_json(
                "boxscoretraditionalv3",
                &[
                    ("GameID", provider_game_id.to_string()),
                    ("StartPeriod", "0".to_string()),
                    ("EndPeriod", "0".to_string()),
                    ("StartRange", "0".to_string()),
                    ("EndRange", "0".to_string()),
                    ("RangeType", "0".to_string()),
                ],
            )
            .await?;

        let Some(boxscore) = body.get("boxScoreTraditional") else {
            warn!(game_id = provider_game_id, "no boxScoreTraditional payload");
            return Ok(Vec::new());
        };

        let mut lines = Vec::new();
        for side in ["homeTeam", "awayTeam"] {
            let Some(team) = boxscore.get(side) else {
                continue;
            };
            lines.extend(extract_team_player_lines(team));
        }
        debug!(
            game_id = provider_game_id,
            players = lines.len(),
            "box score fetched"
        );
        Ok(lines)
    }

    /// Fetch quarter-by-quarter team totals from the game summary.
    pub async fn line_score(&self, provider_game_id: &str) -> Result<Vec<TeamLineScore>> {
        let body = self
            .get_json(
                "boxscoresummaryv2",
                &[("GameID", provider_game_id.to_string())],
            )
            .await?;

        let mut lines = Vec::new();
        for record in result_set_records(&body, "LineScore") {
            match serde_json::from_value::<TeamLineScore>(Value::Object(record)) {
                Ok(line) => lines.push(line),
                Err(err) => {
                    warn!(game_id = provider_game_id, error = %err, "failed to parse line score row");
                }
            }
        }
        Ok(lines)
    }

    /// Fetch the roster for one team.
    pub async fn team_roster(
        &self,
        provider_team_id: &str,
        season: &str,
    ) -> Result<Vec<RosterPlayer>> {
        let body = self
            .get_json(
                "commonteamroster",
                &[
                    ("TeamID", provider_team_id.to_string()),
                    ("Season", season.to_string()),
                    ("LeagueID", "00".to_string()),
                ],
            )
            .await?;

        let mut players = Vec::new();
        for record in result_set_records(&body, "CommonTeamRoster") {
            match serde_json::from_value::<RosterPlayer>(Value::Object(record)) {
                Ok(p) => players.push(p),
                Err(err) => {
                    warn!(team_id = provider_team_id, error = %err, "failed to parse roster row");
                }
            }
        }
        Ok(players)
    }
}

/// One roster row from the commonteamroster endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RosterPlayer {
    #[serde(rename = "PLAYER_ID")]
    pub player_id: i64,
    #[serde(rename = "PLAYER")]
    pub player_name: String,
    #[serde(rename = "POSITION", default)]
    pub position: Option<String>,
    #[serde(rename = "HEIGHT", default)]
    pub height: Option<String>,
    #[serde(rename = "WEIGHT", default)]
    pub weight: Option<String>,
    #[serde(rename = "NUM", default)]
    pub jersey: Option<String>,
    #[serde(rename = "BIRTH_DATE", default)]
    pub birth_date: Option<String>,
    #[serde(rename = "ROSTERSTATUS", default)]
    pub roster_status: Option<Value>,
}

impl RosterPlayer {
    /// The feed formats birth dates like "NOV 08, 2002".
    pub fn parsed_birth_date(&self) -> Option<NaiveDate> {
        let raw = self.birth_date.as_deref()?.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
            return None;
        }
        let titled = titlecase_month(raw);
        for fmt in ["%b %d, %Y", "%B %d, %Y"] {
            if let Ok(d) = NaiveDate::parse_from_str(&titled, fmt) {
                return Some(d);
            }
        }
        // Some payloads ship ISO timestamps instead.
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
            .map(|dt| dt.date())
            .ok()
    }

    pub fn is_active(&self) -> Option<bool> {
        match &self.roster_status {
            Some(Value::String(s)) => Some(s.eq_ignore_ascii_case("active") || s == "1"),
            Some(Value::Number(n)) => Some(n.as_i64() == Some(1)),
            _ => None,
        }
    }
}

fn titlecase_month(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut first = true;
    for ch in raw.chars() {
        if first && ch.is_ascii_alphabetic() {
            out.push(ch.to_ascii_uppercase());
            first = false;
        } else if ch.is_ascii_alphabetic() {
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
            first = ch == ' ';
        }
    }
    out
}

/// Zip a tabular result set (`{name, headers, rowSet}`) into keyed records.
/// Rows whose arity disagrees with the header list are dropped with a
/// warning rather than silently misaligned.
pub fn result_set_records(body: &Value, name: &str) -> Vec<Map<String, Value>> {
    let Some(sets) = body.get("resultSets").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    let Some(set) = sets
        .iter()
        .find(|s| s.get("name").and_then(|n| n.as_str()) == Some(name))
    else {
        return Vec::new();
    };

    let headers: Vec<&str> = set
        .get("headers")
        .and_then(|h| h.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();
    let Some(rows) = set.get("rowSet").and_then(|r| r.as_array()) else {
        return Vec::new();
    };

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(cells) = row.as_array() else {
            continue;
        };
        if cells.len() != headers.len() {
            warn!(
                result_set = name,
                expected = headers.len(),
                got = cells.len(),
                "dropping ragged result-set row"
            );
            continue;
        }
        let mut record = Map::with_capacity(headers.len());
        for (key, cell) in headers.iter().zip(cells) {
            record.insert((*key).to_string(), cell.clone());
        }
        records.push(record);
    }
    records
}

fn extract_team_player_lines(team: &Value) -> Vec<RawPlayerLine> {
    let team_provider_id = match team.get("teamId") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => return Vec::new(),
    };
    let Some(players) = team.get("players").and_then(|p| p.as_array()) else {
        return Vec::new();
    };

    let mut lines = Vec::with_capacity(players.len());
    for player in players {
        let Some(person_id) = player.get("personId").map(id_to_string) else {
            warn!(team_id = %team_provider_id, "player row without personId; skipping");
            continue;
        };
        let first = player.get("firstName").and_then(|v| v.as_str()).unwrap_or("");
        let family = player
            .get("familyName")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let stats = player.get("statistics").cloned().unwrap_or(Value::Null);

        lines.push(RawPlayerLine {
            team_provider_id: team_provider_id.clone(),
            player_provider_id: person_id,
            player_name: format!("{} {}", first, family).trim().to_string(),
            position: non_empty_str(player.get("position")),
            comment: non_empty_str(player.get("comment")),
            minutes: stats
                .get("minutes")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            points: stat_int(&stats, "points"),
            rebounds: stat_int(&stats, "reboundsTotal"),
            assists: stat_int(&stats, "assists"),
            steals: stat_int(&stats, "steals"),
            blocks: stat_int(&stats, "blocks"),
            turnovers: stat_int(&stats, "turnovers"),
            field_goals_made: stat_int(&stats, "fieldGoalsMade"),
            field_goals_attempted: stat_int(&stats, "fieldGoalsAttempted"),
            three_pointers_made: stat_int(&stats, "threePointersMade"),
            three_pointers_attempted: stat_int(&stats, "threePointersAttempted"),
            free_throws_made: stat_int(&stats, "freeThrowsMade"),
            free_throws_attempted: stat_int(&stats, "freeThrowsAttempted"),
            plus_minus: stat_int(&stats, "plusMinusPoints"),
        });
    }
    lines
}

fn id_to_string(v: &Value) -> String {
    match v {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn non_empty_str(v: Option<&Value>) -> Option<String> {
    v.and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn stat_int(stats: &Value, key: &str) -> Option<i32> {
    match stats.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .map(|v| v as i32)
            .or_else(|| n.as_f64().map(|v| v as i32)),
        Some(Value::String(s)) => s.parse::<f64>().ok().map(|v| v as i32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn client_initializes_with_defaults() {
        let client = NbaStatsClient::new(NbaStatsConfig::default()).unwrap();
        assert!(client.cfg.base_url.contains("stats.nba.com"));
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            max_retries: 3,
            delay: Duration::ZERO,
        };
        let calls = AtomicU32::new(0);
        let out: Option<u32> = policy
            .run("always-fails", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("boom"))
            })
            .await;
        assert!(out.is_none());
        // One initial attempt plus max_retries retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let policy = RetryPolicy {
            max_retries: 3,
            delay: Duration::ZERO,
        };
        let calls = AtomicU32::new(0);
        let out = policy
            .run("flaky", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(anyhow!("transient"))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(out, Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn zips_result_set_rows_and_drops_ragged_ones() {
        let body = serde_json::json!({
            "resultSets": [{
                "name": "GameHeader",
                "headers": ["GAME_ID", "HOME_TEAM_ID"],
                "rowSet": [
                    ["0022500306", 1610612738],
                    ["only-one-cell"],
                ],
            }]
        });
        let records = result_set_records(&body, "GameHeader");
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].get("GAME_ID").and_then(|v| v.as_str()),
            Some("0022500306")
        );
        assert!(result_set_records(&body, "LineScore").is_empty());
    }

    #[test]
    fn extracts_player_lines_from_v3_team_node() {
        let team = serde_json::json!({
            "teamId": 1610612738,
            "players": [
                {
                    "personId": 1628369,
                    "firstName": "Jayson",
                    "familyName": "Tatum",
                    "position": "F",
                    "comment": "",
                    "statistics": {
                        "minutes": "36:42",
                        "points": 31,
                        "reboundsTotal": 8,
                        "assists": 5,
                        "steals": 1,
                        "blocks": 0,
                        "turnovers": 2,
                        "fieldGoalsMade": 11,
                        "fieldGoalsAttempted": 22,
                        "threePointersMade": 4,
                        "threePointersAttempted": 10,
                        "freeThrowsMade": 5,
                        "freeThrowsAttempted": 6,
                        "plusMinusPoints": 12
                    }
                },
                { "firstName": "No", "familyName": "Id" }
            ]
        });
        let lines = extract_team_player_lines(&team);
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line.player_provider_id, "1628369");
        assert_eq!(line.player_name, "Jayson Tatum");
        assert_eq!(line.minutes.as_deref(), Some("36:42"));
        assert_eq!(line.points, Some(31));
        assert_eq!(line.position.as_deref(), Some("F"));
        assert_eq!(line.comment, None);
    }

    #[test]
    fn parses_roster_birth_dates() {
        let player = RosterPlayer {
            player_id: 1641732,
            player_name: "Colby Jones".into(),
            position: None,
            height: None,
            weight: None,
            jersey: None,
            birth_date: Some("NOV 08, 2002".into()),
            roster_status: Some(Value::from(1)),
        };
        assert_eq!(
            player.parsed_birth_date(),
            NaiveDate::from_ymd_opt(2002, 11, 8)
        );
        assert_eq!(player.is_active(), Some(true));

        let blank = RosterPlayer {
            birth_date: Some("".into()),
            ..player
        };
        assert_eq!(blank.parsed_birth_date(), None);
    }
}
