//! Typed normalization of box-score payloads: player stat lines from the
//! traditional box score and per-quarter team totals from the game summary.

use serde::Deserialize;
use std::collections::HashMap;

/// One player line as extracted from the traditional box score payload,
/// still keyed by provider-native team/player ids.
#[derive(Debug, Clone)]
pub struct RawPlayerLine {
    pub team_provider_id: String,
    pub player_provider_id: String,
    pub player_name: String,
    pub position: Option<String>,
    pub comment: Option<String>,
    pub minutes: Option<String>,
    pub points: Option<i32>,
    pub rebounds: Option<i32>,
    pub assists: Option<i32>,
    pub steals: Option<i32>,
    pub blocks: Option<i32>,
    pub turnovers: Option<i32>,
    pub field_goals_made: Option<i32>,
    pub field_goals_attempted: Option<i32>,
    pub three_pointers_made: Option<i32>,
    pub three_pointers_attempted: Option<i32>,
    pub free_throws_made: Option<i32>,
    pub free_throws_attempted: Option<i32>,
    pub plus_minus: Option<i32>,
}

/// Canonical per-player stat line ready for upsert, keyed by internal ids.
#[derive(Debug, Clone)]
pub struct NormalizedPlayerStat {
    pub player_id: String,
    pub team_internal_id: String,
    pub minutes: Option<f64>,
    pub points: Option<i32>,
    pub rebounds: Option<i32>,
    pub assists: Option<i32>,
    pub steals: Option<i32>,
    pub blocks: Option<i32>,
    pub turnovers: Option<i32>,
    pub field_goals_made: Option<i32>,
    pub field_goals_attempted: Option<i32>,
    pub three_pointers_made: Option<i32>,
    pub three_pointers_attempted: Option<i32>,
    pub free_throws_made: Option<i32>,
    pub free_throws_attempted: Option<i32>,
    pub plus_minus: Option<i32>,
    pub started: bool,
    pub dnp_reason: Option<String>,
}

/// Fold a raw line into the canonical record, given the internal ids the
/// resolver produced for its team and player.
pub fn normalize_player_line(
    raw: &RawPlayerLine,
    team_internal_id: String,
    player_internal_id: String,
) -> NormalizedPlayerStat {
    let minutes = parse_minutes(raw.minutes.as_deref());
    let dnp_reason = match (&minutes, &raw.comment) {
        (None, Some(comment)) if !comment.trim().is_empty() => Some(comment.clone()),
        _ => None,
    };
    let started = raw
        .position
        .as_deref()
        .map(|p| !p.trim().is_empty())
        .unwrap_or(false);

    NormalizedPlayerStat {
        player_id: player_internal_id,
        team_internal_id,
        minutes,
        points: raw.points,
        rebounds: raw.rebounds,
        assists: raw.assists,
        steals: raw.steals,
        blocks: raw.blocks,
        turnovers: raw.turnovers,
        field_goals_made: raw.field_goals_made,
        field_goals_attempted: raw.field_goals_attempted,
        three_pointers_made: raw.three_pointers_made,
        three_pointers_attempted: raw.three_pointers_attempted,
        free_throws_made: raw.free_throws_made,
        free_throws_attempted: raw.free_throws_attempted,
        plus_minus: raw.plus_minus,
        started,
        dnp_reason,
    }
}

/// Parse an `MM:SS` minutes string to decimal minutes, rounded to 2 places.
///
/// The literal empty/zero forms ("", "0", "0:00") mean the player was on
/// the score sheet with zero minutes and convert to exactly 0.0; anything
/// malformed converts to None (not zero) so it reads as "did not play".
pub fn parse_minutes(value: Option<&str>) -> Option<f64> {
    let value = value?;
    if matches!(value, "" | "0" | "0:00") {
        return Some(0.0);
    }
    let mut parts = value.split(':');
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds: i64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes < 0 || !(0..60).contains(&seconds) {
        return None;
    }
    let decimal = minutes as f64 + seconds as f64 / 60.0;
    Some((decimal * 100.0).round() / 100.0)
}

/// Split a display name into (first, last) for the link heuristic.
pub fn split_name(full_name: &str) -> (Option<String>, Option<String>) {
    let mut parts = full_name.split_whitespace();
    let first = parts.next().map(|s| s.to_string());
    let last = parts.next_back().map(|s| s.to_string());
    (first, last)
}

/// One LineScore row from the game summary endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TeamLineScore {
    #[serde(rename = "TEAM_ID")]
    pub team_id: i64,
    #[serde(rename = "PTS_QTR1", default)]
    pub pts_qtr1: Option<f64>,
    #[serde(rename = "PTS_QTR2", default)]
    pub pts_qtr2: Option<f64>,
    #[serde(rename = "PTS_QTR3", default)]
    pub pts_qtr3: Option<f64>,
    #[serde(rename = "PTS_QTR4", default)]
    pub pts_qtr4: Option<f64>,
    #[serde(rename = "PTS_OT1", default)]
    pub pts_ot1: Option<f64>,
    #[serde(rename = "PTS_OT2", default)]
    pub pts_ot2: Option<f64>,
    #[serde(rename = "PTS_OT3", default)]
    pub pts_ot3: Option<f64>,
}

/// Per-quarter points with overtime periods collapsed to one optional value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuarterPoints {
    pub q1: Option<i32>,
    pub q2: Option<i32>,
    pub q3: Option<i32>,
    pub q4: Option<i32>,
    pub ot: Option<i32>,
}

impl QuarterPoints {
    pub fn from_line(line: &TeamLineScore) -> Self {
        QuarterPoints {
            q1: to_int(line.pts_qtr1),
            q2: to_int(line.pts_qtr2),
            q3: to_int(line.pts_qtr3),
            q4: to_int(line.pts_qtr4),
            ot: to_int(line.pts_ot1)
                .filter(|v| *v != 0)
                .or_else(|| to_int(line.pts_ot2).filter(|v| *v != 0))
                .or_else(|| to_int(line.pts_ot3).filter(|v| *v != 0)),
        }
    }

    /// True when at least the first quarter is known; partial rows are not
    /// worth writing over existing data.
    pub fn is_usable(&self) -> bool {
        self.q1.is_some()
    }
}

pub fn to_int(value: Option<f64>) -> Option<i32> {
    value.map(|v| v as i32)
}

/// Possession estimate: FGA + 0.44*FTA - estimated offensive rebounds + TOV,
/// with 0.3 of total rebounds standing in for offensive rebounds.
pub fn possessions_estimate(fga: i64, fta: i64, rebounds: i64, turnovers: i64) -> f64 {
    let estimated_orb = (0.3 * rebounds as f64) as i64;
    fga as f64 + 0.44 * fta as f64 - estimated_orb as f64 + turnovers as f64
}

/// Sum player points per internal team id; lines without points are skipped.
pub fn sum_points_by_team(stats: &[NormalizedPlayerStat]) -> HashMap<String, i64> {
    let mut totals: HashMap<String, i64> = HashMap::new();
    for stat in stats {
        if let Some(points) = stat.points {
            *totals.entry(stat.team_internal_id.clone()).or_insert(0) += points as i64;
        }
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minutes_decimal_form() {
        assert_eq!(parse_minutes(Some("32:30")), Some(32.5));
        assert_eq!(parse_minutes(Some("11:47")), Some(11.78));
        assert_eq!(parse_minutes(Some("48:00")), Some(48.0));
    }

    #[test]
    fn parse_minutes_zero_forms_are_zero() {
        assert_eq!(parse_minutes(Some("")), Some(0.0));
        assert_eq!(parse_minutes(Some("0")), Some(0.0));
        assert_eq!(parse_minutes(Some("0:00")), Some(0.0));
    }

    #[test]
    fn parse_minutes_malformed_is_none() {
        assert_eq!(parse_minutes(Some("abc")), None);
        assert_eq!(parse_minutes(Some("12")), None);
        assert_eq!(parse_minutes(Some("1:2:3")), None);
        assert_eq!(parse_minutes(Some("10:75")), None);
        assert_eq!(parse_minutes(None), None);
    }

    #[test]
    fn split_name_first_last() {
        assert_eq!(
            split_name("LeBron James"),
            (Some("LeBron".into()), Some("James".into()))
        );
        assert_eq!(
            split_name("Luguentz Dort Jr."),
            (Some("Luguentz".into()), Some("Jr.".into()))
        );
        assert_eq!(split_name("Nene"), (Some("Nene".into()), None));
        assert_eq!(split_name(""), (None, None));
    }

    #[test]
    fn dnp_reason_only_without_minutes() {
        let mut raw = sample_line();
        raw.minutes = None;
        raw.comment = Some("DNP - Coach's Decision".into());
        let stat = normalize_player_line(&raw, "BOS".into(), "203935".into());
        assert_eq!(stat.minutes, None);
        assert_eq!(stat.dnp_reason.as_deref(), Some("DNP - Coach's Decision"));

        raw.minutes = Some("12:00".into());
        let stat = normalize_player_line(&raw, "BOS".into(), "203935".into());
        assert_eq!(stat.minutes, Some(12.0));
        assert_eq!(stat.dnp_reason, None);
    }

    #[test]
    fn started_follows_listed_position() {
        let mut raw = sample_line();
        raw.position = Some("G".into());
        assert!(normalize_player_line(&raw, "BOS".into(), "1".into()).started);
        raw.position = None;
        assert!(!normalize_player_line(&raw, "BOS".into(), "1".into()).started);
        raw.position = Some("  ".into());
        assert!(!normalize_player_line(&raw, "BOS".into(), "1".into()).started);
    }

    #[test]
    fn quarter_points_collapse_overtime() {
        let line = TeamLineScore {
            team_id: 1610612738,
            pts_qtr1: Some(31.0),
            pts_qtr2: Some(24.0),
            pts_qtr3: Some(28.0),
            pts_qtr4: Some(30.0),
            pts_ot1: Some(0.0),
            pts_ot2: Some(7.0),
            pts_ot3: None,
        };
        let q = QuarterPoints::from_line(&line);
        assert_eq!(q.q1, Some(31));
        assert_eq!(q.q4, Some(30));
        assert_eq!(q.ot, Some(7));
        assert!(q.is_usable());
    }

    #[test]
    fn decodes_line_score_from_zipped_record() {
        let record = serde_json::json!({
            "TEAM_ID": 1610612748,
            "PTS_QTR1": 28,
            "PTS_QTR2": 25,
            "PTS_QTR3": 31,
            "PTS_QTR4": 22,
            "PTS_OT1": null,
        });
        let line: TeamLineScore = serde_json::from_value(record).unwrap();
        assert_eq!(line.team_id, 1610612748);
        assert_eq!(line.pts_qtr1, Some(28.0));
        assert_eq!(line.pts_ot1, None);
        assert_eq!(line.pts_ot3, None);
    }

    #[test]
    fn quarter_points_unusable_without_first_quarter() {
        let line = TeamLineScore {
            team_id: 1,
            pts_qtr1: None,
            pts_qtr2: None,
            pts_qtr3: None,
            pts_qtr4: None,
            pts_ot1: None,
            pts_ot2: None,
            pts_ot3: None,
        };
        assert!(!QuarterPoints::from_line(&line).is_usable());
    }

    #[test]
    fn possessions_estimate_matches_formula() {
        // 90 + 0.44*20 - int(0.3*45) + 12 = 90 + 8.8 - 13 + 12
        let p = possessions_estimate(90, 20, 45, 12);
        assert!((p - 97.8).abs() < 1e-9);
    }

    #[test]
    fn sums_points_per_team() {
        let mut a = normalize_player_line(&sample_line(), "BOS".into(), "1".into());
        a.points = Some(30);
        let mut b = normalize_player_line(&sample_line(), "BOS".into(), "2".into());
        b.points = Some(25);
        let mut c = normalize_player_line(&sample_line(), "MIA".into(), "3".into());
        c.points = Some(40);
        let mut d = normalize_player_line(&sample_line(), "MIA".into(), "4".into());
        d.points = None;

        let totals = sum_points_by_team(&[a, b, c, d]);
        assert_eq!(totals.get("BOS"), Some(&55));
        assert_eq!(totals.get("MIA"), Some(&40));
    }

    fn sample_line() -> RawPlayerLine {
        RawPlayerLine {
            team_provider_id: "1610612738".into(),
            player_provider_id: "203935".into(),
            player_name: "Marcus Smart".into(),
            position: None,
            comment: None,
            minutes: Some("30:00".into()),
            points: Some(12),
            rebounds: Some(4),
            assists: Some(6),
            steals: Some(2),
            blocks: Some(0),
            turnovers: Some(3),
            field_goals_made: Some(5),
            field_goals_attempted: Some(11),
            three_pointers_made: Some(2),
            three_pointers_attempted: Some(6),
            free_throws_made: Some(0),
            free_throws_attempted: Some(0),
            plus_minus: Some(3),
        }
    }
}
