use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LEADERBOARD_LIMIT: i64 = 10;
pub const MAX_LEADERBOARD_LIMIT: i64 = 100;
pub const RECENT_SESSION_COUNT: i64 = 5;
pub const DISPLAY_DATE_FORMAT: &str = "%d/%m/%Y %H:%M";
pub const SESSION_COOKIE_NAME: &str = "scoreboard_session";
pub const ANONYMOUS_PLAYER_NAME: &str = "Anonymous player";

/// Integer field as sent by game clients.
///
/// JSON clients send numbers, form posts send text. Both are accepted and
/// normalised by [`IntegerField::to_integer`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum IntegerField {
    Int(i64),
    Float(f64),
    Text(String),
}

impl IntegerField {
    /// Returns the integral value, truncating floats toward zero.
    ///
    /// Floats outside the `i64` range are rejected rather than saturated.
    pub fn to_integer(&self) -> Option<i64> {
        match self {
            IntegerField::Int(value) => Some(*value),
            IntegerField::Float(value) => {
                let truncated = value.trunc();
                // `i64::MAX as f64` rounds up to 2^63, itself out of range.
                if truncated >= i64::MIN as f64 && truncated < i64::MAX as f64 {
                    Some(truncated as i64)
                } else {
                    None
                }
            }
            IntegerField::Text(text) => text.trim().parse().ok(),
        }
    }
}

impl From<i64> for IntegerField {
    fn from(value: i64) -> Self {
        IntegerField::Int(value)
    }
}

/// Body of a score submission, before validation.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ScorePayload {
    pub username: Option<String>,
    pub points: Option<IntegerField>,
    pub session_id: Option<String>,
    pub fruits_collected: Option<IntegerField>,
    pub duration_seconds: Option<IntegerField>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScoreUpdateResponse {
    pub success: bool,
    pub message: String,
    pub new_score: i64,
    pub games_played: i64,
    pub rank: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LeaderboardEntry {
    pub rank: i64,
    pub username: String,
    pub score: i64,
    pub games_played: i64,
    pub last_played: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LeaderboardResponse {
    pub success: bool,
    pub leaderboard: Vec<LeaderboardEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RecentSession {
    pub points: i64,
    pub fruits_collected: i64,
    pub duration_seconds: Option<i64>,
    pub date: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerProfile {
    pub username: String,
    pub total_score: i64,
    pub games_played: i64,
    pub average_score: f64,
    pub best_score: i64,
    pub rank: i64,
    pub last_played: Option<String>,
    pub recent_sessions: Vec<RecentSession>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProfileResponse {
    pub success: bool,
    pub profile: PlayerProfile,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StartSessionRequest {
    pub username: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StartSessionResponse {
    pub success: bool,
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HealthResponse {
    pub status: String,
}

pub fn format_display_date(value: &DateTime<Utc>) -> String {
    value.format(DISPLAY_DATE_FORMAT).to_string()
}

/// Mean points per game, rounded to two decimals. A player with no games
/// averages over one game so the result is always defined.
pub fn average_score(score: i64, games_played: i64) -> f64 {
    let mean = score as f64 / games_played.max(1) as f64;
    (mean * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use chrono::TimeZone;

    #[test]
    fn test_integer_field_from_number() {
        assert_eq!(IntegerField::Int(50).to_integer(), Some(50));
        assert_eq!(IntegerField::Float(50.9).to_integer(), Some(50));
        assert_eq!(IntegerField::Float(-3.7).to_integer(), Some(-3));
        assert_eq!(IntegerField::Float(f64::NAN).to_integer(), None);
        assert_eq!(IntegerField::Float(f64::INFINITY).to_integer(), None);
    }

    #[test]
    fn test_integer_field_rejects_out_of_range_floats() {
        assert_eq!(IntegerField::Float(1e300).to_integer(), None);
        assert_eq!(IntegerField::Float(-1e300).to_integer(), None);
        assert_eq!(IntegerField::Float(9_223_372_036_854_775_807.0).to_integer(), None);
        assert_eq!(IntegerField::Float(1e18).to_integer(), Some(1_000_000_000_000_000_000));
    }

    #[test]
    fn test_integer_field_from_text() {
        assert_eq!(IntegerField::Text("42".to_string()).to_integer(), Some(42));
        assert_eq!(IntegerField::Text(" 7 ".to_string()).to_integer(), Some(7));
        assert_eq!(IntegerField::Text("-5".to_string()).to_integer(), Some(-5));
        assert_eq!(IntegerField::Text("abc".to_string()).to_integer(), None);
        assert_eq!(IntegerField::Text("4.5".to_string()).to_integer(), None);
        assert_eq!(IntegerField::Text(String::new()).to_integer(), None);
    }

    #[test]
    fn test_score_payload_accepts_numbers_and_strings() {
        let payload: ScorePayload =
            serde_json::from_str(r#"{"username":"alice","points":50,"session_id":"s-1"}"#)
                .unwrap();
        assert_eq!(payload.username.as_deref(), Some("alice"));
        assert_eq!(payload.points, Some(IntegerField::Int(50)));
        assert_eq!(payload.session_id.as_deref(), Some("s-1"));

        let payload: ScorePayload =
            serde_json::from_str(r#"{"username":"bob","points":"80"}"#).unwrap();
        assert_eq!(payload.points.and_then(|p| p.to_integer()), Some(80));
        assert!(payload.session_id.is_none());
        assert!(payload.fruits_collected.is_none());
    }

    #[test]
    fn test_score_payload_rejects_non_string_username() {
        let result: Result<ScorePayload, _> =
            serde_json::from_str(r#"{"username":12,"points":5}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_display_date_format() {
        let date = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 59).unwrap();
        assert_eq!(format_display_date(&date), "09/03/2024 07:05");
    }

    #[test]
    fn test_average_score_rounding() {
        assert_approx_eq!(average_score(100, 3), 33.33, 1e-9);
        assert_approx_eq!(average_score(200, 3), 66.67, 1e-9);
        assert_approx_eq!(average_score(50, 1), 50.0, 1e-9);
    }

    #[test]
    fn test_average_score_without_games() {
        assert_approx_eq!(average_score(0, 0), 0.0, 1e-9);
        assert_approx_eq!(average_score(30, 0), 30.0, 1e-9);
    }

    #[test]
    fn test_error_response_shape() {
        let body = serde_json::to_value(ErrorResponse::new("Username required")).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Username required");
    }
}
