//! Score update service
//!
//! Applies the points of one finished game to a player's aggregate score.
//! Player lookup-or-create, the score increment and the session log entry
//! share one write transaction: either all of them are committed or none.

use crate::config::RetryPolicy;
use crate::error::ScoreError;
use crate::ranking::RankProvider;
use crate::session_log::{record_session, NewSession};
use crate::store::{apply_points, ensure_player, Database};
use chrono::Utc;
use log::info;
use shared::{IntegerField, ScorePayload};
use std::sync::Arc;

/// Longest accepted username, in characters
pub const MAX_USERNAME_LENGTH: usize = 150;
/// Longest accepted session id, in characters
pub const MAX_SESSION_ID_LENGTH: usize = 100;

/// Validated score submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreSubmission {
    pub username: String,
    pub points: i64,
    pub session_id: Option<String>,
    pub fruits_collected: Option<i64>,
    pub duration_seconds: Option<i64>,
}

impl ScoreSubmission {
    pub fn new(username: impl Into<String>, points: i64) -> Self {
        Self {
            username: username.into(),
            points,
            session_id: None,
            fruits_collected: None,
            duration_seconds: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_details(mut self, fruits_collected: Option<i64>, duration_seconds: Option<i64>) -> Self {
        self.fruits_collected = fruits_collected;
        self.duration_seconds = duration_seconds;
        self
    }

    /// Validates a raw payload
    ///
    /// A missing `points` counts as zero and is rejected like any other
    /// non-positive value. An empty `session_id` means no session.
    pub fn from_payload(payload: ScorePayload) -> Result<Self, ScoreError> {
        let username = validate_username(payload.username.as_deref())?;

        let points = match &payload.points {
            None => 0,
            Some(field) => field
                .to_integer()
                .ok_or_else(|| ScoreError::Validation("Invalid points".to_string()))?,
        };
        if points <= 0 {
            return Err(ScoreError::Validation(
                "Points must be positive".to_string(),
            ));
        }

        let session_id = payload
            .session_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        if let Some(id) = &session_id {
            if id.chars().count() > MAX_SESSION_ID_LENGTH {
                return Err(ScoreError::Validation(format!(
                    "Session id must be at most {} characters",
                    MAX_SESSION_ID_LENGTH
                )));
            }
        }

        Ok(Self {
            username,
            points,
            session_id,
            fruits_collected: optional_count("fruits_collected", payload.fruits_collected.as_ref())?,
            duration_seconds: optional_count("duration_seconds", payload.duration_seconds.as_ref())?,
        })
    }
}

/// Trims and checks a username supplied by a client
pub fn validate_username(username: Option<&str>) -> Result<String, ScoreError> {
    let username = username.map(str::trim).unwrap_or_default();
    if username.is_empty() {
        return Err(ScoreError::Validation("Username required".to_string()));
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(ScoreError::Validation(format!(
            "Username must be at most {} characters",
            MAX_USERNAME_LENGTH
        )));
    }
    Ok(username.to_string())
}

fn optional_count(field: &str, value: Option<&IntegerField>) -> Result<Option<i64>, ScoreError> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value.to_integer() {
        Some(count) if count >= 0 => Ok(Some(count)),
        _ => Err(ScoreError::Validation(format!("Invalid {}", field))),
    }
}

/// Aggregate returned after a successful submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreUpdate {
    pub username: String,
    pub new_score: i64,
    pub games_played: i64,
    pub best_score: i64,
    pub rank: i64,
}

#[derive(Clone)]
pub struct ScoreService {
    db: Database,
    ranking: Arc<dyn RankProvider>,
    retry: RetryPolicy,
}

impl ScoreService {
    pub fn new(db: Database, ranking: Arc<dyn RankProvider>, retry: RetryPolicy) -> Self {
        Self { db, ranking, retry }
    }

    /// Validates `payload` and submits it
    pub fn submit(&self, payload: ScorePayload) -> Result<ScoreUpdate, ScoreError> {
        let submission = ScoreSubmission::from_payload(payload)?;
        self.submit_score(&submission)
    }

    /// Applies one game's points to the player's score
    ///
    /// The connection stays locked from the start of the committing attempt
    /// until the rank has been read, so the returned rank reflects this
    /// update and no later one from this process.
    pub fn submit_score(&self, submission: &ScoreSubmission) -> Result<ScoreUpdate, ScoreError> {
        if submission.points <= 0 {
            return Err(ScoreError::Validation(
                "Points must be positive".to_string(),
            ));
        }
        let now = Utc::now();

        self.db.write(
            &self.retry,
            |tx| {
                let player_id = ensure_player(tx, &submission.username, &now)?;
                let change = apply_points(tx, player_id, submission.points, &now)?;
                if let Some(session_id) = &submission.session_id {
                    record_session(
                        tx,
                        player_id,
                        &NewSession {
                            session_id: session_id.clone(),
                            points_earned: submission.points,
                            fruits_collected: submission.fruits_collected,
                            duration_seconds: submission.duration_seconds,
                            timestamp: now,
                        },
                    )?;
                }
                Ok(change)
            },
            |conn, change| {
                self.ranking
                    .score_changed(change.previous, change.record.score);
                let rank = self.ranking.rank_of(conn, change.record.score)?;

                info!(
                    "Score updated for {}: +{} -> {} ({} games, rank {})",
                    change.record.username,
                    submission.points,
                    change.record.score,
                    change.record.games_played,
                    rank
                );

                Ok(ScoreUpdate {
                    username: change.record.username,
                    new_score: change.record.score,
                    games_played: change.record.games_played,
                    best_score: change.record.best_score,
                    rank,
                })
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::{IndexedRanking, ScanRanking};
    use crate::session_log::session_count;
    use crate::store::{find_player, find_score_by_id};

    fn service() -> ScoreService {
        ScoreService::new(
            Database::in_memory().unwrap(),
            Arc::new(ScanRanking),
            RetryPolicy::default(),
        )
    }

    fn payload(username: Option<&str>, points: Option<IntegerField>) -> ScorePayload {
        ScorePayload {
            username: username.map(str::to_string),
            points,
            ..ScorePayload::default()
        }
    }

    #[test]
    fn test_payload_validation() {
        let ok = ScoreSubmission::from_payload(payload(Some(" alice "), Some(50.into()))).unwrap();
        assert_eq!(ok, ScoreSubmission::new("alice", 50));

        let text = ScoreSubmission::from_payload(payload(
            Some("bob"),
            Some(IntegerField::Text("12".into())),
        ))
        .unwrap();
        assert_eq!(text.points, 12);

        for bad in [
            payload(None, Some(5.into())),
            payload(Some(""), Some(5.into())),
            payload(Some("   "), Some(5.into())),
            payload(Some("alice"), None),
            payload(Some("alice"), Some(0.into())),
            payload(Some("alice"), Some((-3).into())),
            payload(Some("alice"), Some(IntegerField::Text("lots".into()))),
        ] {
            assert!(
                matches!(ScoreSubmission::from_payload(bad.clone()), Err(ScoreError::Validation(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_payload_length_limits() {
        let long_name = "x".repeat(MAX_USERNAME_LENGTH + 1);
        assert!(ScoreSubmission::from_payload(payload(Some(&long_name), Some(1.into()))).is_err());

        let mut long_session = payload(Some("alice"), Some(1.into()));
        long_session.session_id = Some("s".repeat(MAX_SESSION_ID_LENGTH + 1));
        assert!(ScoreSubmission::from_payload(long_session).is_err());
    }

    #[test]
    fn test_payload_session_and_details() {
        let mut raw = payload(Some("alice"), Some(5.into()));
        raw.session_id = Some(String::new());
        raw.fruits_collected = Some(IntegerField::Text("3".into()));
        raw.duration_seconds = Some(40.into());
        let submission = ScoreSubmission::from_payload(raw).unwrap();
        assert_eq!(submission.session_id, None);
        assert_eq!(submission.fruits_collected, Some(3));
        assert_eq!(submission.duration_seconds, Some(40));

        let mut raw = payload(Some("alice"), Some(5.into()));
        raw.fruits_collected = Some((-1).into());
        assert!(ScoreSubmission::from_payload(raw).is_err());
    }

    #[test]
    fn test_first_submission_creates_player() {
        let service = service();
        let update = service
            .submit_score(&ScoreSubmission::new("alice", 50))
            .unwrap();
        assert_eq!(update.new_score, 50);
        assert_eq!(update.games_played, 1);
        assert_eq!(update.best_score, 50);
        assert_eq!(update.rank, 1);
    }

    #[test]
    fn test_sequential_submissions_accumulate() {
        let service = service();
        let points = [5, 20, 1, 13, 7];
        let mut last = None;
        for p in points {
            last = Some(service.submit_score(&ScoreSubmission::new("alice", p)).unwrap());
        }
        let last = last.unwrap();
        assert_eq!(last.new_score, points.iter().sum::<i64>());
        assert_eq!(last.games_played, points.len() as i64);
        assert_eq!(last.best_score, 20);
    }

    #[test]
    fn test_rank_after_second_player() {
        let service = service();
        let alice = service.submit_score(&ScoreSubmission::new("alice", 50)).unwrap();
        assert_eq!(alice.rank, 1);
        let bob = service.submit_score(&ScoreSubmission::new("bob", 80)).unwrap();
        assert_eq!(bob.rank, 1);
        let carol = service.submit_score(&ScoreSubmission::new("carol", 50)).unwrap();
        assert_eq!(carol.rank, 2);
    }

    #[test]
    fn test_session_is_logged_with_points() {
        let service = service();
        service
            .submit_score(
                &ScoreSubmission::new("alice", 30)
                    .with_session("game-1")
                    .with_details(Some(6), Some(120)),
            )
            .unwrap();

        service
            .db
            .read(|conn| {
                let id = find_player(conn, "alice")?.unwrap();
                assert_eq!(session_count(conn, id)?, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_duplicate_session_rolls_back_whole_update() {
        let service = service();
        service
            .submit_score(&ScoreSubmission::new("alice", 30).with_session("game-1"))
            .unwrap();

        let second = service.submit_score(&ScoreSubmission::new("alice", 30).with_session("game-1"));
        assert!(matches!(second, Err(ScoreError::DuplicateSession(_))));

        service
            .db
            .read(|conn| {
                let id = find_player(conn, "alice")?.unwrap();
                let record = find_score_by_id(conn, id)?.unwrap();
                assert_eq!(record.score, 30);
                assert_eq!(record.games_played, 1);
                assert_eq!(session_count(conn, id)?, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_duplicate_session_for_new_player_leaves_no_trace() {
        let service = service();
        service
            .submit_score(&ScoreSubmission::new("alice", 30).with_session("game-1"))
            .unwrap();
        let result = service.submit_score(&ScoreSubmission::new("bob", 10).with_session("game-1"));
        assert!(result.is_err());

        let bob = service.db.read(|conn| find_player(conn, "bob")).unwrap();
        assert_eq!(bob, None);
    }

    #[test]
    fn test_huge_float_points_are_rejected() {
        let raw = payload(Some("alice"), Some(IntegerField::Float(1e300)));
        assert!(matches!(
            ScoreSubmission::from_payload(raw),
            Err(ScoreError::Validation(_))
        ));
    }

    #[test]
    fn test_overflowing_score_is_rejected_and_record_stays_usable() {
        let service = service();
        let first = service
            .submit(payload(
                Some("alice"),
                Some(IntegerField::Text(i64::MAX.to_string())),
            ))
            .unwrap();
        assert_eq!(first.new_score, i64::MAX);

        for points in [1, 5] {
            assert!(matches!(
                service.submit_score(&ScoreSubmission::new("alice", points)),
                Err(ScoreError::Validation(_))
            ));
        }

        service
            .db
            .read(|conn| {
                let id = find_player(conn, "alice")?.unwrap();
                let record = find_score_by_id(conn, id)?.unwrap();
                assert_eq!(record.score, i64::MAX);
                assert_eq!(record.games_played, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_index_ranking_follows_updates() {
        let db = Database::in_memory().unwrap();
        let index = Arc::new(IndexedRanking::load(&db).unwrap());
        let service = ScoreService::new(db, index.clone(), RetryPolicy::default());

        service.submit_score(&ScoreSubmission::new("alice", 50)).unwrap();
        let bob = service.submit_score(&ScoreSubmission::new("bob", 80)).unwrap();
        assert_eq!(bob.rank, 1);
        let alice = service.submit_score(&ScoreSubmission::new("alice", 40)).unwrap();
        assert_eq!(alice.new_score, 90);
        assert_eq!(alice.rank, 1);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_failed_update_does_not_touch_index() {
        let db = Database::in_memory().unwrap();
        let index = Arc::new(IndexedRanking::new());
        let service = ScoreService::new(db, index.clone(), RetryPolicy::default());

        service
            .submit_score(&ScoreSubmission::new("alice", 10).with_session("s"))
            .unwrap();
        let _ = service.submit_score(&ScoreSubmission::new("bob", 10).with_session("s"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_concurrent_submissions_do_not_lose_updates() {
        let service = service();
        let handles: Vec<_> = (1..=16)
            .map(|points| {
                let service = service.clone();
                std::thread::spawn(move || {
                    service
                        .submit_score(&ScoreSubmission::new("racer", points))
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        service
            .db
            .read(|conn| {
                let id = find_player(conn, "racer")?.unwrap();
                let record = find_score_by_id(conn, id)?.unwrap();
                assert_eq!(record.games_played, 16);
                assert_eq!(record.score, (1..=16).sum::<i64>());
                assert_eq!(record.best_score, 16);
                Ok(())
            })
            .unwrap();
    }
}
