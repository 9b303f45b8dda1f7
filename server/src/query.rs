//! Read-only leaderboard and profile queries

use crate::error::ScoreError;
use crate::ranking::{competition_ranks, RankProvider};
use crate::session_log::recent_sessions;
use crate::store::{find_player, find_score_by_id, top_scores, Database};
use shared::{
    average_score, format_display_date, LeaderboardEntry, PlayerProfile, RecentSession,
    DEFAULT_LEADERBOARD_LIMIT, MAX_LEADERBOARD_LIMIT, RECENT_SESSION_COUNT,
};
use std::sync::Arc;

/// Resolves the requested leaderboard size
///
/// Defaults to [`DEFAULT_LEADERBOARD_LIMIT`] and is capped at
/// [`MAX_LEADERBOARD_LIMIT`]. Sizes below one are rejected.
pub fn leaderboard_limit(requested: Option<i64>) -> Result<i64, ScoreError> {
    match requested {
        None => Ok(DEFAULT_LEADERBOARD_LIMIT),
        Some(limit) if limit < 1 => Err(ScoreError::Validation(
            "Limit must be at least 1".to_string(),
        )),
        Some(limit) => Ok(limit.min(MAX_LEADERBOARD_LIMIT)),
    }
}

#[derive(Clone)]
pub struct QueryService {
    db: Database,
    ranking: Arc<dyn RankProvider>,
}

impl QueryService {
    pub fn new(db: Database, ranking: Arc<dyn RankProvider>) -> Self {
        Self { db, ranking }
    }

    /// Top scores, best first
    ///
    /// Ranks follow the same tie rule as [`RankProvider::rank_of`], so a
    /// player's rank here matches the one on their profile.
    pub fn leaderboard(&self, limit: Option<i64>) -> Result<Vec<LeaderboardEntry>, ScoreError> {
        let limit = leaderboard_limit(limit)?;
        let records = self.db.read(|conn| top_scores(conn, limit))?;
        let scores: Vec<i64> = records.iter().map(|r| r.score).collect();

        Ok(records
            .into_iter()
            .zip(competition_ranks(&scores))
            .map(|(record, rank)| LeaderboardEntry {
                rank,
                username: record.username,
                score: record.score,
                games_played: record.games_played,
                last_played: record.last_played.as_ref().map(format_display_date),
            })
            .collect())
    }

    /// Profile of `username`, matched the way submissions store names
    pub fn profile(&self, username: &str) -> Result<PlayerProfile, ScoreError> {
        let username = username.trim();
        self.db.read(|conn| {
            let player_id = find_player(conn, username)?
                .ok_or_else(|| ScoreError::NotFound("Player not found".to_string()))?;
            let record = find_score_by_id(conn, player_id)?.ok_or_else(|| {
                ScoreError::NotFound("No score found for this player".to_string())
            })?;
            let rank = self.ranking.rank_of(conn, record.score)?;
            let sessions = recent_sessions(conn, player_id, RECENT_SESSION_COUNT)?;

            Ok(PlayerProfile {
                username: record.username,
                total_score: record.score,
                games_played: record.games_played,
                average_score: average_score(record.score, record.games_played),
                best_score: record.best_score,
                rank,
                last_played: record.last_played.as_ref().map(format_display_date),
                recent_sessions: sessions
                    .into_iter()
                    .map(|session| RecentSession {
                        points: session.points_earned,
                        fruits_collected: session.fruits_collected,
                        duration_seconds: session.duration_seconds,
                        date: format_display_date(&session.timestamp),
                    })
                    .collect(),
            })
        })
    }
}
