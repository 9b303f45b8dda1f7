//! Append-only log of finished game sessions
//!
//! Entries are written only from inside the score update transaction, so a
//! rejected entry aborts the score change it belongs to.

use crate::error::ScoreError;
use crate::store::{from_timestamp, to_timestamp};
use chrono::{DateTime, Utc};
use rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE;
use rusqlite::{params, Connection};

/// Session outcome to append to the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub session_id: String,
    pub points_earned: i64,
    pub fruits_collected: Option<i64>,
    pub duration_seconds: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

/// Logged session outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: String,
    pub points_earned: i64,
    pub fruits_collected: i64,
    pub duration_seconds: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

/// Appends a session for `player_id`
///
/// Fails with [`ScoreError::DuplicateSession`] when the session id is
/// already logged, whoever it belongs to.
pub fn record_session(
    conn: &Connection,
    player_id: i64,
    session: &NewSession,
) -> Result<(), ScoreError> {
    let result = conn.execute(
        "INSERT INTO game_sessions
            (player_id, session_id, points_earned, duration_seconds, fruits_collected, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            player_id,
            session.session_id,
            session.points_earned,
            session.duration_seconds,
            session.fruits_collected.unwrap_or(0),
            to_timestamp(&session.timestamp),
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.extended_code == SQLITE_CONSTRAINT_UNIQUE =>
        {
            Err(ScoreError::DuplicateSession(session.session_id.clone()))
        }
        Err(err) => Err(err.into()),
    }
}

/// Most recent sessions of a player, newest first
pub fn recent_sessions(
    conn: &Connection,
    player_id: i64,
    limit: i64,
) -> Result<Vec<SessionRecord>, ScoreError> {
    let mut stmt = conn.prepare(
        "SELECT session_id, points_earned, fruits_collected, duration_seconds, timestamp
         FROM game_sessions
         WHERE player_id = ?1
         ORDER BY timestamp DESC, id DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![player_id, limit], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, Option<i64>>(3)?,
            row.get::<_, i64>(4)?,
        ))
    })?;

    rows.map(|row| {
        let (session_id, points_earned, fruits_collected, duration_seconds, timestamp) = row?;
        Ok(SessionRecord {
            session_id,
            points_earned,
            fruits_collected,
            duration_seconds,
            timestamp: from_timestamp(timestamp)?,
        })
    })
    .collect()
}

pub fn session_count(conn: &Connection, player_id: i64) -> Result<i64, ScoreError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM game_sessions WHERE player_id = ?1",
        params![player_id],
        |row| row.get(0),
    )?;
    Ok(count)
}
