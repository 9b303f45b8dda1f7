//! SQLite-backed score store
//!
//! Owns the schema and the row-level operations on players and their score
//! records. Writes go through [`Database::transaction`], which opens an
//! `IMMEDIATE` transaction so the database write lock is taken before any
//! row is read. Concurrent writers on other connections or processes wait on
//! the busy timeout and, once that expires, are retried with backoff.

use crate::config::{RetryPolicy, StoreConfig};
use crate::error::ScoreError;
use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::fs;
use std::sync::{Arc, Mutex};

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS players (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE CHECK (length(username) > 0),
    display_name TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS player_scores (
    player_id INTEGER PRIMARY KEY REFERENCES players(id) ON DELETE CASCADE,
    score INTEGER NOT NULL DEFAULT 0 CHECK (score >= 0),
    games_played INTEGER NOT NULL DEFAULT 0 CHECK (games_played >= 0),
    best_score INTEGER NOT NULL DEFAULT 0 CHECK (best_score >= 0),
    created_at INTEGER NOT NULL,
    last_played INTEGER
);
CREATE INDEX IF NOT EXISTS idx_player_scores_score ON player_scores (score DESC);
CREATE TABLE IF NOT EXISTS game_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    player_id INTEGER NOT NULL REFERENCES players(id) ON DELETE CASCADE,
    session_id TEXT NOT NULL UNIQUE,
    points_earned INTEGER NOT NULL CHECK (points_earned > 0),
    duration_seconds INTEGER CHECK (duration_seconds IS NULL OR duration_seconds >= 0),
    fruits_collected INTEGER NOT NULL DEFAULT 0 CHECK (fruits_collected >= 0),
    timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_game_sessions_player
    ON game_sessions (player_id, timestamp DESC);
CREATE TABLE IF NOT EXISTS achievements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL,
    points_required INTEGER,
    games_required INTEGER,
    icon TEXT NOT NULL DEFAULT '🏆'
);
CREATE TABLE IF NOT EXISTS player_achievements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    player_id INTEGER NOT NULL REFERENCES players(id) ON DELETE CASCADE,
    achievement_id INTEGER NOT NULL REFERENCES achievements(id) ON DELETE CASCADE,
    earned_at INTEGER NOT NULL,
    UNIQUE (player_id, achievement_id)
);
";

/// Aggregate score of one player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreRecord {
    pub player_id: i64,
    pub username: String,
    pub score: i64,
    pub games_played: i64,
    pub best_score: i64,
    pub created_at: DateTime<Utc>,
    pub last_played: Option<DateTime<Utc>>,
}

/// Score record after an update, with the score it replaced
///
/// `previous` is `None` when the record was created by the update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreChange {
    pub previous: Option<i64>,
    pub record: ScoreRecord,
}

/// Shared handle to the score database
///
/// A single connection is guarded by a mutex; clones share it.
#[derive(Clone)]
pub struct Database {
    connection: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(config: &StoreConfig) -> Result<Self, ScoreError> {
        let mut connection = if config.is_in_memory() {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).map_err(|e| {
                        ScoreError::Storage(format!(
                            "cannot create database directory {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
            }
            let connection = Connection::open(&config.path)?;
            connection.execute_batch("PRAGMA journal_mode = wal;")?;
            connection.execute_batch("PRAGMA synchronous = normal;")?;
            connection
        };
        connection.execute_batch("PRAGMA foreign_keys = ON;")?;
        connection.busy_timeout(config.busy_timeout)?;
        initialize_schema(&mut connection)?;
        info!("Opened score store at {}", config.path.display());

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    pub fn in_memory() -> Result<Self, ScoreError> {
        Self::open(&StoreConfig::in_memory())
    }

    /// Runs `f` with exclusive use of the connection
    pub fn with_connection<T, F>(&self, f: F) -> Result<T, ScoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, ScoreError>,
    {
        let mut guard = self
            .connection
            .lock()
            .map_err(|_| ScoreError::Internal("score store mutex poisoned".to_string()))?;
        f(&mut guard)
    }

    /// Runs a read-only closure inside a deferred transaction so every query
    /// sees the same snapshot
    pub fn read<T, F>(&self, f: F) -> Result<T, ScoreError>
    where
        F: FnOnce(&Connection) -> Result<T, ScoreError>,
    {
        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }

    /// Runs `op` in an `IMMEDIATE` transaction, retrying while the database
    /// is busy
    ///
    /// Any error from `op` rolls the transaction back. Only
    /// [`ScoreError::Busy`] is retried, up to `policy.max_attempts` attempts
    /// in total.
    pub fn transaction<T, F>(&self, policy: &RetryPolicy, op: F) -> Result<T, ScoreError>
    where
        F: FnMut(&Transaction<'_>) -> Result<T, ScoreError>,
    {
        self.write(policy, op, |_, value| Ok(value))
    }

    /// Like [`Database::transaction`], then runs `after` on the committed
    /// value before the connection is released
    ///
    /// `after` runs once and is never retried. The connection is unlocked
    /// while waiting between attempts, so readers are not held up by the
    /// backoff.
    pub fn write<T, U, F, G>(
        &self,
        policy: &RetryPolicy,
        mut op: F,
        mut after: G,
    ) -> Result<U, ScoreError>
    where
        F: FnMut(&Transaction<'_>) -> Result<T, ScoreError>,
        G: FnMut(&Connection, T) -> Result<U, ScoreError>,
    {
        let mut attempt = 1;
        loop {
            let committed = self.with_connection(|conn| match attempt_transaction(conn, &mut op) {
                Ok(value) => after(conn, value).map(Some),
                Err(err) if err.is_retryable() && attempt < policy.max_attempts => Ok(None),
                Err(err) => Err(err),
            })?;

            match committed {
                Some(value) => return Ok(value),
                None => {
                    let delay = policy.backoff(attempt);
                    debug!(
                        "Transaction attempt {} hit a locked database, retrying in {:?}",
                        attempt, delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// Creates the schema on first use and rejects databases written by a
/// different schema version
fn initialize_schema(connection: &mut Connection) -> Result<(), ScoreError> {
    let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", [], |row| row.get(0))
        .optional()?;
    match version {
        None => {
            tx.execute_batch(SCHEMA)?;
            tx.execute(
                "INSERT INTO store_meta (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
        }
        Some(SCHEMA_VERSION) => {}
        Some(other) => {
            return Err(ScoreError::Storage(format!(
                "unsupported schema version {} (expected {})",
                other, SCHEMA_VERSION
            )));
        }
    }
    tx.commit()?;
    Ok(())
}

fn attempt_transaction<T, F>(conn: &mut Connection, op: &mut F) -> Result<T, ScoreError>
where
    F: FnMut(&Transaction<'_>) -> Result<T, ScoreError>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = op(&tx)?;
    tx.commit()?;
    Ok(value)
}

pub fn to_timestamp(value: &DateTime<Utc>) -> i64 {
    value.timestamp_millis()
}

pub fn from_timestamp(millis: i64) -> Result<DateTime<Utc>, ScoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| ScoreError::Storage(format!("timestamp {} out of range", millis)))
}

/// Returns the id of `username`, creating the player if needed
///
/// New players take their username as display name.
pub fn ensure_player(
    conn: &Connection,
    username: &str,
    now: &DateTime<Utc>,
) -> Result<i64, ScoreError> {
    let created = conn.execute(
        "INSERT INTO players (username, display_name, created_at) VALUES (?1, ?1, ?2)
         ON CONFLICT(username) DO NOTHING",
        params![username, to_timestamp(now)],
    )?;
    if created > 0 {
        info!("Created player {}", username);
    }
    let id = conn.query_row(
        "SELECT id FROM players WHERE username = ?1",
        params![username],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn find_player(conn: &Connection, username: &str) -> Result<Option<i64>, ScoreError> {
    let id = conn
        .query_row(
            "SELECT id FROM players WHERE username = ?1",
            params![username],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Makes sure `player_id` has a score record. Returns true when it was
/// created by this call.
pub fn ensure_score_record(
    conn: &Connection,
    player_id: i64,
    now: &DateTime<Utc>,
) -> Result<bool, ScoreError> {
    let created = conn.execute(
        "INSERT INTO player_scores (player_id, score, games_played, best_score, created_at)
         VALUES (?1, 0, 0, 0, ?2)
         ON CONFLICT(player_id) DO NOTHING",
        params![player_id, to_timestamp(now)],
    )?;
    Ok(created > 0)
}

/// Adds one game worth `points` to the player's score record
///
/// The increment is a single `UPDATE`, evaluated against the row as it is
/// inside the caller's write transaction.
pub fn apply_points(
    conn: &Connection,
    player_id: i64,
    points: i64,
    now: &DateTime<Utc>,
) -> Result<ScoreChange, ScoreError> {
    let created = ensure_score_record(conn, player_id, now)?;
    let before = find_score_by_id(conn, player_id)?.ok_or_else(|| {
        ScoreError::Internal(format!("score record for player {} vanished", player_id))
    })?;
    if before.score.checked_add(points).is_none() || before.games_played.checked_add(1).is_none()
    {
        return Err(ScoreError::Validation(
            "Score would exceed the maximum".to_string(),
        ));
    }

    let updated = conn.execute(
        "UPDATE player_scores
         SET score = score + ?2,
             games_played = games_played + 1,
             best_score = MAX(best_score, ?2),
             last_played = ?3
         WHERE player_id = ?1",
        params![player_id, points, to_timestamp(now)],
    )?;
    if updated != 1 {
        return Err(ScoreError::Internal(format!(
            "score update touched {} rows for player {}",
            updated, player_id
        )));
    }

    let record = find_score_by_id(conn, player_id)?.ok_or_else(|| {
        ScoreError::Internal(format!("score record for player {} vanished", player_id))
    })?;

    Ok(ScoreChange {
        previous: if created { None } else { Some(before.score) },
        record,
    })
}

const SCORE_COLUMNS: &str = "s.player_id, p.username, s.score, s.games_played, s.best_score, \
                             s.created_at, s.last_played";

/// Score row with timestamps still in storage form
struct ScoreRow {
    player_id: i64,
    username: String,
    score: i64,
    games_played: i64,
    best_score: i64,
    created_at: i64,
    last_played: Option<i64>,
}

impl ScoreRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            player_id: row.get(0)?,
            username: row.get(1)?,
            score: row.get(2)?,
            games_played: row.get(3)?,
            best_score: row.get(4)?,
            created_at: row.get(5)?,
            last_played: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<ScoreRecord, ScoreError> {
        Ok(ScoreRecord {
            player_id: self.player_id,
            username: self.username,
            score: self.score,
            games_played: self.games_played,
            best_score: self.best_score,
            created_at: from_timestamp(self.created_at)?,
            last_played: self.last_played.map(from_timestamp).transpose()?,
        })
    }
}

pub fn find_score_by_id(
    conn: &Connection,
    player_id: i64,
) -> Result<Option<ScoreRecord>, ScoreError> {
    let sql = format!(
        "SELECT {} FROM player_scores s JOIN players p ON p.id = s.player_id
         WHERE s.player_id = ?1",
        SCORE_COLUMNS
    );
    conn.query_row(&sql, params![player_id], ScoreRow::from_row)
        .optional()?
        .map(ScoreRow::into_record)
        .transpose()
}

/// Highest scores first; equal scores are ordered by username
pub fn top_scores(conn: &Connection, limit: i64) -> Result<Vec<ScoreRecord>, ScoreError> {
    let sql = format!(
        "SELECT {} FROM player_scores s JOIN players p ON p.id = s.player_id
         ORDER BY s.score DESC, p.username ASC
         LIMIT ?1",
        SCORE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![limit], ScoreRow::from_row)?;
    rows.map(|row| row?.into_record()).collect()
}

/// Number of score records strictly above `score`
pub fn count_scores_above(conn: &Connection, score: i64) -> Result<i64, ScoreError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM player_scores WHERE score > ?1",
        params![score],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn all_scores(conn: &Connection) -> Result<Vec<i64>, ScoreError> {
    let mut stmt = conn.prepare("SELECT score FROM player_scores")?;
    let scores = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(scores)
}
