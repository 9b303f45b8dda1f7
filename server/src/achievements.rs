//! Achievement catalog and per-player grants
//!
//! Only storage is provided: nothing decides when a player earns an
//! achievement.

use crate::config::RetryPolicy;
use crate::error::ScoreError;
use crate::store::{find_player, from_timestamp, to_timestamp, Database};
use chrono::{DateTime, Utc};
use rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub const DEFAULT_ICON: &str = "🏆";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Achievement {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub points_required: Option<i64>,
    pub games_required: Option<i64>,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewAchievement {
    pub name: String,
    pub description: String,
    pub points_required: Option<i64>,
    pub games_required: Option<i64>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EarnedAchievement {
    pub achievement: Achievement,
    pub earned_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AchievementCatalog {
    db: Database,
    retry: RetryPolicy,
}

fn map_achievement(row: &Row<'_>) -> rusqlite::Result<Achievement> {
    Ok(Achievement {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        points_required: row.get(3)?,
        games_required: row.get(4)?,
        icon: row.get(5)?,
    })
}

fn find_achievement(conn: &Connection, name: &str) -> Result<Option<Achievement>, ScoreError> {
    let achievement = conn
        .query_row(
            "SELECT id, name, description, points_required, games_required, icon
             FROM achievements WHERE name = ?1",
            params![name],
            map_achievement,
        )
        .optional()?;
    Ok(achievement)
}

impl AchievementCatalog {
    pub fn new(db: Database, retry: RetryPolicy) -> Self {
        Self { db, retry }
    }

    pub fn create(&self, new: &NewAchievement) -> Result<Achievement, ScoreError> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(ScoreError::Validation(
                "Achievement name required".to_string(),
            ));
        }
        if new.points_required.is_some_and(|p| p < 0) || new.games_required.is_some_and(|g| g < 0)
        {
            return Err(ScoreError::Validation(
                "Achievement thresholds must not be negative".to_string(),
            ));
        }
        let icon = new.icon.as_deref().unwrap_or(DEFAULT_ICON);

        self.db.transaction(&self.retry, |tx| {
            let inserted = tx.execute(
                "INSERT INTO achievements
                    (name, description, points_required, games_required, icon)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    name,
                    new.description,
                    new.points_required,
                    new.games_required,
                    icon
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.extended_code == SQLITE_CONSTRAINT_UNIQUE =>
                {
                    return Err(ScoreError::AlreadyExists(format!("achievement {}", name)));
                }
                Err(err) => return Err(err.into()),
            }
            Ok(Achievement {
                id: tx.last_insert_rowid(),
                name: name.to_string(),
                description: new.description.clone(),
                points_required: new.points_required,
                games_required: new.games_required,
                icon: icon.to_string(),
            })
        })
    }

    pub fn list(&self) -> Result<Vec<Achievement>, ScoreError> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, description, points_required, games_required, icon
                 FROM achievements ORDER BY name",
            )?;
            let achievements = stmt
                .query_map([], map_achievement)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(achievements)
        })
    }

    /// Grants an achievement to a player. Returns false when the player
    /// already had it.
    pub fn grant(&self, username: &str, achievement_name: &str) -> Result<bool, ScoreError> {
        let now = Utc::now();
        self.db.transaction(&self.retry, |tx| {
            let player_id = find_player(tx, username)?
                .ok_or_else(|| ScoreError::NotFound("Player not found".to_string()))?;
            let achievement = find_achievement(tx, achievement_name)?
                .ok_or_else(|| ScoreError::NotFound("Achievement not found".to_string()))?;
            let granted = tx.execute(
                "INSERT INTO player_achievements (player_id, achievement_id, earned_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(player_id, achievement_id) DO NOTHING",
                params![player_id, achievement.id, to_timestamp(&now)],
            )?;
            Ok(granted > 0)
        })
    }

    /// Achievements held by `username`, most recently earned first
    pub fn earned_by(&self, username: &str) -> Result<Vec<EarnedAchievement>, ScoreError> {
        self.db.read(|conn| {
            let player_id = find_player(conn, username)?
                .ok_or_else(|| ScoreError::NotFound("Player not found".to_string()))?;
            let mut stmt = conn.prepare(
                "SELECT a.id, a.name, a.description, a.points_required, a.games_required, a.icon,
                        pa.earned_at
                 FROM player_achievements pa
                 JOIN achievements a ON a.id = pa.achievement_id
                 WHERE pa.player_id = ?1
                 ORDER BY pa.earned_at DESC, pa.id DESC",
            )?;
            let rows = stmt.query_map(params![player_id], |row| {
                Ok((map_achievement(row)?, row.get::<_, i64>(6)?))
            })?;
            rows.map(|row| {
                let (achievement, earned_at) = row?;
                Ok(EarnedAchievement {
                    achievement,
                    earned_at: from_timestamp(earned_at)?,
                })
            })
            .collect()
        })
    }
}
