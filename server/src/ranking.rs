//! Rank computation
//!
//! A player's rank is one plus the number of players with a strictly higher
//! score, so equal scores share a rank. [`RankProvider`] hides how that
//! count is obtained: [`ScanRanking`] asks the database on every call,
//! [`IndexedRanking`] keeps an ordered in-memory copy of all scores.

use crate::error::ScoreError;
use crate::store::{all_scores, count_scores_above, Database};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

pub trait RankProvider: Send + Sync {
    /// Rank a player with `score` has among all score records
    fn rank_of(&self, conn: &Connection, score: i64) -> Result<i64, ScoreError>;

    /// Called after a committed score change. `previous` is `None` for a
    /// newly created record.
    fn score_changed(&self, _previous: Option<i64>, _current: i64) {}

    fn name(&self) -> &'static str;
}

/// Counts higher scores with a query on every lookup
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanRanking;

impl RankProvider for ScanRanking {
    fn rank_of(&self, conn: &Connection, score: i64) -> Result<i64, ScoreError> {
        Ok(count_scores_above(conn, score)? + 1)
    }

    fn name(&self) -> &'static str {
        "scan"
    }
}

/// Ordered multiset of scores kept next to the database
///
/// Only valid while this process is the sole writer of the store: changes
/// made by other processes are not observed.
#[derive(Debug, Default)]
pub struct IndexedRanking {
    counts: RwLock<BTreeMap<i64, u64>>,
}

impl IndexedRanking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the index from every score currently stored
    pub fn load(db: &Database) -> Result<Self, ScoreError> {
        let scores = db.read(all_scores)?;
        let index = Self::new();
        {
            let mut counts = index.write_counts();
            for score in scores {
                *counts.entry(score).or_insert(0) += 1;
            }
        }
        Ok(index)
    }

    pub fn len(&self) -> u64 {
        self.read_counts().values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.read_counts().is_empty()
    }

    fn read_counts(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<i64, u64>> {
        self.counts.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_counts(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<i64, u64>> {
        self.counts.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RankProvider for IndexedRanking {
    fn rank_of(&self, _conn: &Connection, score: i64) -> Result<i64, ScoreError> {
        let above: u64 = self
            .read_counts()
            .range((Bound::Excluded(score), Bound::Unbounded))
            .map(|(_, count)| *count)
            .sum();
        Ok(above as i64 + 1)
    }

    fn score_changed(&self, previous: Option<i64>, current: i64) {
        let mut counts = self.write_counts();
        if let Some(previous) = previous {
            if let Some(count) = counts.get_mut(&previous) {
                *count -= 1;
                if *count == 0 {
                    counts.remove(&previous);
                }
            }
        }
        *counts.entry(current).or_insert(0) += 1;
    }

    fn name(&self) -> &'static str {
        "index"
    }
}

/// Competition ranks for scores already sorted from highest to lowest
///
/// Agrees with [`RankProvider::rank_of`] whenever `sorted_scores` is a prefix
/// of the full descending ordering, as a leaderboard page is.
pub fn competition_ranks(sorted_scores: &[i64]) -> Vec<i64> {
    let mut ranks = Vec::with_capacity(sorted_scores.len());
    for (position, score) in sorted_scores.iter().enumerate() {
        let rank = if position > 0 && sorted_scores[position - 1] == *score {
            ranks[position - 1]
        } else {
            position as i64 + 1
        };
        ranks.push(rank);
    }
    ranks
}
