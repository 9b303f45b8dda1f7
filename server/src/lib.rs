//! # Score Server Library
//!
//! This library provides the score-tracking backend for the browser snake
//! game. The game itself runs entirely in the browser; when a round ends the
//! client reports the points it earned and the server keeps every player's
//! running total, the number of games played and their rank.
//!
//! ## Core Responsibilities
//!
//! ### Score Accounting
//! Every finished game adds its points to the player's score record. The
//! lookup-or-create of the player, the increment and the optional game
//! session log entry are committed together, so a crash or a conflicting
//! request can never leave a score that disagrees with the session log.
//!
//! ### Ranking
//! A player's rank is one plus the number of players with a strictly higher
//! score. Equal scores share a rank, and the leaderboard uses the very same
//! rule so the two views always agree.
//!
//! ### Browser Sessions
//! Starting a game hands out a fresh game session id and remembers the
//! player name for the browser through a cookie, so the landing page can
//! greet the player.
//!
//! ## Architecture Design
//!
//! ### Single Writer Connection
//! The store owns one SQLite connection behind a mutex. Request handlers run
//! blocking database work on tokio's blocking pool, and every write opens an
//! `IMMEDIATE` transaction so the database lock is held before any row is
//! read. Other processes sharing the same file wait on the busy timeout and
//! are retried with bounded exponential backoff.
//!
//! ### Stateless Handlers
//! Apart from the in-memory browser session map, request handlers share no
//! state. The database is the single point of synchronization.
//!
//! ## Module Organization
//!
//! ### Store Module (`store`)
//! Schema, transactions with retry, and row-level operations on players and
//! score records.
//!
//! ### Session Log Module (`session_log`)
//! Append-only log of individual games keyed by a unique session id.
//!
//! ### Ranking Module (`ranking`)
//! The `RankProvider` seam with a scanning and an indexed implementation.
//!
//! ### Service Modules (`service`, `query`)
//! Validated score submission on one side, leaderboard and profile reads on
//! the other.
//!
//! ### Achievements Module (`achievements`)
//! Catalog of achievements and the record of which player earned which.
//!
//! ### Network Module (`network`)
//! axum routes, JSON and form decoding, cookies and the background sweeper
//! for idle browser sessions.
//!
//! ## Error Handling
//!
//! All fallible operations return `ScoreError`. Validation problems map to
//! 400, unknown players to 404, replayed game sessions to 409 and a database
//! that stays locked to 503. Storage failures are logged and reported with a
//! generic message.

pub mod achievements;
pub mod config;
pub mod error;
pub mod network;
pub mod page;
pub mod query;
pub mod ranking;
pub mod service;
pub mod session_log;
pub mod sessions;
pub mod store;

pub use config::{Args, RankingKind, RetryPolicy, ServerConfig, StoreConfig};
pub use error::ScoreError;
pub use network::{router, AppState, ScoreServer};
