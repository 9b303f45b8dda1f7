//! Command line configuration and the runtime settings derived from it

use crate::error::ScoreError;
use clap::{Parser, ValueEnum};
use rand::Rng;
use std::path::PathBuf;
use std::time::Duration;

/// Path understood as a private in-memory database
pub const IN_MEMORY_PATH: &str = ":memory:";

pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// Rank computation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RankingKind {
    /// Count higher scores in the database on every lookup
    Scan,
    /// Keep an ordered in-memory index of all scores
    Index,
}

/// Command line arguments of the score server
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8000")]
    pub port: u16,

    /// SQLite database file (":memory:" for a throwaway store)
    #[arg(short, long, default_value = "scoreboard.db")]
    pub database: PathBuf,

    /// How long a connection waits on a locked database before giving up
    #[arg(long, default_value = "5000")]
    pub busy_timeout_ms: u64,

    /// Attempts per score update when the database is busy
    #[arg(long, default_value = "5")]
    pub max_retries: u32,

    /// Idle lifetime of a browser session
    #[arg(long, default_value = "86400")]
    pub session_ttl_secs: u64,

    /// Browser sessions kept at once; the longest idle is evicted beyond this
    #[arg(long, default_value = "10000")]
    pub max_sessions: usize,

    /// Rank computation strategy
    #[arg(long, value_enum, default_value = "scan")]
    pub ranking: RankingKind,
}

/// Database connection settings
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_millis(5_000),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY_PATH)
    }

    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == IN_MEMORY_PATH
    }
}

/// Bounded retry schedule for transactions that hit a locked database
///
/// Delays grow exponentially from `base_delay`, are capped at `max_delay`
/// and carry up to half a base delay of random jitter so that competing
/// writers do not retry in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        let jitter_ms = (self.base_delay.as_millis() / 2) as u64;
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Validated server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    pub store: StoreConfig,
    pub retry: RetryPolicy,
    pub session_ttl: Duration,
    pub max_sessions: usize,
    pub ranking: RankingKind,
}

impl ServerConfig {
    /// Settings for an in-memory server, used by tests and local runs
    pub fn in_memory(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            store: StoreConfig::in_memory(),
            retry: RetryPolicy::default(),
            session_ttl: Duration::from_secs(86_400),
            max_sessions: DEFAULT_MAX_SESSIONS,
            ranking: RankingKind::Scan,
        }
    }
}

impl TryFrom<Args> for ServerConfig {
    type Error = ScoreError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        if args.host.trim().is_empty() {
            return Err(ScoreError::Validation("host must not be empty".to_string()));
        }
        if args.max_retries == 0 {
            return Err(ScoreError::Validation(
                "max-retries must be at least 1".to_string(),
            ));
        }
        if args.session_ttl_secs == 0 {
            return Err(ScoreError::Validation(
                "session-ttl-secs must be positive".to_string(),
            ));
        }
        if args.max_sessions == 0 {
            return Err(ScoreError::Validation(
                "max-sessions must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            address: format!("{}:{}", args.host, args.port),
            store: StoreConfig {
                path: args.database,
                busy_timeout: Duration::from_millis(args.busy_timeout_ms),
            },
            retry: RetryPolicy::with_attempts(args.max_retries),
            session_ttl: Duration::from_secs(args.session_ttl_secs),
            max_sessions: args.max_sessions,
            ranking: args.ranking,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["server"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_default_arguments() {
        let args = parse(&[]);
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.port, 8000);
        assert_eq!(args.database, PathBuf::from("scoreboard.db"));
        assert_eq!(args.max_retries, 5);
        assert_eq!(args.ranking, RankingKind::Scan);

        let config = ServerConfig::try_from(args).unwrap();
        assert_eq!(config.address, "127.0.0.1:8000");
        assert_eq!(config.store.busy_timeout, Duration::from_millis(5000));
        assert_eq!(config.session_ttl, Duration::from_secs(86_400));
        assert_eq!(config.max_sessions, DEFAULT_MAX_SESSIONS);
        assert!(!config.store.is_in_memory());
    }

    #[test]
    fn test_custom_arguments() {
        let args = parse(&[
            "-H",
            "0.0.0.0",
            "-p",
            "9090",
            "--database",
            ":memory:",
            "--max-retries",
            "3",
            "--ranking",
            "index",
            "--max-sessions",
            "250",
        ]);
        let config = ServerConfig::try_from(args).unwrap();
        assert_eq!(config.address, "0.0.0.0:9090");
        assert!(config.store.is_in_memory());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.ranking, RankingKind::Index);
        assert_eq!(config.max_sessions, 250);
    }

    #[test]
    fn test_rejects_zero_retries() {
        let args = parse(&["--max-retries", "0"]);
        assert!(matches!(
            ServerConfig::try_from(args),
            Err(ScoreError::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_zero_session_ttl() {
        let args = parse(&["--session-ttl-secs", "0"]);
        assert!(ServerConfig::try_from(args).is_err());
    }

    #[test]
    fn test_rejects_zero_max_sessions() {
        let args = parse(&["--max-sessions", "0"]);
        assert!(matches!(
            ServerConfig::try_from(args),
            Err(ScoreError::Validation(_))
        ));
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        };
        let jitter = Duration::from_millis(5);

        let first = policy.backoff(1);
        assert!(first >= Duration::from_millis(10) && first <= Duration::from_millis(10) + jitter);

        let third = policy.backoff(3);
        assert!(third >= Duration::from_millis(40) && third <= Duration::from_millis(40) + jitter);

        let late = policy.backoff(9);
        assert!(late >= Duration::from_millis(100) && late <= Duration::from_millis(100) + jitter);
    }

    #[test]
    fn test_backoff_without_jitter() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(1));
        assert_eq!(policy.backoff(2), Duration::from_millis(1));
    }
}
