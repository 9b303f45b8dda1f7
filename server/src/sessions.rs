//! Browser session state for players between game rounds
//!
//! This module keeps the small amount of per-browser state the game needs:
//! - Which player name a browser last started a game with
//! - The id of the game session handed out for that round
//! - Idle expiry so abandoned browsers do not accumulate
//!
//! Sessions are keyed by an opaque token carried in a cookie. Nothing here
//! touches the score store or the session log.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// State attached to one browser
#[derive(Debug, Clone)]
pub struct BrowserSession {
    /// Opaque token stored in the session cookie
    pub token: String,
    /// Name the player entered when starting their last game
    pub player_name: Option<String>,
    /// Id of the game session started last
    pub game_session_id: Option<String>,
    /// Last time the browser used this session
    pub last_seen: Instant,
}

impl BrowserSession {
    pub fn new(token: String) -> Self {
        Self {
            token,
            player_name: None,
            game_session_id: None,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true when the session has been idle for longer than `ttl`
    pub fn is_timed_out(&self, ttl: Duration) -> bool {
        self.last_seen.elapsed() > ttl
    }
}

/// Result of starting a game round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedSession {
    /// Token the browser must present from now on
    pub token: String,
    /// Fresh game session id to submit with the score
    pub session_id: String,
}

/// Manages all browser sessions
///
/// Tokens and game session ids are random v4 UUIDs. A browser presenting an
/// unknown or expired token simply gets a new session. At most
/// `max_sessions` sessions are kept; when full, the longest idle one is
/// evicted to make room.
pub struct SessionManager {
    sessions: HashMap<String, BrowserSession>,
    ttl: Duration,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Starts a game round for `username`
    ///
    /// Reuses the browser's session when `token` names a live one, otherwise
    /// opens a new session. Either way a new game session id is generated and
    /// stored with the player name.
    pub fn start_session(&mut self, token: Option<&str>, username: &str) -> StartedSession {
        let ttl = self.ttl;
        let token = match token {
            Some(token)
                if self
                    .sessions
                    .get(token)
                    .is_some_and(|session| !session.is_timed_out(ttl)) =>
            {
                token.to_string()
            }
            _ => {
                self.make_room();
                Uuid::new_v4().to_string()
            }
        };

        let session_id = Uuid::new_v4().to_string();
        let session = self
            .sessions
            .entry(token.clone())
            .or_insert_with(|| BrowserSession::new(token.clone()));
        session.player_name = Some(username.to_string());
        session.game_session_id = Some(session_id.clone());
        session.touch();

        info!("Game session {} started for {}", session_id, username);

        StartedSession { token, session_id }
    }

    /// Returns the live session for `token`, marking it as used
    pub fn get(&mut self, token: &str) -> Option<&BrowserSession> {
        let ttl = self.ttl;
        match self.sessions.get_mut(token) {
            Some(session) if !session.is_timed_out(ttl) => {
                session.touch();
                Some(&*session)
            }
            _ => None,
        }
    }

    /// Player name of the live session for `token`
    pub fn player_name(&mut self, token: &str) -> Option<String> {
        self.get(token).and_then(|session| session.player_name.clone())
    }

    /// Frees a slot when the manager is full, dropping expired sessions first
    /// and then the longest idle one
    fn make_room(&mut self) {
        if self.sessions.len() < self.max_sessions {
            return;
        }
        self.check_timeouts();
        if self.sessions.len() < self.max_sessions {
            return;
        }

        let idlest = self
            .sessions
            .values()
            .min_by_key(|session| session.last_seen)
            .map(|session| session.token.clone());
        if let Some(token) = idlest {
            self.sessions.remove(&token);
            warn!(
                "Browser session limit of {} reached, evicted the longest idle session",
                self.max_sessions
            );
        }
    }

    /// Removes sessions idle for longer than the ttl and returns their tokens
    pub fn check_timeouts(&mut self) -> Vec<String> {
        let ttl = self.ttl;
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.is_timed_out(ttl))
            .map(|(token, _)| token.clone())
            .collect();

        for token in &expired {
            self.sessions.remove(token);
        }
        if !expired.is_empty() {
            debug!("Expired {} browser sessions", expired.len());
        }

        expired
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
