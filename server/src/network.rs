//! HTTP layer serving the score API and the game page

use crate::achievements::AchievementCatalog;
use crate::config::{RankingKind, ServerConfig};
use crate::error::ScoreError;
use crate::page;
use crate::query::QueryService;
use crate::ranking::{IndexedRanking, RankProvider, ScanRanking};
use crate::service::{validate_username, ScoreService};
use crate::sessions::SessionManager;
use crate::store::Database;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::HeaderMap;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use log::{debug, info};
use serde::Deserialize;
use shared::{
    HealthResponse, LeaderboardResponse, ProfileResponse, ScorePayload, ScoreUpdateResponse,
    StartSessionRequest, StartSessionResponse, ANONYMOUS_PLAYER_NAME, SESSION_COOKIE_NAME,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::{spawn_blocking, JoinHandle};

/// Longest pause between two sweeps of expired browser sessions
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// State shared by all request handlers
#[derive(Clone)]
pub struct AppState {
    pub scores: ScoreService,
    pub queries: QueryService,
    pub sessions: Arc<RwLock<SessionManager>>,
}

/// Score server owning the store, the services and the HTTP routes
pub struct ScoreServer {
    config: ServerConfig,
    db: Database,
    state: AppState,
}

impl ScoreServer {
    pub fn new(config: ServerConfig) -> Result<Self, ScoreError> {
        let db = Database::open(&config.store)?;
        let ranking: Arc<dyn RankProvider> = match config.ranking {
            RankingKind::Scan => Arc::new(ScanRanking),
            RankingKind::Index => Arc::new(IndexedRanking::load(&db)?),
        };
        info!("Using {} ranking", ranking.name());

        let state = AppState {
            scores: ScoreService::new(db.clone(), Arc::clone(&ranking), config.retry),
            queries: QueryService::new(db.clone(), ranking),
            sessions: Arc::new(RwLock::new(SessionManager::new(
                config.session_ttl,
                config.max_sessions,
            ))),
        };

        Ok(Self { config, db, state })
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Achievement catalog on the server's store
    pub fn achievements(&self) -> AchievementCatalog {
        AchievementCatalog::new(self.db.clone(), self.config.retry)
    }

    pub fn router(&self) -> Router {
        router(self.state())
    }

    /// Spawns task that drops idle browser sessions
    fn spawn_session_sweeper(&self) -> JoinHandle<()> {
        let sessions = Arc::clone(&self.state.sessions);
        let period = sweep_interval(self.config.session_ttl);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;

                let expired = {
                    let mut sessions_guard = sessions.write().await;
                    sessions_guard.check_timeouts()
                };

                for token in expired {
                    debug!("Browser session {} expired", token);
                }
            }
        })
    }

    /// Serves requests on `listener` until `shutdown` completes
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ScoreError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sweeper = self.spawn_session_sweeper();
        let app = self.router();

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ScoreError::Internal(format!("HTTP server failed: {}", e)));

        sweeper.abort();
        info!("Server shutting down");
        result
    }

    /// Binds the configured address and serves until Ctrl+C
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.address).await?;
        info!("Score server listening on {}", listener.local_addr()?);

        self.serve(listener, async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down gracefully...");
            }
        })
        .await?;

        Ok(())
    }
}

/// Builds the routes over `state`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/update-score", post(update_score))
        .route("/api/leaderboard", get(leaderboard))
        .route("/api/profile/:username", get(profile))
        .route("/api/start-session", post(start_session))
        .route("/healthz", get(healthz))
        .with_state(state)
}

fn sweep_interval(ttl: Duration) -> Duration {
    ttl.min(MAX_SWEEP_INTERVAL).max(Duration::from_secs(1))
}

/// Value of the session cookie, if the request carries one
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE_NAME)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn session_cookie(token: &str, ttl: Duration) -> String {
    format!(
        "{}={}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE_NAME,
        token,
        ttl.as_secs()
    )
}

async fn index(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Html<String>, ScoreError> {
    let player_name = match session_token(&headers) {
        Some(token) => state.sessions.write().await.player_name(&token),
        None => None,
    }
    .unwrap_or_else(|| ANONYMOUS_PLAYER_NAME.to_string());

    let queries = state.queries.clone();
    let top_scores = spawn_blocking(move || queries.leaderboard(None)).await??;

    Ok(Html(page::render_index(&player_name, &top_scores)))
}

/// Reads a score submission sent either as JSON or as a form post
async fn read_score_payload(request: Request) -> Result<ScorePayload, ScoreError> {
    let is_form = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));

    if is_form {
        let Form(payload) = Form::<ScorePayload>::from_request(request, &())
            .await
            .map_err(|rejection| ScoreError::Validation(rejection.body_text()))?;
        Ok(payload)
    } else {
        let Json(payload) = Json::<ScorePayload>::from_request(request, &())
            .await
            .map_err(|rejection| ScoreError::Validation(rejection.body_text()))?;
        Ok(payload)
    }
}

async fn update_score(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<ScoreUpdateResponse>, ScoreError> {
    let payload = read_score_payload(request).await?;
    debug!("Score submission for {:?}", payload.username);

    let scores = state.scores.clone();
    let update = spawn_blocking(move || scores.submit(payload)).await??;
    debug!(
        "{} now has {} points, best game {}",
        update.username, update.new_score, update.best_score
    );

    Ok(Json(ScoreUpdateResponse {
        success: true,
        message: "Score updated successfully".to_string(),
        new_score: update.new_score,
        games_played: update.games_played,
        rank: update.rank,
    }))
}

#[derive(Debug, Deserialize)]
struct LeaderboardParams {
    limit: Option<String>,
}

fn parse_limit(raw: Option<&str>) -> Result<Option<i64>, ScoreError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ScoreError::Validation("Invalid limit".to_string())),
    }
}

async fn leaderboard(
    State(state): State<AppState>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Json<LeaderboardResponse>, ScoreError> {
    let limit = parse_limit(params.limit.as_deref())?;

    let queries = state.queries.clone();
    let entries = spawn_blocking(move || queries.leaderboard(limit)).await??;

    Ok(Json(LeaderboardResponse {
        success: true,
        leaderboard: entries,
    }))
}

async fn profile(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<ProfileResponse>, ScoreError> {
    let queries = state.queries.clone();
    let profile = spawn_blocking(move || queries.profile(&username)).await??;

    Ok(Json(ProfileResponse {
        success: true,
        profile,
    }))
}

async fn start_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<StartSessionRequest>, JsonRejection>,
) -> Result<Response, ScoreError> {
    let Json(request) = body.map_err(|rejection| ScoreError::Validation(rejection.body_text()))?;
    let username = validate_username(request.username.as_deref())?;

    let token = session_token(&headers);
    let (started, ttl) = {
        let mut sessions = state.sessions.write().await;
        (sessions.start_session(token.as_deref(), &username), sessions.ttl())
    };

    let cookie = session_cookie(&started.token, ttl);
    let response = StartSessionResponse {
        success: true,
        session_id: started.session_id,
        message: "Game session started".to_string(),
    };

    Ok(([(SET_COOKIE, cookie)], Json(response)).into_response())
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
