use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::script;
use crate::store::{self, PresenceStore};
use crate::tracker::Tracker;

/// Resolves the authenticated user id from request headers. The host
/// application supplies its own; the default reads the `whoisonline_uid`
/// cookie, which rides along with beacon requests without custom headers.
pub type CurrentUserFn = Arc<dyn Fn(&HeaderMap) -> Option<String> + Send + Sync>;

const UID_COOKIE: &str = "whoisonline_uid";

#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<Tracker>,
    pub config: Config,
    pub current_user: CurrentUserFn,
}

impl AppState {
    /// Build state with the store named in the configuration. Fails eagerly
    /// on misconfiguration; steady-state store faults never surface here.
    pub async fn new(config: Config) -> Result<Self> {
        let store = store::from_config(&config).await?;
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Config, store: Arc<dyn PresenceStore>) -> Self {
        let tracker = Arc::new(Tracker::new(&config, store));
        Self {
            tracker,
            config,
            current_user: Arc::new(cookie_user),
        }
    }

    /// Swap in the host application's identity resolver.
    pub fn with_current_user(mut self, resolver: CurrentUserFn) -> Self {
        self.current_user = resolver;
        self
    }
}

fn cookie_user(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == UID_COOKIE && !value.is_empty()).then(|| value.to_string())
    })
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let mut routes: Router<AppState> = Router::new()
        .route("/api/health", get(health))
        .route("/heartbeat", post(heartbeat))
        .route("/offline", post(offline))
        .route("/online", get(online));
    if state.config.activity_only {
        routes = routes.route("/heartbeat.js", get(heartbeat_script));
    }
    let mut app = routes.with_state(state.clone());
    if state.config.auto_hook {
        app = app.layer(middleware::from_fn_with_state(state, auto_track));
    }
    app
}

async fn health() -> &'static str {
    "ok"
}

/// Heartbeat from the browser. Any body (beacon form data, anti-forgery
/// fields) is accepted and ignored; the response is always an empty 200 so
/// fire-and-forget delivery never depends on reading it.
async fn heartbeat(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    if let Some(uid) = (state.current_user)(&headers) {
        state.tracker.track(uid.as_str()).await;
    }
    StatusCode::OK
}

/// Final offline beacon, same contract as `heartbeat`.
async fn offline(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    if let Some(uid) = (state.current_user)(&headers) {
        state.tracker.offline(uid.as_str()).await;
    }
    StatusCode::OK
}

#[derive(Serialize)]
struct OnlineResp {
    count: usize,
    user_ids: Vec<String>,
}

/// Read-side embed surface: who is online right now.
async fn online(State(state): State<AppState>) -> Json<OnlineResp> {
    let user_ids = state.tracker.user_ids().await;
    Json(OnlineResp {
        count: user_ids.len(),
        user_ids,
    })
}

async fn heartbeat_script(State(state): State<AppState>) -> Response {
    let body = script::render(
        "/heartbeat",
        "/offline",
        state.config.heartbeat_interval_ms,
        "",
    );
    (
        [
            (header::CONTENT_TYPE, "application/javascript"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// Auto-hook layer: track the resolved user on every request, after the
/// response is produced so tracking latency never delays the reply body.
async fn auto_track<B>(
    State(state): State<AppState>,
    req: axum::http::Request<B>,
    next: Next<B>,
) -> Response {
    let user = (state.current_user)(req.headers());
    let response = next.run(req).await;
    if let Some(uid) = user {
        state.tracker.track(uid.as_str()).await;
    }
    response
}

/// Run the HTTP server bound to the configured address.
pub async fn run_http_server(config: Config) -> Result<()> {
    let state = AppState::new(config).await?;
    let addr: SocketAddr = state.config.bind.parse()?;
    info!("whoisonline listening on {addr}");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .await?;
    Ok(())
}

// Integration tests live in tests/ directory
