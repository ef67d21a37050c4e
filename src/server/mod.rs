pub mod api;
pub mod auth;
pub mod reconnect;
pub mod ws;

use crate::config::{Config, SharedConfig};
use crate::domains::sessions::SessionManager;
use crate::domains::worktrees::{WorktreeOrchestrator, WorktreeWatcher};
use crate::errors::AgentportError;
use crate::infrastructure::events::EventBus;
use crate::meta::MetaStore;
use auth::AuthState;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: SharedConfig,
    pub config_path: PathBuf,
    pub sessions: SessionManager,
    pub orchestrator: WorktreeOrchestrator,
    pub watcher: Arc<WorktreeWatcher>,
    pub events: EventBus,
    pub auth: Arc<AuthState>,
}

impl AppState {
    pub fn new(config: Config, config_path: PathBuf) -> Self {
        let events = EventBus::new();
        let meta = MetaStore::new(&config_path);
        let auth = Arc::new(AuthState::new(config.cookie_ttl_duration()));
        let config = config.into_shared();
        let sessions = SessionManager::new(meta.clone(), events.clone());
        let orchestrator = WorktreeOrchestrator::new(config.clone(), sessions.clone(), meta);
        let watcher = Arc::new(WorktreeWatcher::new(events.clone()));
        Self {
            config,
            config_path,
            sessions,
            orchestrator,
            watcher,
            events,
            auth,
        }
    }
}

impl IntoResponse for AgentportError {
    fn into_response(self) -> Response {
        let status = match &self {
            AgentportError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            AgentportError::RepoSessionExists { .. } | AgentportError::WorktreeConflict { .. } => {
                StatusCode::CONFLICT
            }
            AgentportError::InvalidWorktreePath { .. } | AgentportError::InvalidInput { .. } => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut body = json!({ "error": self.to_string() });
        if let AgentportError::RepoSessionExists { session_id } = &self {
            body["sessionId"] = json!(session_id);
        }
        (status, Json(body)).into_response()
    }
}

/// Cookie-token gate for every route except `/auth`. WebSocket routes pass
/// through here too, so a bad token is refused before the upgrade.
async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(auth::token_from_cookies);
    match token {
        Some(token) if state.auth.is_valid(&token) => next.run(request).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized" })),
        )
            .into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/sessions",
            get(api::list_sessions).post(api::create_worktree_session),
        )
        .route("/sessions/repo", post(api::create_repo_session))
        .route(
            "/sessions/:id",
            axum::routing::delete(api::kill_session).patch(api::rename_session),
        )
        .route("/repos", get(api::list_repos))
        .route("/branches", get(api::list_branches))
        .route(
            "/worktrees",
            get(api::list_worktrees).delete(api::delete_worktree),
        )
        .route(
            "/roots",
            get(api::list_roots)
                .post(api::add_root)
                .delete(api::remove_root),
        )
        .route("/ws/events", get(ws::events_ws))
        .route("/ws/:id", get(ws::terminal_ws))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/auth", post(api::authenticate))
        .merge(protected)
        .with_state(state)
}

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let (host, port, roots) = {
        let cfg = state.config.read().unwrap();
        (cfg.host.clone(), cfg.port, cfg.root_dirs.clone())
    };
    state.watcher.rebuild(&roots);

    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    log::info!("listening on http://{host}:{port}");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::connect_info::ConnectInfo;
    use axum::http::Request as HttpRequest;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const PIN: &str = "4242";

    fn test_state() -> (TempDir, AppState) {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.json");
        let config = Config {
            pin_hash: Some(auth::hash_pin(PIN).unwrap()),
            agent_command: "sleep".into(),
            agent_args: vec!["30".into()],
            ..Config::default()
        };
        (tmp, AppState::new(config, config_path))
    }

    fn request(method: &str, uri: &str, body: Option<serde_json::Value>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let mut request = builder.body(body).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
        request
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn login(state: &AppState) -> String {
        let response = router(state.clone())
            .oneshot(request("POST", "/auth", Some(json!({ "pin": PIN }))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(cookie.contains("HttpOnly"));
        cookie.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn protected_routes_reject_missing_token() {
        let (_tmp, state) = test_state();
        for uri in ["/sessions", "/repos", "/worktrees", "/roots", "/ws/events"] {
            let response = router(state.clone())
                .oneshot(request("GET", uri, None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn auth_cookie_unlocks_session_listing() {
        let (_tmp, state) = test_state();
        let cookie = login(&state).await;

        let mut req = request("GET", "/sessions", None);
        req.headers_mut()
            .insert(header::COOKIE, cookie.parse().unwrap());
        let response = router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!([]));
    }

    #[tokio::test]
    async fn wrong_pin_is_rejected_then_rate_limited() {
        let (_tmp, state) = test_state();
        for _ in 0..auth::MAX_ATTEMPTS {
            let response = router(state.clone())
                .oneshot(request("POST", "/auth", Some(json!({ "pin": "0000" }))))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        // Even the right PIN is refused while locked out
        let response = router(state)
            .oneshot(request("POST", "/auth", Some(json!({ "pin": PIN }))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn missing_pin_is_bad_request() {
        let (_tmp, state) = test_state();
        let response = router(state)
            .oneshot(request("POST", "/auth", Some(json!({}))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_session_delete_is_not_found() {
        let (_tmp, state) = test_state();
        let cookie = login(&state).await;
        let mut req = request("DELETE", "/sessions/ffffffffffffffff", None);
        req.headers_mut()
            .insert(header::COOKIE, cookie.parse().unwrap());
        let response = router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_session_requires_repo_path() {
        let (_tmp, state) = test_state();
        let cookie = login(&state).await;
        let mut req = request("POST", "/sessions", Some(json!({})));
        req.headers_mut()
            .insert(header::COOKIE, cookie.parse().unwrap());
        let response = router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn roots_round_trip_and_reject_duplicates() {
        let (tmp, state) = test_state();
        let cookie = login(&state).await;
        let root = tmp.path().join("code");
        std::fs::create_dir_all(&root).unwrap();

        let mut req = request("POST", "/roots", Some(json!({ "path": &root })));
        req.headers_mut()
            .insert(header::COOKIE, cookie.parse().unwrap());
        let response = router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let mut req = request("POST", "/roots", Some(json!({ "path": &root })));
        req.headers_mut()
            .insert(header::COOKIE, cookie.parse().unwrap());
        let response = router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let mut req = request("GET", "/roots", None);
        req.headers_mut()
            .insert(header::COOKIE, cookie.parse().unwrap());
        let response = router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(body_json(response).await, json!([&root]));
        // The config file on disk reflects the change
        let saved = Config::load(&state.config_path).unwrap();
        assert_eq!(saved.root_dirs, vec![root]);
    }

    #[tokio::test]
    async fn repo_session_conflict_carries_session_id() {
        let (tmp, state) = test_state();
        let cookie = login(&state).await;
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(repo.join(".git")).unwrap();

        let mut req = request("POST", "/sessions/repo", Some(json!({ "repoPath": &repo })));
        req.headers_mut()
            .insert(header::COOKIE, cookie.parse().unwrap());
        let response = router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;

        let mut req = request("POST", "/sessions/repo", Some(json!({ "repoPath": &repo })));
        req.headers_mut()
            .insert(header::COOKIE, cookie.parse().unwrap());
        let response = router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let conflict = body_json(response).await;
        assert_eq!(conflict["sessionId"], created["id"]);

        state
            .sessions
            .kill(created["id"].as_str().unwrap())
            .unwrap();
    }
}
