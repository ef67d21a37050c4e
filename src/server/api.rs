use super::auth::verify_pin;
use super::AppState;
use crate::domains::git::scan_all_repos;
use crate::domains::worktrees::{RepoSessionRequest, WorktreeSessionRequest};
use crate::infrastructure::events::AppEvent;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;

fn error_json(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[derive(Deserialize)]
pub(crate) struct AuthBody {
    pin: Option<String>,
}

pub async fn authenticate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<AuthBody>,
) -> Response {
    let ip = addr.ip().to_string();
    if state.auth.is_rate_limited(&ip) {
        return error_json(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many attempts. Try again later.",
        );
    }

    let Some(pin) = body.pin.filter(|p| !p.is_empty()) else {
        return error_json(StatusCode::BAD_REQUEST, "PIN required");
    };
    let pin_hash = state.config.read().unwrap().pin_hash.clone();
    let Some(pin_hash) = pin_hash else {
        return error_json(StatusCode::INTERNAL_SERVER_ERROR, "No PIN configured");
    };

    if !verify_pin(&pin, &pin_hash) {
        state.auth.record_failed_attempt(&ip);
        log::warn!("failed PIN attempt from {ip}");
        return error_json(StatusCode::UNAUTHORIZED, "Invalid PIN");
    }

    state.auth.clear_rate_limit(&ip);
    let token = match state.auth.issue_token() {
        Ok(token) => token,
        Err(e) => return error_json(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };
    let cookie = format!(
        "token={token}; HttpOnly; SameSite=Strict; Max-Age={}; Path=/",
        state.auth.ttl().as_secs()
    );
    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "ok": true })),
    )
        .into_response()
}

pub async fn list_sessions(State(state): State<AppState>) -> Response {
    Json(state.sessions.list()).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateSessionBody {
    repo_path: Option<PathBuf>,
    repo_name: Option<String>,
    worktree_path: Option<PathBuf>,
    branch_name: Option<String>,
    #[serde(default)]
    agent_args: Vec<String>,
}

pub async fn create_worktree_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> Response {
    let Some(repo_path) = body.repo_path else {
        return error_json(StatusCode::BAD_REQUEST, "repoPath is required");
    };
    let result = state
        .orchestrator
        .create_worktree_session(WorktreeSessionRequest {
            repo_path,
            repo_name: body.repo_name,
            worktree_path: body.worktree_path,
            branch_name: body.branch_name,
            extra_args: body.agent_args,
        })
        .await;
    match result {
        Ok(summary) => (StatusCode::CREATED, Json(summary)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RepoSessionBody {
    repo_path: Option<PathBuf>,
    repo_name: Option<String>,
    #[serde(default, rename = "continue")]
    resume: bool,
    #[serde(default)]
    agent_args: Vec<String>,
}

pub async fn create_repo_session(
    State(state): State<AppState>,
    Json(body): Json<RepoSessionBody>,
) -> Response {
    let Some(repo_path) = body.repo_path else {
        return error_json(StatusCode::BAD_REQUEST, "repoPath is required");
    };
    match state.orchestrator.create_repo_session(RepoSessionRequest {
        repo_path,
        repo_name: body.repo_name,
        resume: body.resume,
        extra_args: body.agent_args,
    }) {
        Ok(summary) => (StatusCode::CREATED, Json(summary)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn kill_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.sessions.kill(&id) {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RenameBody {
    display_name: Option<String>,
}

pub async fn rename_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RenameBody>,
) -> Response {
    let Some(display_name) = body.display_name.filter(|n| !n.is_empty()) else {
        return error_json(StatusCode::BAD_REQUEST, "displayName is required");
    };
    match state.sessions.update_display_name(&id, &display_name) {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn list_repos(State(state): State<AppState>) -> Response {
    let roots = state.config.read().unwrap().root_dirs.clone();
    Json(scan_all_repos(&roots)).into_response()
}

#[derive(Deserialize)]
pub(crate) struct RepoQuery {
    repo: Option<PathBuf>,
}

pub async fn list_branches(
    State(state): State<AppState>,
    Query(query): Query<RepoQuery>,
) -> Response {
    let Some(repo) = query.repo else {
        return error_json(StatusCode::BAD_REQUEST, "repo query parameter is required");
    };
    Json(state.orchestrator.list_branches(&repo).await).into_response()
}

pub async fn list_worktrees(
    State(state): State<AppState>,
    Query(query): Query<RepoQuery>,
) -> Response {
    Json(state.orchestrator.list_worktrees(query.repo.as_deref()).await).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeleteWorktreeBody {
    worktree_path: Option<PathBuf>,
    repo_path: Option<PathBuf>,
}

pub async fn delete_worktree(
    State(state): State<AppState>,
    Json(body): Json<DeleteWorktreeBody>,
) -> Response {
    let (Some(worktree_path), Some(repo_path)) = (body.worktree_path, body.repo_path) else {
        return error_json(
            StatusCode::BAD_REQUEST,
            "worktreePath and repoPath are required",
        );
    };
    match state
        .orchestrator
        .delete_worktree(&worktree_path, &repo_path)
        .await
    {
        Ok(()) => {
            state.events.emit(AppEvent::WorktreesChanged);
            Json(json!({ "ok": true })).into_response()
        }
        Err(e) => e.into_response(),
    }
}

pub async fn list_roots(State(state): State<AppState>) -> Response {
    Json(state.config.read().unwrap().root_dirs.clone()).into_response()
}

#[derive(Deserialize)]
pub(crate) struct RootBody {
    path: Option<PathBuf>,
}

pub async fn add_root(State(state): State<AppState>, Json(body): Json<RootBody>) -> Response {
    let Some(path) = body.path else {
        return error_json(StatusCode::BAD_REQUEST, "path is required");
    };
    let roots = {
        let mut cfg = state.config.write().unwrap();
        if cfg.root_dirs.contains(&path) {
            return error_json(StatusCode::CONFLICT, "Root already exists");
        }
        cfg.root_dirs.push(path);
        if let Err(e) = cfg.save(&state.config_path) {
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
        cfg.root_dirs.clone()
    };
    state.watcher.rebuild(&roots);
    state.events.emit(AppEvent::WorktreesChanged);
    (StatusCode::CREATED, Json(roots)).into_response()
}

pub async fn remove_root(State(state): State<AppState>, Json(body): Json<RootBody>) -> Response {
    let Some(path) = body.path else {
        return error_json(StatusCode::BAD_REQUEST, "path is required");
    };
    let roots = {
        let mut cfg = state.config.write().unwrap();
        cfg.root_dirs.retain(|root| root != &path);
        if let Err(e) = cfg.save(&state.config_path) {
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
        cfg.root_dirs.clone()
    };
    state.watcher.rebuild(&roots);
    state.events.emit(AppEvent::WorktreesChanged);
    Json(roots).into_response()
}
