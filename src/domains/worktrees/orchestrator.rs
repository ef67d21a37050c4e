use crate::config::SharedConfig;
use crate::domains::git::{
    ensure_gitignore, git_succeeds, is_valid_worktree_path, linked_worktrees, run_git,
    sanitize_branch_dir_name, scan_all_repos, RepoEntry, WORKTREE_DIRS,
};
use crate::domains::sessions::{CreateSessionParams, SessionKind, SessionManager, SessionSummary};
use crate::errors::AgentportError;
use crate::meta::MetaStore;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Request to start an agent in a worktree. Without `worktree_path` a new
/// worktree is created (or an existing checkout of the branch is reused);
/// with it, the named worktree is resumed.
#[derive(Debug, Clone, Default)]
pub struct WorktreeSessionRequest {
    pub repo_path: PathBuf,
    pub repo_name: Option<String>,
    pub worktree_path: Option<PathBuf>,
    pub branch_name: Option<String>,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RepoSessionRequest {
    pub repo_path: PathBuf,
    pub repo_name: Option<String>,
    pub resume: bool,
    pub extra_args: Vec<String>,
}

/// A worktree as shown in listings, enriched with persisted metadata.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeInfo {
    pub name: String,
    pub path: PathBuf,
    pub repo_name: String,
    pub repo_path: PathBuf,
    pub root: PathBuf,
    pub display_name: String,
    pub last_activity: String,
    pub branch_name: String,
}

/// Ties the session manager to git worktree plumbing: creating worktrees,
/// routing branch requests to existing checkouts, and tearing worktrees
/// down with their branches.
#[derive(Clone)]
pub struct WorktreeOrchestrator {
    config: SharedConfig,
    sessions: SessionManager,
    meta: MetaStore,
}

impl WorktreeOrchestrator {
    pub fn new(config: SharedConfig, sessions: SessionManager, meta: MetaStore) -> Self {
        Self {
            config,
            sessions,
            meta,
        }
    }

    fn agent_invocation(&self, extra_args: &[String]) -> (String, Vec<String>) {
        let cfg = self.config.read().unwrap();
        let mut args = cfg.agent_args.clone();
        args.extend(extra_args.iter().cloned());
        (cfg.agent_command.clone(), args)
    }

    fn root_for(&self, repo_path: &Path) -> PathBuf {
        let cfg = self.config.read().unwrap();
        cfg.root_dirs
            .iter()
            .find(|root| repo_path.starts_with(root))
            .cloned()
            .unwrap_or_default()
    }

    pub fn create_repo_session(
        &self,
        req: RepoSessionRequest,
    ) -> Result<SessionSummary, AgentportError> {
        let name = repo_display_name(&req.repo_path, req.repo_name.as_deref());
        let (command, args) = self.agent_invocation(&req.extra_args);
        let mut params = CreateSessionParams::new(SessionKind::Repo, &req.repo_path, command);
        params.repo_name = name.clone();
        params.root = self.root_for(&req.repo_path);
        params.display_name = Some(name);
        params.args = args;
        params.resume = req.resume;
        self.sessions.create(params)
    }

    pub async fn create_worktree_session(
        &self,
        req: WorktreeSessionRequest,
    ) -> Result<SessionSummary, AgentportError> {
        let name = repo_display_name(&req.repo_path, req.repo_name.as_deref());
        let (command, args) = self.agent_invocation(&req.extra_args);

        if let Some(worktree_path) = &req.worktree_path {
            // Resuming a known worktree needs no git work at all.
            return self.spawn_worktree_session(
                &req.repo_path,
                &name,
                worktree_path,
                req.branch_name.clone(),
                command,
                args,
                true,
            );
        }

        let (mut dir_name, mut resolved_branch) = match &req.branch_name {
            Some(branch) => (sanitize_branch_dir_name(branch), branch.clone()),
            None => {
                let generated = format!("agent-{}-{}", name, base36(Utc::now().timestamp_millis()));
                (generated.clone(), generated)
            }
        };

        let container = req.repo_path.join(WORKTREE_DIRS[0]);
        let mut target_dir = container.join(&dir_name);
        if target_dir.exists() {
            dir_name = format!("{dir_name}-{}", base36(Utc::now().timestamp_millis()));
            target_dir = container.join(&dir_name);
        }

        for dir in WORKTREE_DIRS {
            ensure_gitignore(&req.repo_path, &format!("{dir}/"));
        }

        let mut branch_exists = false;
        if let Some(branch) = &req.branch_name {
            if git_succeeds(&req.repo_path, &["rev-parse", "--verify", branch]).await {
                branch_exists = true;
            } else {
                let remote = format!("origin/{branch}");
                if git_succeeds(&req.repo_path, &["rev-parse", "--verify", &remote]).await {
                    branch_exists = true;
                    resolved_branch = remote;
                }
            }
        }

        match (&req.branch_name, branch_exists) {
            (Some(branch), true) => {
                let porcelain =
                    run_git(&req.repo_path, &["worktree", "list", "--porcelain"]).await?;
                let checked_out = crate::domains::git::parse_worktree_list_porcelain(&porcelain)
                    .into_iter()
                    .find(|wt| wt.branch.as_deref() == Some(branch.as_str()));

                if let Some(existing) = checked_out {
                    if existing.is_main {
                        // The branch lives in the repo's own checkout. Hand
                        // out the existing repo session if there is one,
                        // otherwise start one.
                        if let Some(live) = self.sessions.find_repo_session(&req.repo_path) {
                            return Err(AgentportError::RepoSessionExists {
                                session_id: live.id,
                            });
                        }
                        return self.create_repo_session(RepoSessionRequest {
                            repo_path: req.repo_path.clone(),
                            repo_name: Some(name),
                            resume: false,
                            extra_args: req.extra_args.clone(),
                        });
                    }
                    return self.spawn_worktree_session(
                        &req.repo_path,
                        &name,
                        &existing.path,
                        Some(branch.clone()),
                        command,
                        args,
                        true,
                    );
                }

                let target = target_dir.to_string_lossy().into_owned();
                run_git(
                    &req.repo_path,
                    &["worktree", "add", &target, &resolved_branch],
                )
                .await?;
            }
            (Some(branch), false) => {
                let target = target_dir.to_string_lossy().into_owned();
                run_git(
                    &req.repo_path,
                    &["worktree", "add", "-b", branch, &target, "HEAD"],
                )
                .await?;
            }
            (None, _) => {
                let target = target_dir.to_string_lossy().into_owned();
                run_git(
                    &req.repo_path,
                    &["worktree", "add", "-b", &dir_name, &target, "HEAD"],
                )
                .await?;
            }
        }

        self.spawn_worktree_session(
            &req.repo_path,
            &name,
            &target_dir,
            Some(req.branch_name.clone().unwrap_or(dir_name)),
            command,
            args,
            false,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_worktree_session(
        &self,
        repo_path: &Path,
        repo_name: &str,
        worktree_path: &Path,
        branch_name: Option<String>,
        command: String,
        args: Vec<String>,
        resume: bool,
    ) -> Result<SessionSummary, AgentportError> {
        let worktree_name = basename(worktree_path);
        let display_name = branch_name.clone().unwrap_or_else(|| worktree_name.clone());
        let mut params = CreateSessionParams::new(SessionKind::Worktree, worktree_path, command);
        params.repo_name = repo_name.to_string();
        params.root = self.root_for(repo_path);
        params.worktree_name = worktree_name.clone();
        params.branch_name = Some(branch_name.unwrap_or(worktree_name));
        params.display_name = Some(display_name);
        params.args = args;
        params.resume = resume;
        params.persist_meta = true;
        self.sessions.create(params)
    }

    /// Remove a worktree, prune stale refs, delete its branch, and drop its
    /// metadata. Prune and branch deletion failures are non-fatal; a failed
    /// directory removal is.
    pub async fn delete_worktree(
        &self,
        worktree_path: &Path,
        repo_path: &Path,
    ) -> Result<(), AgentportError> {
        if !is_valid_worktree_path(worktree_path) {
            return Err(AgentportError::InvalidWorktreePath {
                path: worktree_path.to_string_lossy().into_owned(),
            });
        }
        if self.sessions.find_by_worktree(worktree_path).is_some() {
            return Err(AgentportError::WorktreeConflict {
                path: worktree_path.to_string_lossy().into_owned(),
            });
        }

        let branch_name = self
            .meta
            .read(worktree_path)
            .and_then(|m| m.branch_name)
            .unwrap_or_else(|| basename(worktree_path));

        // No --force: uncommitted changes make the removal fail on purpose.
        let target = worktree_path.to_string_lossy().into_owned();
        if let Err(e) = run_git(repo_path, &["worktree", "remove", &target]).await {
            if worktree_path.exists() {
                // Git no longer tracks this directory; remove it directly.
                log::warn!("git worktree remove failed ({e}), removing directory");
                std::fs::remove_dir_all(worktree_path)
                    .map_err(|e| AgentportError::io("remove worktree", &target, e))?;
            }
        }

        if let Err(e) = run_git(repo_path, &["worktree", "prune"]).await {
            log::debug!("worktree prune failed: {e}");
        }
        if !branch_name.is_empty() {
            // The branch may be gone already or checked out elsewhere.
            if let Err(e) = run_git(repo_path, &["branch", "-D", &branch_name]).await {
                log::debug!("branch delete failed: {e}");
            }
        }
        self.meta.delete(worktree_path);
        log::info!("removed worktree {}", worktree_path.display());
        Ok(())
    }

    /// Worktrees of one repo, or of every repo under the configured roots.
    /// Discovery prefers `git worktree list`; unreadable repos fall back to
    /// scanning the container directories.
    pub async fn list_worktrees(&self, repo: Option<&Path>) -> Vec<WorktreeInfo> {
        let repos: Vec<RepoEntry> = match repo {
            Some(repo_path) => vec![RepoEntry {
                name: basename(repo_path),
                path: repo_path.to_path_buf(),
                root: self.root_for(repo_path),
            }],
            None => {
                let roots = self.config.read().unwrap().root_dirs.clone();
                scan_all_repos(&roots)
            }
        };

        let mut worktrees = Vec::new();
        for repo in &repos {
            match run_git(&repo.path, &["worktree", "list", "--porcelain"]).await {
                Ok(output) => {
                    for wt in linked_worktrees(&output) {
                        let dir_name = basename(&wt.path);
                        let meta = self.meta.read(&wt.path);
                        worktrees.push(WorktreeInfo {
                            name: dir_name.clone(),
                            path: wt.path.clone(),
                            repo_name: repo.name.clone(),
                            repo_path: repo.path.clone(),
                            root: repo.root.clone(),
                            display_name: meta
                                .as_ref()
                                .map(|m| m.display_name.clone())
                                .or_else(|| wt.branch.clone())
                                .unwrap_or_else(|| dir_name.clone()),
                            last_activity: meta
                                .as_ref()
                                .map(|m| m.last_activity.clone())
                                .unwrap_or_default(),
                            branch_name: wt.branch.clone().unwrap_or(dir_name),
                        });
                    }
                }
                Err(_) => {
                    for dir in WORKTREE_DIRS {
                        let container = repo.path.join(dir);
                        let Ok(entries) = std::fs::read_dir(&container) else {
                            continue;
                        };
                        for entry in entries.flatten() {
                            if !entry.path().is_dir() {
                                continue;
                            }
                            let wt_path = entry.path();
                            let dir_name = basename(&wt_path);
                            let meta = self.meta.read(&wt_path);
                            worktrees.push(WorktreeInfo {
                                name: dir_name.clone(),
                                path: wt_path,
                                repo_name: repo.name.clone(),
                                repo_path: repo.path.clone(),
                                root: repo.root.clone(),
                                display_name: meta
                                    .as_ref()
                                    .map(|m| m.display_name.clone())
                                    .unwrap_or_else(|| dir_name.clone()),
                                last_activity: meta
                                    .as_ref()
                                    .map(|m| m.last_activity.clone())
                                    .unwrap_or_default(),
                                branch_name: meta
                                    .and_then(|m| m.branch_name)
                                    .unwrap_or(dir_name),
                            });
                        }
                    }
                }
            }
        }

        // A worktree can surface through more than one repo scan.
        let mut seen = std::collections::HashSet::new();
        worktrees.retain(|wt| seen.insert(wt.path.clone()));
        worktrees
    }

    /// All local and remote branch names, deduplicated with the `origin/`
    /// prefix stripped. Errors collapse to an empty list.
    pub async fn list_branches(&self, repo_path: &Path) -> Vec<String> {
        let Ok(output) = run_git(
            repo_path,
            &["branch", "-a", "--format=%(refname:short)"],
        )
        .await
        else {
            return Vec::new();
        };
        let mut branches: Vec<String> = output
            .lines()
            .map(str::trim)
            .filter(|b| !b.is_empty() && !b.contains("HEAD"))
            .map(|b| b.strip_prefix("origin/").unwrap_or(b).to_string())
            .collect();
        branches.sort();
        branches.dedup();
        branches
    }
}

fn repo_display_name(repo_path: &Path, explicit: Option<&str>) -> String {
    match explicit {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            let base = basename(repo_path);
            if base.is_empty() {
                "session".to_string()
            } else {
                base
            }
        }
    }
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn base36(millis: i64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut n = millis.unsigned_abs();
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
