use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What a session is rooted at: the repository checkout itself, or a
/// dedicated worktree. At most one `Repo` session may exist per repository
/// path at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Repo,
    Worktree,
}

/// The externally visible shape of a session: everything except the process
/// handles and scrollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SessionKind,
    pub root: PathBuf,
    pub repo_name: String,
    pub repo_path: PathBuf,
    pub worktree_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub idle: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct CreateSessionParams {
    pub kind: SessionKind,
    pub repo_name: String,
    /// For worktree sessions this is the worktree path; worktree deletion
    /// checks live sessions against it.
    pub repo_path: PathBuf,
    pub cwd: Option<PathBuf>,
    pub root: PathBuf,
    pub worktree_name: String,
    pub branch_name: Option<String>,
    pub display_name: Option<String>,
    pub command: String,
    pub args: Vec<String>,
    pub cols: u16,
    pub rows: u16,
    /// Spawn with the agent's continue flag; enables the one-shot retry on a
    /// fast non-zero exit.
    pub resume: bool,
    /// Worktree-backed sessions persist display name and activity to the
    /// metadata store; repo sessions do not.
    pub persist_meta: bool,
}

impl CreateSessionParams {
    pub fn new(kind: SessionKind, repo_path: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            kind,
            repo_name: String::new(),
            repo_path: repo_path.into(),
            cwd: None,
            root: PathBuf::new(),
            worktree_name: String::new(),
            branch_name: None,
            display_name: None,
            command: command.into(),
            args: Vec::new(),
            cols: 80,
            rows: 24,
            resume: false,
            persist_meta: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_serializes_kind_as_type() {
        let summary = SessionSummary {
            id: "abc".into(),
            kind: SessionKind::Worktree,
            root: PathBuf::from("/code"),
            repo_name: "repo".into(),
            repo_path: PathBuf::from("/code/repo/.agentport/worktrees/x"),
            worktree_name: "x".into(),
            branch_name: Some("feat/x".into()),
            display_name: "x".into(),
            created_at: Utc::now(),
            last_activity: Utc::now(),
            idle: false,
            pid: Some(42),
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["type"], "worktree");
        assert_eq!(json["displayName"], "x");
        assert_eq!(json["branchName"], "feat/x");
        assert_eq!(json["pid"], 42);
    }

    #[test]
    fn defaults_have_standard_geometry() {
        let params = CreateSessionParams::new(SessionKind::Repo, "/repo", "claude");
        assert_eq!(params.cols, 80);
        assert_eq!(params.rows, 24);
        assert!(!params.resume);
    }
}
