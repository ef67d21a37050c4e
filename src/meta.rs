use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Per-worktree metadata persisted across server restarts so idle worktrees
/// keep their display name and recency in listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeMetadata {
    pub worktree_path: PathBuf,
    pub display_name: String,
    pub last_activity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
}

/// Metadata files live beside the config file, one JSON file per worktree,
/// named by a stable hash of the worktree path.
#[derive(Debug, Clone)]
pub struct MetaStore {
    dir: PathBuf,
}

impl MetaStore {
    pub fn new(config_path: &Path) -> Self {
        let dir = config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("worktree-meta");
        Self { dir }
    }

    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    fn file_path(&self, worktree_path: &Path) -> PathBuf {
        let digest = Sha256::digest(worktree_path.to_string_lossy().as_bytes());
        let hash: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.dir.join(format!("{}.json", &hash[..16]))
    }

    /// Returns None when the file is missing or unparseable; callers treat
    /// absent metadata as "no persisted name".
    pub fn read(&self, worktree_path: &Path) -> Option<WorktreeMetadata> {
        let raw = std::fs::read_to_string(self.file_path(worktree_path)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Full overwrite, never a field merge.
    pub fn write(&self, meta: &WorktreeMetadata) -> Result<()> {
        self.ensure_dir()?;
        let json = serde_json::to_string_pretty(meta)?;
        std::fs::write(self.file_path(&meta.worktree_path), json)?;
        Ok(())
    }

    pub fn delete(&self, worktree_path: &Path) {
        let _ = std::fs::remove_file(self.file_path(worktree_path));
    }
}
