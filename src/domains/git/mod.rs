pub mod cli;
pub mod worktrees;

pub use cli::{git_succeeds, run_git};
pub use worktrees::{
    ensure_gitignore, is_valid_worktree_path, linked_worktrees, parse_worktree_list_porcelain,
    sanitize_branch_dir_name, scan_all_repos, scan_repos_in_root, RepoEntry, WorktreeListing,
    WORKTREE_DIRS,
};
