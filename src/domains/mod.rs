pub mod git;
pub mod sessions;
pub mod worktrees;
