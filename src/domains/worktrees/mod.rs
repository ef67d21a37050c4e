pub mod orchestrator;
pub mod watcher;

pub use orchestrator::{
    RepoSessionRequest, WorktreeInfo, WorktreeOrchestrator, WorktreeSessionRequest,
};
pub use watcher::WorktreeWatcher;
