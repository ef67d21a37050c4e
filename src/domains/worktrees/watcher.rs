use crate::domains::git::{scan_repos_in_root, WORKTREE_DIRS};
use crate::infrastructure::events::{AppEvent, EventBus};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches the worktree container of every repo under the configured roots
/// and emits a debounced `worktrees-changed` event on any filesystem
/// activity. `rebuild` swaps in a fresh watcher set; roots change at
/// runtime.
pub struct WorktreeWatcher {
    events: EventBus,
    debouncer: Mutex<Option<Debouncer<RecommendedWatcher>>>,
}

impl WorktreeWatcher {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            debouncer: Mutex::new(None),
        }
    }

    pub fn rebuild(&self, root_dirs: &[PathBuf]) {
        // Tear down the previous watch set first so the two never overlap
        // and a single change cannot be reported twice.
        self.debouncer.lock().unwrap().take();

        let events = self.events.clone();
        let mut debouncer = match new_debouncer(DEBOUNCE, move |result: DebounceEventResult| {
            if result.is_ok() {
                events.emit(AppEvent::WorktreesChanged);
            }
        }) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("failed to start worktree watcher: {e}");
                return;
            }
        };

        let mut watched = 0usize;
        for root in root_dirs {
            for repo in scan_repos_in_root(root) {
                // Watch the container itself when it exists, else its parent
                // so creation of the container is noticed.
                let container = repo.path.join(WORKTREE_DIRS[0]);
                let parent = container
                    .parent()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| repo.path.clone());
                let target = if container.is_dir() {
                    container
                } else if parent.is_dir() {
                    parent
                } else {
                    repo.path.clone()
                };
                match debouncer.watcher().watch(&target, RecursiveMode::NonRecursive) {
                    Ok(()) => watched += 1,
                    Err(e) => log::debug!("cannot watch {}: {e}", target.display()),
                }
            }
        }
        log::info!("watching {watched} worktree director{}", if watched == 1 { "y" } else { "ies" });

        *self.debouncer.lock().unwrap() = Some(debouncer);
    }

    pub fn close(&self) {
        self.debouncer.lock().unwrap().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_repo(root: &std::path::Path, name: &str) -> PathBuf {
        let repo = root.join(name);
        std::fs::create_dir_all(repo.join(".git")).unwrap();
        std::fs::create_dir_all(repo.join(WORKTREE_DIRS[0])).unwrap();
        repo
    }

    #[tokio::test]
    async fn container_changes_emit_debounced_event() {
        let tmp = TempDir::new().unwrap();
        let repo = fake_repo(tmp.path(), "repo");
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let watcher = WorktreeWatcher::new(bus);
        watcher.rebuild(&[tmp.path().to_path_buf()]);

        std::fs::create_dir(repo.join(WORKTREE_DIRS[0]).join("new-wt")).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("no event before timeout")
            .unwrap();
        assert_eq!(event, AppEvent::WorktreesChanged);
        watcher.close();
    }

    #[tokio::test]
    async fn rebuild_replaces_watches_without_doubling_events() {
        let tmp = TempDir::new().unwrap();
        let repo = fake_repo(tmp.path(), "repo");
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let watcher = WorktreeWatcher::new(bus);
        watcher.rebuild(&[tmp.path().to_path_buf()]);
        watcher.rebuild(&[tmp.path().to_path_buf()]);

        std::fs::create_dir(repo.join(WORKTREE_DIRS[0]).join("wt")).unwrap();
        tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("no event before timeout")
            .unwrap();
        // A lingering watcher from the first rebuild would deliver a copy
        let extra = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(extra.is_err());
        watcher.close();
    }

    #[tokio::test]
    async fn rebuild_survives_missing_roots() {
        let watcher = WorktreeWatcher::new(EventBus::new());
        watcher.rebuild(&[PathBuf::from("/definitely/not/here")]);
        watcher.rebuild(&[]);
        watcher.close();
    }
}
