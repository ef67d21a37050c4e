use serde::Serialize;
use std::path::{Path, PathBuf};

/// Directories (relative to a repository root) recognized as worktree
/// containers. New worktrees are created under the first entry; the rest are
/// honored for listing and deletion of older layouts.
pub const WORKTREE_DIRS: [&str; 2] = [".agentport/worktrees", ".worktrees"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepoEntry {
    pub name: String,
    pub path: PathBuf,
    pub root: PathBuf,
}

/// One entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq)]
pub struct WorktreeListing {
    pub path: PathBuf,
    pub branch: Option<String>,
    /// The repository's own checkout (always listed first by git).
    pub is_main: bool,
}

/// List git repositories directly under `root_dir`. Only directories with a
/// `.git` *directory* count: worktrees and submodules carry a `.git` file
/// and must not be listed as repositories.
pub fn scan_repos_in_root(root_dir: &Path) -> Vec<RepoEntry> {
    let mut repos = Vec::new();
    let Ok(entries) = std::fs::read_dir(root_dir) else {
        return repos;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if path.join(".git").is_dir() {
            repos.push(RepoEntry {
                name,
                path,
                root: root_dir.to_path_buf(),
            });
        }
    }
    repos
}

pub fn scan_all_repos(root_dirs: &[PathBuf]) -> Vec<RepoEntry> {
    let mut repos = Vec::new();
    for root in root_dirs {
        repos.extend(scan_repos_in_root(root));
    }
    repos
}

/// Parse `git worktree list --porcelain` output. Entries are separated by
/// blank lines; each starts with a `worktree <path>` line followed by
/// attribute lines (`HEAD <oid>`, `branch refs/heads/<name>`, `detached`,
/// `bare`). Git lists the main checkout first.
pub fn parse_worktree_list_porcelain(output: &str) -> Vec<WorktreeListing> {
    let mut listings = Vec::new();
    let mut current: Option<WorktreeListing> = None;

    for line in output.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(done) = current.take() {
                listings.push(done);
            }
            current = Some(WorktreeListing {
                path: PathBuf::from(path),
                branch: None,
                is_main: listings.is_empty(),
            });
        } else if let Some(reference) = line.strip_prefix("branch ") {
            if let Some(ref mut wt) = current {
                let branch = reference
                    .strip_prefix("refs/heads/")
                    .unwrap_or(reference)
                    .to_string();
                wt.branch = Some(branch);
            }
        }
    }
    if let Some(done) = current.take() {
        listings.push(done);
    }
    listings
}

/// Worktrees other than the repository's own checkout.
pub fn linked_worktrees(output: &str) -> Vec<WorktreeListing> {
    parse_worktree_list_porcelain(output)
        .into_iter()
        .filter(|wt| !wt.is_main)
        .collect()
}

/// Deletion guard: a worktree path must contain one of the recognized
/// container directories as exact path components. `.worktrees-backup/x`
/// or a path merely ending in the container name must not match.
pub fn is_valid_worktree_path(path: &Path) -> bool {
    let components: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    for container in WORKTREE_DIRS {
        let parts: Vec<&str> = container.split('/').collect();
        // The worktree itself lives one level below the container.
        if components.len() <= parts.len() {
            continue;
        }
        let found = components
            .windows(parts.len())
            .enumerate()
            .any(|(i, w)| w.iter().map(String::as_str).eq(parts.iter().copied()) && i + parts.len() < components.len());
        if found {
            return true;
        }
    }
    false
}

/// Make sure the repository ignores its worktree containers. Idempotent and
/// best-effort: failure to update .gitignore never blocks session creation.
pub fn ensure_gitignore(repo_path: &Path, entry: &str) {
    let gitignore = repo_path.join(".gitignore");
    let result = match std::fs::read_to_string(&gitignore) {
        Ok(content) => {
            if content.lines().any(|line| line.trim() == entry) {
                return;
            }
            let prefix = if content.is_empty() || content.ends_with('\n') {
                ""
            } else {
                "\n"
            };
            std::fs::write(&gitignore, format!("{content}{prefix}{entry}\n"))
        }
        Err(_) => std::fs::write(&gitignore, format!("{entry}\n")),
    };
    if let Err(e) = result {
        log::warn!(
            "Failed to update .gitignore in {}: {e}",
            repo_path.display()
        );
    }
}

/// Replace path separators so a branch like `feat/x` maps to directory
/// `feat-x`.
pub fn sanitize_branch_dir_name(branch: &str) -> String {
    branch.replace(['/', '\\'], "-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn porcelain_parsing_basic() {
        let out = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n\nworktree /repo/.agentport/worktrees/feat-x\nHEAD def456\nbranch refs/heads/feat/x\n";
        let parsed = parse_worktree_list_porcelain(out);
        assert_eq!(parsed.len(), 2);
        assert!(parsed[0].is_main);
        assert_eq!(parsed[0].branch.as_deref(), Some("main"));
        assert!(!parsed[1].is_main);
        assert_eq!(parsed[1].path, PathBuf::from("/repo/.agentport/worktrees/feat-x"));
        assert_eq!(parsed[1].branch.as_deref(), Some("feat/x"));
    }

    #[test]
    fn porcelain_parsing_detached_entry_has_no_branch() {
        let out = "worktree /repo\nHEAD abc\nbranch refs/heads/main\n\nworktree /elsewhere\nHEAD def\ndetached\n";
        let parsed = parse_worktree_list_porcelain(out);
        assert_eq!(parsed[1].branch, None);
    }

    #[test]
    fn porcelain_parsing_empty_output() {
        assert!(parse_worktree_list_porcelain("").is_empty());
    }

    #[test]
    fn linked_worktrees_skips_main() {
        let out = "worktree /repo\nbranch refs/heads/main\n\nworktree /repo/.worktrees/a\nbranch refs/heads/a\n";
        let linked = linked_worktrees(out);
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].path, PathBuf::from("/repo/.worktrees/a"));
    }

    #[test]
    fn valid_worktree_paths() {
        assert!(is_valid_worktree_path(Path::new(
            "/home/me/code/repo/.agentport/worktrees/my-worktree"
        )));
        assert!(is_valid_worktree_path(Path::new(
            "/home/me/code/repo/.worktrees/feat-x"
        )));
    }

    #[test]
    fn invalid_worktree_paths() {
        assert!(!is_valid_worktree_path(Path::new("/some/random/path")));
        // Partial component matches must not pass
        assert!(!is_valid_worktree_path(Path::new(
            "/home/me/.agentport/worktrees-fake/foo"
        )));
        // The container itself is not a deletable worktree
        assert!(!is_valid_worktree_path(Path::new(
            "/repo/.agentport/worktrees"
        )));
    }

    #[test]
    fn scan_skips_dotdirs_and_worktree_checkouts() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();

        // Real repo: .git directory
        std::fs::create_dir_all(root.join("repo-a/.git")).unwrap();
        // Worktree-style checkout: .git file
        std::fs::create_dir_all(root.join("wt-b")).unwrap();
        std::fs::write(root.join("wt-b/.git"), "gitdir: /repo-a/.git/worktrees/b").unwrap();
        // Hidden dir and plain dir
        std::fs::create_dir_all(root.join(".hidden/.git")).unwrap();
        std::fs::create_dir_all(root.join("not-a-repo")).unwrap();

        let repos = scan_repos_in_root(root);
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].name, "repo-a");
        assert_eq!(repos[0].root, root);
    }

    #[test]
    fn scan_missing_root_is_empty() {
        assert!(scan_repos_in_root(Path::new("/does/not/exist")).is_empty());
    }

    #[test]
    fn gitignore_created_appended_and_idempotent() {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path();
        let gitignore = repo.join(".gitignore");

        ensure_gitignore(repo, ".agentport/worktrees/");
        assert_eq!(
            std::fs::read_to_string(&gitignore).unwrap(),
            ".agentport/worktrees/\n"
        );

        // Second call is a no-op
        ensure_gitignore(repo, ".agentport/worktrees/");
        assert_eq!(
            std::fs::read_to_string(&gitignore).unwrap(),
            ".agentport/worktrees/\n"
        );

        // Appends with newline fix-up when file lacks a trailing newline
        std::fs::write(&gitignore, "target").unwrap();
        ensure_gitignore(repo, ".agentport/worktrees/");
        assert_eq!(
            std::fs::read_to_string(&gitignore).unwrap(),
            "target\n.agentport/worktrees/\n"
        );
    }

    #[test]
    fn branch_dir_name_sanitization() {
        assert_eq!(sanitize_branch_dir_name("feat/x"), "feat-x");
        assert_eq!(sanitize_branch_dir_name("main"), "main");
        assert_eq!(sanitize_branch_dir_name("a/b/c"), "a-b-c");
    }
}
