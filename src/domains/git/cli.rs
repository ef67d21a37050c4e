use crate::errors::AgentportError;
use std::path::Path;
use tokio::process::Command;

/// Run a git subcommand in `repo`, returning trimmed stdout. Non-zero exit
/// surfaces stderr (or a generic fallback) as `GitOperationFailed`.
pub async fn run_git(repo: &Path, args: &[&str]) -> Result<String, AgentportError> {
    let operation = args.join(" ");
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .await
        .map_err(|e| AgentportError::git(&operation, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("git {operation} exited with {}", output.status)
        } else {
            stderr
        };
        return Err(AgentportError::GitOperationFailed { operation, message });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Existence-style probe: true when the command exits zero.
pub async fn git_succeeds(repo: &Path, args: &[&str]) -> bool {
    run_git(repo, args).await.is_ok()
}
