use serde::Serialize;
use std::fmt;

#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", content = "data")]
pub enum AgentportError {
    SessionNotFound {
        session_id: String,
    },
    /// A repo-rooted session already exists for this repository. Carries the
    /// existing session id so callers can attach instead of erroring blindly.
    RepoSessionExists {
        session_id: String,
    },
    /// A live session still points at the worktree being deleted.
    WorktreeConflict {
        path: String,
    },
    InvalidWorktreePath {
        path: String,
    },
    GitOperationFailed {
        operation: String,
        message: String,
    },
    ProcessSpawnFailed {
        command: String,
        message: String,
    },
    IoError {
        operation: String,
        path: String,
        message: String,
    },
    InvalidInput {
        field: String,
        message: String,
    },
}

impl AgentportError {
    pub fn git(operation: &str, error: impl ToString) -> Self {
        AgentportError::GitOperationFailed {
            operation: operation.to_string(),
            message: error.to_string(),
        }
    }

    pub fn spawn(command: &str, error: impl ToString) -> Self {
        AgentportError::ProcessSpawnFailed {
            command: command.to_string(),
            message: error.to_string(),
        }
    }

    pub fn io(operation: &str, path: impl ToString, error: impl ToString) -> Self {
        AgentportError::IoError {
            operation: operation.to_string(),
            path: path.to_string(),
            message: error.to_string(),
        }
    }

    pub fn invalid_input(field: &str, message: impl ToString) -> Self {
        AgentportError::InvalidInput {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for AgentportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::SessionNotFound { session_id } => {
                write!(f, "Session '{session_id}' not found")
            }
            Self::RepoSessionExists { session_id } => {
                write!(
                    f,
                    "A session already exists for this repo (session '{session_id}')"
                )
            }
            Self::WorktreeConflict { path } => {
                write!(f, "An active session is still using worktree '{path}'")
            }
            Self::InvalidWorktreePath { path } => {
                write!(f, "Path '{path}' is not inside a worktree directory")
            }
            Self::GitOperationFailed { operation, message } => {
                write!(f, "Git operation '{operation}' failed: {message}")
            }
            Self::ProcessSpawnFailed { command, message } => {
                write!(f, "Failed to spawn '{command}': {message}")
            }
            Self::IoError {
                operation,
                path,
                message,
            } => {
                write!(f, "I/O error during '{operation}' on '{path}': {message}")
            }
            Self::InvalidInput { field, message } => {
                write!(f, "Invalid input for field '{field}': {message}")
            }
        }
    }
}

impl std::error::Error for AgentportError {}

impl From<AgentportError> for String {
    fn from(error: AgentportError) -> Self {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_not_found_mentions_id() {
        let err = AgentportError::SessionNotFound {
            session_id: "abc123".into(),
        };
        assert_eq!(err.to_string(), "Session 'abc123' not found");
    }

    #[test]
    fn git_failure_carries_stderr() {
        let err = AgentportError::git("worktree add", "fatal: branch in use");
        assert!(err.to_string().contains("worktree add"));
        assert!(err.to_string().contains("fatal: branch in use"));
    }

    #[test]
    fn serializes_with_type_tag() {
        let err = AgentportError::RepoSessionExists {
            session_id: "deadbeef".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "RepoSessionExists");
        assert_eq!(json["data"]["session_id"], "deadbeef");
    }
}
