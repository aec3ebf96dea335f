//! Git-related error types.

/// Errors from git operations.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    /// Git command failed with an exit code.
    #[error("git {command} failed: {message}")]
    CommandFailed {
        /// The git subcommand that failed.
        command: String,
        /// Error message from stderr.
        message: String,
        /// Process exit code, if available.
        exit_code: Option<i32>,
    },

    /// The remote could not be reached or refused the connection.
    #[error("{message}")]
    Transport {
        /// Primary message.
        message: String,
        /// Underlying reason reported alongside it.
        cause: Option<String>,
    },

    /// The remote URL does not point at a usable repository.
    #[error("invalid remote: {0}")]
    InvalidRemote(String),

    /// Git produced something the client cannot make sense of.
    #[error("{message}")]
    Internal {
        /// Primary message.
        message: String,
        /// Underlying reason.
        cause: Option<String>,
    },

    /// Not inside a git repository.
    #[error("not a git repository: {0}")]
    NotARepository(String),

    /// Git binary not found.
    #[error("git executable not found in PATH")]
    NotFound,

    /// I/O error from subprocess.
    #[error("git IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// Get the exit code if this was a command failure.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    /// The underlying reason, if git reported one separately.
    pub fn cause(&self) -> Option<&str> {
        match self {
            Self::Transport { cause, .. } | Self::Internal { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }

    /// Message followed by its cause, the form shown to the user.
    pub fn detailed_message(&self) -> String {
        match self.cause() {
            Some(cause) if !cause.is_empty() => format!("{self}\nCaused by:\n{cause}"),
            _ => self.to_string(),
        }
    }

    /// Build an error from a failed git invocation's stderr.
    ///
    /// The last `fatal:`/`error:` line becomes the message; the remaining
    /// lines become the cause.
    pub fn from_stderr(command: &str, stderr: &str, exit_code: Option<i32>) -> Self {
        let lines: Vec<&str> = stderr
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        let headline_idx = lines
            .iter()
            .rposition(|l| l.starts_with("fatal:") || l.starts_with("error:"));
        let message = headline_idx.map_or_else(
            || lines.last().copied().unwrap_or_default().to_string(),
            |i| strip_prefix(lines[i]).to_string(),
        );
        let cause_lines: Vec<&str> = lines
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != headline_idx && headline_idx.is_some())
            .map(|(_, l)| strip_prefix(l))
            .collect();
        let cause = (!cause_lines.is_empty()).then(|| cause_lines.join("\n"));

        let lowered = stderr.to_lowercase();
        if INVALID_REMOTE_MARKERS.iter().any(|m| lowered.contains(m)) {
            return Self::InvalidRemote(message);
        }
        if TRANSPORT_MARKERS.iter().any(|m| lowered.contains(m)) {
            return Self::Transport { message, cause };
        }
        Self::CommandFailed {
            command: command.to_string(),
            message: if let Some(cause) = cause {
                format!("{message}\n{cause}")
            } else {
                message
            },
            exit_code,
        }
    }

    /// Whether the failure looks like rejected credentials.
    pub fn is_authentication_failure(&self) -> bool {
        let text = self.detailed_message().to_lowercase();
        AUTH_MARKERS.iter().any(|m| text.contains(m))
    }
}

const INVALID_REMOTE_MARKERS: &[&str] = &[
    "does not appear to be a git repository",
    "repository not found",
    "no such remote",
];

const TRANSPORT_MARKERS: &[&str] = &[
    "could not read from remote repository",
    "could not resolve hostname",
    "could not resolve host",
    "connection refused",
    "connection timed out",
    "permission denied",
    "authentication failed",
    "host key verification failed",
    "unable to access",
];

const AUTH_MARKERS: &[&str] = &[
    "permission denied",
    "authentication failed",
    "auth fail",
    "invalid username or password",
];

fn strip_prefix(line: &str) -> &str {
    line.strip_prefix("fatal:")
        .or_else(|| line.strip_prefix("error:"))
        .unwrap_or(line)
        .trim()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_should_display_command_failed() {
        let err = GitError::CommandFailed {
            command: "commit".to_string(),
            message: "nothing to commit".to_string(),
            exit_code: Some(1),
        };
        let msg = err.to_string();
        assert!(msg.contains("commit"));
        assert!(msg.contains("nothing to commit"));
        assert_eq!(err.exit_code(), Some(1));
    }

    #[test]
    fn test_should_join_message_and_cause() {
        let err = GitError::Transport {
            message: "Could not read from remote repository.".to_string(),
            cause: Some("git@example.com: Permission denied (publickey).".to_string()),
        };
        assert_eq!(
            err.detailed_message(),
            "Could not read from remote repository.\nCaused by:\ngit@example.com: Permission denied (publickey).",
        );
    }

    #[test]
    fn test_should_omit_missing_cause() {
        let err = GitError::Internal {
            message: "unexpected output".to_string(),
            cause: None,
        };
        assert_eq!(err.detailed_message(), "unexpected output");
    }

    #[test]
    fn test_should_classify_transport_failure_from_stderr() {
        let stderr = "git@example.com: Permission denied (publickey).\nfatal: Could not read from remote repository.\n\nPlease make sure you have the correct access rights\n";
        let err = GitError::from_stderr("pull", stderr, Some(128));
        match &err {
            GitError::Transport { message, cause } => {
                assert_eq!(message, "Could not read from remote repository.");
                assert!(cause.as_deref().unwrap().contains("Permission denied"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_should_classify_invalid_remote() {
        let stderr = "fatal: 'origin' does not appear to be a git repository\nfatal: Could not read from remote repository.";
        let err = GitError::from_stderr("push", stderr, Some(128));
        assert!(matches!(err, GitError::InvalidRemote(_)));
    }

    #[test]
    fn test_should_fall_back_to_command_failed() {
        let err = GitError::from_stderr("rebase", "error: no rebase in progress", Some(1));
        match err {
            GitError::CommandFailed {
                command,
                message,
                exit_code,
            } => {
                assert_eq!(command, "rebase");
                assert_eq!(message, "no rebase in progress");
                assert_eq!(exit_code, Some(1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_should_not_flag_network_error_as_auth() {
        let err = GitError::from_stderr(
            "clone",
            "ssh: Could not resolve hostname nowhere: Name or service not known\nfatal: Could not read from remote repository.",
            Some(128),
        );
        assert!(matches!(err, GitError::Transport { .. }));
        assert!(!err.is_authentication_failure());
    }

    #[test]
    fn test_should_convert_io_error() {
        let git_err: GitError = std::io::Error::other("test").into();
        assert!(matches!(git_err, GitError::Io(_)));
    }
}
