//! Git commands an operation is made of.

use std::fmt;
use std::path::PathBuf;

use pwsync_core::config::CommitAuthor;

/// One step of an operation batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Clone the remote into the working tree.
    Clone {
        /// Remote URL.
        uri: String,
        /// Target directory.
        directory: PathBuf,
        /// Fetch every branch rather than only the default one.
        all_branches: bool,
    },
    /// Stage files.
    Add {
        /// Pathspec to stage.
        pattern: String,
    },
    /// Inspect the working tree.
    Status,
    /// Record a commit.
    Commit {
        /// Commit message.
        message: String,
        /// Stage modified tracked files too.
        all: bool,
        /// Author override.
        author: Option<CommitAuthor>,
    },
    /// Fetch and integrate.
    Pull {
        /// Remote name.
        remote: String,
        /// Rebase local commits instead of merging.
        rebase: bool,
    },
    /// Publish local commits.
    Push {
        /// Remote name.
        remote: String,
        /// Push every branch.
        all: bool,
    },
    /// Abandon an in-progress rebase.
    RebaseAbort,
}

impl Command {
    /// Short name for logs and progress.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Clone { .. } => "clone",
            Self::Add { .. } => "add",
            Self::Status => "status",
            Self::Commit { .. } => "commit",
            Self::Pull { .. } => "pull",
            Self::Push { .. } => "push",
            Self::RebaseAbort => "rebase-abort",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Command::Status, "status")]
    #[case(Command::RebaseAbort, "rebase-abort")]
    #[case(Command::Add { pattern: ".".into() }, "add")]
    #[case(Command::Pull { remote: "origin".into(), rebase: true }, "pull")]
    #[case(Command::Push { remote: "origin".into(), all: true }, "push")]
    fn test_should_name_commands(#[case] command: Command, #[case] name: &str) {
        assert_eq!(command.name(), name);
    }

    #[test]
    fn test_should_display_command_name() {
        let command = Command::Commit {
            message: "m".into(),
            all: true,
            author: None,
        };
        assert_eq!(command.to_string(), "commit");
    }
}
