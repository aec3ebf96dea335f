//! The version-control surface consumed by sync operations.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use pwsync_core::config::CommitAuthor;

use crate::errors::GitError;
use crate::transport::TransportConfiguration;

/// Working-tree status, reduced to what the sync flow needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSummary {
    /// Entries added, modified, renamed or deleted in the index, plus
    /// tracked files modified in the working tree.
    pub changed: usize,
    /// Tracked files deleted from the working tree but not from the index.
    pub missing: usize,
    /// Files git does not track yet.
    pub untracked: usize,
}

impl StatusSummary {
    /// Number of changes a commit would record.
    pub fn change_count(&self) -> usize {
        self.changed + self.missing
    }
}

/// State of the rebase after a pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseStatus {
    /// Local commits were replayed onto the remote branch.
    Ok,
    /// Nothing to rebase.
    UpToDate,
    /// The branch was fast-forwarded.
    FastForward,
    /// The rebase stopped on a conflict and is still in progress.
    Stopped,
}

/// Result of a pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullOutcome {
    /// Rebase state after the pull.
    pub rebase: RebaseStatus,
}

impl PullOutcome {
    /// Whether the pull left the repository mid-rebase.
    pub fn is_stopped(&self) -> bool {
        self.rebase == RebaseStatus::Stopped
    }
}

/// Per-ref result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefUpdateStatus {
    /// Remote ref updated.
    Ok,
    /// Remote ref already matched.
    UpToDate,
    /// Remote has commits the local branch lacks.
    RejectedNonFastForward,
    /// Remote refuses to delete the ref.
    RejectedNoDelete,
    /// Remote ref changed since it was last fetched.
    RejectedRemoteChanged,
    /// Remote rejected the update for its own reason.
    RejectedOtherReason,
    /// Source ref does not exist locally.
    NonExisting,
    /// Update was not tried because another one failed first.
    NotAttempted,
}

impl RefUpdateStatus {
    /// Stable upper-case name used in user-facing messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::UpToDate => "UP_TO_DATE",
            Self::RejectedNonFastForward => "REJECTED_NONFASTFORWARD",
            Self::RejectedNoDelete => "REJECTED_NODELETE",
            Self::RejectedRemoteChanged => "REJECTED_REMOTE_CHANGED",
            Self::RejectedOtherReason => "REJECTED_OTHER_REASON",
            Self::NonExisting => "NON_EXISTING",
            Self::NotAttempted => "NOT_ATTEMPTED",
        }
    }

    /// Whether the ref ended in the state the push asked for.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Ok | Self::UpToDate)
    }
}

impl fmt::Display for RefUpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One remote ref touched by a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    /// Local ref that was pushed.
    pub local_ref: String,
    /// Remote ref that was targeted.
    pub remote_ref: String,
    /// Outcome.
    pub status: RefUpdateStatus,
    /// Reason reported by the remote, if any.
    pub message: Option<String>,
}

/// Version-control operations on one working tree.
///
/// Network operations take the [`TransportConfiguration`] built for the
/// current authentication mode; local ones need none.
#[async_trait]
pub trait VcsEngine: Send + Sync + fmt::Debug {
    /// Working tree this engine operates on.
    fn work_tree(&self) -> &Path;

    /// Clone `uri` into `directory`.
    async fn clone_repository(
        &self,
        uri: &str,
        directory: &Path,
        all_branches: bool,
        transport: &TransportConfiguration,
    ) -> Result<(), GitError>;

    /// Stage files matching `pattern`.
    async fn add(&self, pattern: &str) -> Result<(), GitError>;

    /// Summarize the working tree.
    async fn status(&self) -> Result<StatusSummary, GitError>;

    /// Record a commit; `all` also stages modified tracked files.
    async fn commit(
        &self,
        message: &str,
        all: bool,
        author: Option<&CommitAuthor>,
    ) -> Result<(), GitError>;

    /// Fetch from `remote` and integrate the current branch.
    async fn pull(
        &self,
        remote: &str,
        rebase: bool,
        transport: &TransportConfiguration,
    ) -> Result<PullOutcome, GitError>;

    /// Push to `remote`, every branch when `all` is set.
    async fn push(
        &self,
        remote: &str,
        all: bool,
        transport: &TransportConfiguration,
    ) -> Result<Vec<RefUpdate>, GitError>;

    /// Abort an in-progress rebase.
    async fn rebase_abort(&self) -> Result<(), GitError>;
}
