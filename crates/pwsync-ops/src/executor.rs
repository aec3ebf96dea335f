//! Runs command batches off the calling task and classifies the outcome.
//!
//! Commands run strictly in order and the batch stops at the first failure.
//! Earlier commands are not rolled back: a sync whose pull fails keeps the
//! local commit it already made.

use std::sync::Arc;

use pwsync_git::engine::{RefUpdate, RefUpdateStatus, StatusSummary, VcsEngine};
use pwsync_git::errors::GitError;
use pwsync_git::transport::TransportConfiguration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::command::Command;

/// Push rejected because the remote has commits the local branch lacks.
pub const PUSH_NON_FAST_FORWARD_MESSAGE: &str = "Push was rejected by remote, run pull before pushing again. You can use Sync rather than pull/push as it implements both";

/// Prefix of every other push rejection.
pub const PUSH_REJECTED_PREFIX: &str = "Push was rejected by remote, reason: ";

/// Remote configured to refuse non-fast-forward updates.
pub const PUSH_DENIED_NON_FAST_FORWARD_MESSAGE: &str = "Remote rejected non-fast-forward push. Check receive.denyNonFastForwards variable in config file of destination repository.";

/// Pull left the repository mid-rebase.
pub const PULL_REBASE_STOPPED_MESSAGE: &str = "Pull failed: the rebase stopped, most likely on a conflict. Run abort-rebase to return the repository to a clean state, then sync again.";

/// What a batch did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Commands invoked, in order, including a failing one.
    pub ran: Vec<&'static str>,
    /// Commands skipped.
    pub skipped: Vec<&'static str>,
    /// Error message of the failing command.
    pub error: Option<String>,
    /// Whether the failure looks like rejected credentials.
    pub auth_failure: bool,
}

impl BatchReport {
    /// Whether every command succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Side effects to trigger on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionFlags {
    /// Finish the caller with [`CallerResult::Ok`](crate::caller::CallerResult::Ok).
    pub finish_on_success: bool,
    /// Refresh the caller's listing.
    pub refresh_on_success: bool,
}

impl Default for ExecutionFlags {
    fn default() -> Self {
        Self {
            finish_on_success: true,
            refresh_on_success: true,
        }
    }
}

enum Step {
    Done,
    Skipped,
}

struct Failure {
    message: String,
    auth: bool,
}

impl From<GitError> for Failure {
    fn from(err: GitError) -> Self {
        Self {
            auth: err.is_authentication_failure(),
            message: err.detailed_message(),
        }
    }
}

impl From<&str> for Failure {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
            auth: false,
        }
    }
}

/// Runs a batch against one engine with one transport configuration.
#[derive(Debug, Clone)]
pub struct AsyncExecutor {
    engine: Arc<dyn VcsEngine>,
    transport: TransportConfiguration,
}

impl AsyncExecutor {
    /// Create an executor.
    pub fn new(engine: Arc<dyn VcsEngine>, transport: TransportConfiguration) -> Self {
        Self { engine, transport }
    }

    /// Run `commands` on a new task.
    pub fn spawn(self, commands: Vec<Command>) -> JoinHandle<BatchReport> {
        tokio::spawn(async move { self.run(&commands).await })
    }

    /// Run `commands` in order, stopping at the first failure.
    #[instrument(skip_all, fields(commands = commands.len()))]
    pub async fn run(&self, commands: &[Command]) -> BatchReport {
        let mut report = BatchReport::default();
        let mut status: Option<StatusSummary> = None;

        for command in commands {
            match self.run_one(command, &mut status).await {
                Ok(Step::Done) => report.ran.push(command.name()),
                Ok(Step::Skipped) => {
                    debug!(command = command.name(), "skipped");
                    report.skipped.push(command.name());
                }
                Err(failure) => {
                    info!(command = command.name(), "batch stopped: {}", failure.message);
                    report.ran.push(command.name());
                    report.error = Some(failure.message);
                    report.auth_failure = failure.auth;
                    break;
                }
            }
        }
        report
    }

    async fn run_one(
        &self,
        command: &Command,
        status: &mut Option<StatusSummary>,
    ) -> Result<Step, Failure> {
        let engine = self.engine.as_ref();
        match command {
            Command::Clone {
                uri,
                directory,
                all_branches,
            } => {
                engine
                    .clone_repository(uri, directory, *all_branches, &self.transport)
                    .await?;
            }
            Command::Add { pattern } => engine.add(pattern).await?,
            Command::Status => {
                let summary = engine.status().await?;
                debug!(changed = summary.changed, missing = summary.missing, "status");
                *status = Some(summary);
            }
            Command::Commit {
                message,
                all,
                author,
            } => {
                if status.is_some_and(|s| s.change_count() == 0) {
                    return Ok(Step::Skipped);
                }
                engine.commit(message, *all, author.as_ref()).await?;
            }
            Command::Pull { remote, rebase } => {
                let outcome = engine.pull(remote, *rebase, &self.transport).await?;
                if outcome.is_stopped() {
                    return Err(PULL_REBASE_STOPPED_MESSAGE.into());
                }
            }
            Command::Push { remote, all } => {
                let updates = engine.push(remote, *all, &self.transport).await?;
                let messages: Vec<String> = updates.iter().filter_map(push_rejection).collect();
                if !messages.is_empty() {
                    return Err(messages.join("\n").as_str().into());
                }
            }
            Command::RebaseAbort => engine.rebase_abort().await?,
        }
        Ok(Step::Done)
    }
}

/// User-facing message for a rejected ref, `None` when it was accepted.
pub fn push_rejection(update: &RefUpdate) -> Option<String> {
    let message = match update.status {
        RefUpdateStatus::Ok | RefUpdateStatus::UpToDate => return None,
        RefUpdateStatus::RejectedNonFastForward => PUSH_NON_FAST_FORWARD_MESSAGE.to_string(),
        RefUpdateStatus::RejectedNoDelete
        | RefUpdateStatus::RejectedRemoteChanged
        | RefUpdateStatus::NonExisting
        | RefUpdateStatus::NotAttempted => {
            format!("{PUSH_REJECTED_PREFIX}{}", update.status.name())
        }
        RefUpdateStatus::RejectedOtherReason => match update.message.as_deref() {
            Some("non-fast-forward") => PUSH_DENIED_NON_FAST_FORWARD_MESSAGE.to_string(),
            Some(reason) => format!("{PUSH_REJECTED_PREFIX}{reason}"),
            None => format!("{PUSH_REJECTED_PREFIX}{}", update.status.name()),
        },
    };
    Some(message)
}
