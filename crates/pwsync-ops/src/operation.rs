//! Git-level units of work.
//!
//! An [`OperationBuilder`] collects the parameters for one operation and
//! yields an immutable [`Operation`]. Executing consumes the operation, so
//! each one runs at most once.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use pwsync_core::config::CommitAuthor;
use pwsync_core::keyring_store::{SecretKind, SecretStore};
use pwsync_git::engine::VcsEngine;
use pwsync_git::transport::TransportConfiguration;
use tracing::{debug, info, instrument, warn};

use crate::caller::{Caller, CallerResult};
use crate::command::Command;
use crate::errors::OperationError;
use crate::executor::{AsyncExecutor, BatchReport, ExecutionFlags};

/// Remote every operation talks to.
pub const DEFAULT_REMOTE: &str = "origin";

/// Commit message of a sync.
pub const SYNC_COMMIT_MESSAGE: &str = "[pwsync] Sync";

/// Shown before every operation error.
pub const SYNC_ERROR_HINT: &str = "Error occurred during the sync operation. Check the FAQ for possible reasons why this error might occur.\n\nMessage from git:\n";

/// Kind of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Clone the remote.
    Clone,
    /// Pull from the remote.
    Pull,
    /// Push to the remote.
    Push,
    /// Commit local changes, pull, then push.
    Sync,
    /// Abort a stopped rebase.
    AbortRebase,
}

impl OperationKind {
    /// Short name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Clone => "clone",
            Self::Pull => "pull",
            Self::Push => "push",
            Self::Sync => "sync",
            Self::AbortRebase => "abort-rebase",
        }
    }

    fn progress_message(self) -> &'static str {
        match self {
            Self::Clone => "Cloning repository...",
            Self::Pull => "Pulling from remote...",
            Self::Push => "Pushing to remote...",
            Self::Sync => "Synchronizing with remote...",
            Self::AbortRebase => "Aborting rebase...",
        }
    }

    /// Push and sync errors keep the caller open so nothing entered is lost.
    fn finishes_on_error(self) -> bool {
        !matches!(self, Self::Push | Self::Sync)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A remembered secret to forget when the remote rejects it.
#[derive(Debug, Clone)]
pub struct RememberedSecret {
    /// Where it is stored.
    pub store: Arc<dyn SecretStore>,
    /// Remote host it belongs to.
    pub host: String,
    /// Which secret.
    pub kind: SecretKind,
}

impl RememberedSecret {
    fn forget(&self) {
        info!(host = %self.host, kind = %self.kind, "forgetting rejected credential");
        if let Err(e) = self.store.delete(&self.host, self.kind) {
            warn!("failed to forget {} for {}: {e:#}", self.kind, self.host);
        }
    }
}

/// How an executed operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Every command succeeded.
    Succeeded,
    /// A command failed with this message.
    Failed(String),
}

/// Fluent builder for an [`Operation`].
#[derive(Debug)]
pub struct OperationBuilder {
    kind: OperationKind,
    engine: Arc<dyn VcsEngine>,
    uri: Option<String>,
    remote: String,
    commit_message: String,
    author: Option<CommitAuthor>,
    transport: TransportConfiguration,
    flags: ExecutionFlags,
    remembered: Option<RememberedSecret>,
}

impl OperationBuilder {
    fn new(kind: OperationKind, engine: Arc<dyn VcsEngine>) -> Self {
        Self {
            kind,
            engine,
            uri: None,
            remote: DEFAULT_REMOTE.to_string(),
            commit_message: SYNC_COMMIT_MESSAGE.to_string(),
            author: None,
            transport: TransportConfiguration::none(),
            flags: ExecutionFlags::default(),
            remembered: None,
        }
    }

    /// Clone into the engine's working tree. Needs [`uri`](Self::uri).
    pub fn clone_repository(engine: Arc<dyn VcsEngine>) -> Self {
        Self::new(OperationKind::Clone, engine)
    }

    /// Pull with rebase.
    pub fn pull(engine: Arc<dyn VcsEngine>) -> Self {
        Self::new(OperationKind::Pull, engine)
    }

    /// Push every branch.
    pub fn push(engine: Arc<dyn VcsEngine>) -> Self {
        Self::new(OperationKind::Push, engine)
    }

    /// Add, commit if anything changed, pull, push.
    pub fn sync(engine: Arc<dyn VcsEngine>) -> Self {
        Self::new(OperationKind::Sync, engine)
    }

    /// Abort a stopped rebase.
    pub fn abort_rebase(engine: Arc<dyn VcsEngine>) -> Self {
        Self::new(OperationKind::AbortRebase, engine)
    }

    /// Start a builder for `kind`.
    pub fn for_kind(kind: OperationKind, engine: Arc<dyn VcsEngine>) -> Self {
        Self::new(kind, engine)
    }

    /// Remote URL to clone from.
    #[must_use]
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Remote name for pull and push.
    #[must_use]
    pub fn remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    /// Message of the sync commit.
    #[must_use]
    pub fn commit_message(mut self, message: impl Into<String>) -> Self {
        self.commit_message = message.into();
        self
    }

    /// Author of the sync commit.
    #[must_use]
    pub fn author(mut self, author: Option<CommitAuthor>) -> Self {
        self.author = author;
        self
    }

    /// Attach authentication, replacing any configured before.
    #[must_use]
    pub fn authentication(mut self, transport: TransportConfiguration) -> Self {
        self.transport = transport;
        self
    }

    /// Override the success side effects.
    #[must_use]
    pub fn flags(mut self, flags: ExecutionFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Forget this secret if the remote rejects the credentials.
    #[must_use]
    pub fn remember(mut self, secret: RememberedSecret) -> Self {
        self.remembered = Some(secret);
        self
    }

    /// Kind being built.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Working tree the operation acts on.
    pub fn work_tree(&self) -> &Path {
        self.engine.work_tree()
    }

    /// Finish the operation.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::NoCommand`] when no command can be built,
    /// such as a clone without a URI.
    pub fn build(self) -> Result<Operation, OperationError> {
        let pull = || Command::Pull {
            remote: self.remote.clone(),
            rebase: true,
        };
        let push = || Command::Push {
            remote: self.remote.clone(),
            all: true,
        };

        let commands = match self.kind {
            OperationKind::Clone => {
                let uri = self
                    .uri
                    .clone()
                    .filter(|u| !u.trim().is_empty())
                    .ok_or(OperationError::NoCommand(self.kind.name()))?;
                vec![Command::Clone {
                    uri,
                    directory: self.engine.work_tree().to_path_buf(),
                    all_branches: true,
                }]
            }
            OperationKind::Pull => vec![pull()],
            OperationKind::Push => vec![push()],
            OperationKind::Sync => vec![
                Command::Add {
                    pattern: ".".to_string(),
                },
                Command::Status,
                Command::Commit {
                    message: self.commit_message.clone(),
                    all: true,
                    author: self.author.clone(),
                },
                pull(),
                push(),
            ],
            OperationKind::AbortRebase => vec![Command::RebaseAbort],
        };

        Ok(Operation {
            kind: self.kind,
            engine: self.engine,
            commands,
            transport: self.transport,
            flags: self.flags,
            remembered: self.remembered,
        })
    }
}

/// A ready-to-run operation.
#[derive(Debug)]
pub struct Operation {
    kind: OperationKind,
    engine: Arc<dyn VcsEngine>,
    commands: Vec<Command>,
    transport: TransportConfiguration,
    flags: ExecutionFlags,
    remembered: Option<RememberedSecret>,
}

impl Operation {
    /// Kind of operation.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Commands in execution order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Authentication attached to the network commands.
    pub fn transport(&self) -> &TransportConfiguration {
        &self.transport
    }

    /// Run the batch on a worker task and report the result to `caller`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the worker task itself fails; command
    /// failures are reported through the caller and the outcome.
    #[instrument(skip_all, fields(kind = %self.kind))]
    pub async fn execute(self, caller: &dyn Caller) -> Result<OperationOutcome, OperationError> {
        caller.progress(self.kind.progress_message());

        let executor = AsyncExecutor::new(Arc::clone(&self.engine), self.transport.clone());
        let report: BatchReport = executor
            .spawn(self.commands.clone())
            .await
            .map_err(|e| OperationError::Join(e.to_string()))?;
        debug!(ran = ?report.ran, skipped = ?report.skipped, "batch finished");

        match report.error {
            Some(message) => {
                if report.auth_failure {
                    if let Some(secret) = &self.remembered {
                        secret.forget();
                    }
                }
                self.on_error(caller, &message);
                Ok(OperationOutcome::Failed(message))
            }
            None => {
                self.on_success();
                if self.flags.finish_on_success {
                    caller.finish(CallerResult::Ok);
                }
                if self.flags.refresh_on_success {
                    caller.refresh_list();
                }
                Ok(OperationOutcome::Succeeded)
            }
        }
    }

    fn on_success(&self) {
        info!(kind = %self.kind, "operation succeeded");
    }

    fn on_error(&self, caller: &dyn Caller, message: &str) {
        warn!(kind = %self.kind, "operation failed: {message}");
        caller.show_error(&format!("{SYNC_ERROR_HINT}{message}"));
        if self.kind.finishes_on_error() {
            caller.finish(CallerResult::Cancelled);
        }
    }
}

/// What occupies a clone target directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneTarget {
    /// Missing or empty.
    Empty,
    /// Holds nothing but a `.git` directory.
    OnlyGitDir,
    /// Holds other files.
    NonEmpty,
}

/// Inspect a directory before cloning into it.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be read.
pub fn inspect_clone_target(dir: &Path) -> io::Result<CloneTarget> {
    if !dir.exists() {
        return Ok(CloneTarget::Empty);
    }
    let names: Vec<_> = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.file_name()))
        .collect::<Result<_, _>>()?;
    Ok(match names.as_slice() {
        [] => CloneTarget::Empty,
        [only] if only == ".git" => CloneTarget::OnlyGitDir,
        _ => CloneTarget::NonEmpty,
    })
}
