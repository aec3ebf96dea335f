//! Git client that wraps the git command-line tool.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use pwsync_core::config::CommitAuthor;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::engine::{
    PullOutcome, RebaseStatus, RefUpdate, RefUpdateStatus, StatusSummary, VcsEngine,
};
use crate::errors::GitError;
use crate::transport::TransportConfiguration;

/// Client for executing git commands in one working tree.
#[derive(Debug, Clone)]
pub struct GitClient {
    /// Path to the git binary.
    git_path: PathBuf,
    /// Working tree git commands run in.
    work_tree: PathBuf,
    /// Executable git calls back into for credentials.
    helper_path: PathBuf,
}

impl GitClient {
    /// Create a client for `work_tree` using the system git.
    ///
    /// # Errors
    ///
    /// Returns an error if git is not found in PATH.
    pub fn new(work_tree: impl Into<PathBuf>) -> Result<Self, GitError> {
        let git_path = which::which("git").map_err(|_| GitError::NotFound)?;
        let helper_path = std::env::current_exe()?;

        Ok(Self {
            git_path,
            work_tree: work_tree.into(),
            helper_path,
        })
    }

    /// Run git and return its raw output without checking the status.
    #[instrument(skip(self, transport), fields(args = ?args))]
    async fn output(
        &self,
        args: &[&str],
        transport: Option<&TransportConfiguration>,
        in_work_tree: bool,
    ) -> Result<Output, GitError> {
        let session = transport
            .map(|t| t.prepare(&self.helper_path))
            .transpose()?;

        let mut cmd = Command::new(&self.git_path);
        if let Some(session) = &session {
            cmd.args(session.git_args());
            session.apply(&mut cmd);
        }
        cmd.args(args);
        if in_work_tree {
            cmd.current_dir(&self.work_tree);
        }
        // Outcomes are read from git's English messages.
        cmd.env("LC_ALL", "C");
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        // The session (and any agent socket) must outlive the child.
        let output = cmd.output().await?;
        drop(session);
        Ok(output)
    }

    /// Run git in the working tree and return trimmed stdout.
    async fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.output(args, None, true).await?;
        check(args, &output)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Get the current branch name.
    ///
    /// # Errors
    ///
    /// Returns an error if HEAD is detached or git fails.
    pub async fn current_branch(&self) -> Result<String, GitError> {
        let output = self.run(&["symbolic-ref", "--quiet", "--short", "HEAD"]).await?;
        Ok(first_line(&output).to_string())
    }

    /// Whether a rebase is in progress.
    ///
    /// # Errors
    ///
    /// Returns an error if git fails.
    pub async fn is_rebasing(&self) -> Result<bool, GitError> {
        for dir in ["rebase-merge", "rebase-apply"] {
            let path = self.run(&["rev-parse", "--git-path", dir]).await?;
            if self.work_tree.join(path).exists() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl VcsEngine for GitClient {
    fn work_tree(&self) -> &Path {
        &self.work_tree
    }

    async fn clone_repository(
        &self,
        uri: &str,
        directory: &Path,
        all_branches: bool,
        transport: &TransportConfiguration,
    ) -> Result<(), GitError> {
        let dir = directory.to_string_lossy();
        let mut args = vec!["clone"];
        if all_branches {
            args.push("--no-single-branch");
        }
        args.extend(["--", uri, dir.as_ref()]);

        let output = self.output(&args, Some(transport), false).await?;
        check(&args, &output)
    }

    async fn add(&self, pattern: &str) -> Result<(), GitError> {
        self.run(&["add", "--", pattern]).await.map(drop)
    }

    async fn status(&self) -> Result<StatusSummary, GitError> {
        let output = self.run(&["status", "--porcelain"]).await?;
        Ok(parse_status(&output))
    }

    async fn commit(
        &self,
        message: &str,
        all: bool,
        author: Option<&CommitAuthor>,
    ) -> Result<(), GitError> {
        let identity = author.map(|a| {
            [
                format!("user.name={}", a.name),
                format!("user.email={}", a.email),
            ]
        });
        let mut args: Vec<&str> = Vec::new();
        if let Some([name, email]) = &identity {
            args.extend(["-c", name.as_str(), "-c", email.as_str()]);
        }
        args.push("commit");
        if all {
            args.push("--all");
        }
        args.extend(["-m", message]);
        self.run(&args).await.map(drop)
    }

    async fn pull(
        &self,
        remote: &str,
        rebase: bool,
        transport: &TransportConfiguration,
    ) -> Result<PullOutcome, GitError> {
        let branch = self.current_branch().await?;
        let rebase_flag = if rebase { "--rebase" } else { "--no-rebase" };
        let args = ["pull", rebase_flag, remote, branch.as_str()];

        let output = self.output(&args, Some(transport), true).await?;
        if !output.status.success() {
            if rebase && self.is_rebasing().await? {
                debug!("pull stopped with a rebase in progress");
                return Ok(PullOutcome {
                    rebase: RebaseStatus::Stopped,
                });
            }
            // A new, empty remote has no branch to pull yet; the push that
            // follows creates it.
            if is_missing_remote_ref(&output.stderr) {
                debug!(%branch, "remote has no such branch yet, nothing to pull");
                return Ok(PullOutcome {
                    rebase: RebaseStatus::UpToDate,
                });
            }
            check(&args, &output)?;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(PullOutcome {
            rebase: parse_pull_output(&stdout),
        })
    }

    async fn push(
        &self,
        remote: &str,
        all: bool,
        transport: &TransportConfiguration,
    ) -> Result<Vec<RefUpdate>, GitError> {
        let mut args = vec!["push", "--porcelain"];
        if all {
            args.push("--all");
        }
        args.push(remote);

        let output = self.output(&args, Some(transport), true).await?;
        let updates = parse_push_porcelain(&String::from_utf8_lossy(&output.stdout));
        if updates.is_empty() {
            check(&args, &output)?;
        }
        Ok(updates)
    }

    async fn rebase_abort(&self) -> Result<(), GitError> {
        self.run(&["rebase", "--abort"]).await.map(drop)
    }
}

fn check(args: &[&str], output: &Output) -> Result<(), GitError> {
    if output.status.success() {
        return Ok(());
    }
    let command = args
        .iter()
        .find(|a| !a.starts_with('-') && !a.contains('='))
        .copied()
        .unwrap_or_default();
    let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if stderr.trim().is_empty() {
        stderr = String::from_utf8_lossy(&output.stdout).into_owned();
    }
    Err(GitError::from_stderr(command, &stderr, output.status.code()))
}

/// Summarize `git status --porcelain` output.
pub fn parse_status(output: &str) -> StatusSummary {
    let mut summary = StatusSummary::default();
    for line in output.lines() {
        let mut chars = line.chars();
        let (Some(index), Some(worktree)) = (chars.next(), chars.next()) else {
            continue;
        };
        match (index, worktree) {
            ('?', '?') => summary.untracked += 1,
            ('!', '!') => {}
            (_, 'D') if index == ' ' => summary.missing += 1,
            _ => summary.changed += 1,
        }
    }
    summary
}

/// Rebase outcome of a successful pull, from its stdout.
pub fn parse_pull_output(stdout: &str) -> RebaseStatus {
    if stdout.contains("Already up to date") || stdout.contains("Already up-to-date") {
        RebaseStatus::UpToDate
    } else if stdout.contains("Fast-forward") {
        RebaseStatus::FastForward
    } else {
        RebaseStatus::Ok
    }
}

/// Parse `git push --porcelain` output into per-ref results.
///
/// Ref lines have the shape `<flag>\t<from>:<to>\t<summary> (<reason>)`.
pub fn parse_push_porcelain(output: &str) -> Vec<RefUpdate> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(3, '\t');
            let flag = fields.next()?.chars().next()?;
            let refs = fields.next()?;
            let summary = fields.next().unwrap_or_default().trim();
            let (local_ref, remote_ref) = refs.split_once(':')?;
            let (status, message) = classify_ref_line(flag, summary)?;
            Some(RefUpdate {
                local_ref: local_ref.to_string(),
                remote_ref: remote_ref.to_string(),
                status,
                message,
            })
        })
        .collect()
}

fn classify_ref_line(flag: char, summary: &str) -> Option<(RefUpdateStatus, Option<String>)> {
    let reason = summary
        .rfind('(')
        .and_then(|start| summary[start + 1..].strip_suffix(')'))
        .map(str::to_string);

    let status = match flag {
        ' ' | '+' | '-' | '*' => RefUpdateStatus::Ok,
        '=' => RefUpdateStatus::UpToDate,
        '!' => {
            let reason = reason.as_deref().unwrap_or_default();
            if summary.starts_with("[remote rejected]") {
                if reason.contains("deletion prohibited") {
                    RefUpdateStatus::RejectedNoDelete
                } else {
                    let message = if reason.starts_with("denying non-fast-forward") {
                        "non-fast-forward".to_string()
                    } else {
                        reason.to_string()
                    };
                    return Some((RefUpdateStatus::RejectedOtherReason, Some(message)));
                }
            } else if summary.starts_with("[no match]") {
                RefUpdateStatus::NonExisting
            } else if summary.contains("atomic push failed") {
                RefUpdateStatus::NotAttempted
            } else if summary.starts_with("[rejected]") {
                match reason {
                    "non-fast-forward" | "fetch first" => RefUpdateStatus::RejectedNonFastForward,
                    "stale info" => RefUpdateStatus::RejectedRemoteChanged,
                    _ => RefUpdateStatus::RejectedOtherReason,
                }
            } else {
                RefUpdateStatus::RejectedOtherReason
            }
        }
        _ => return None,
    };
    Some((status, reason))
}

fn is_missing_remote_ref(stderr: &[u8]) -> bool {
    String::from_utf8_lossy(stderr).contains("couldn't find remote ref")
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}
