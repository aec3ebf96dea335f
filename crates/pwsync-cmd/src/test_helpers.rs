//! Shared test utilities for command testing.
//!
//! Provides a factory wired to in-memory settings, stub prompter and
//! launcher, and a git engine that records what it was asked to do.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use pwsync_core::config::{
    CommitAuthor, MemorySettings, REPOSITORY_PATH, SSH_KEY_PATH, Settings,
};
use pwsync_core::iostreams::TestOutput;
use pwsync_core::keyring_store::MemorySecretStore;
use pwsync_core::launcher::StubLauncher;
use pwsync_core::prompter::StubPrompter;
use pwsync_git::engine::{PullOutcome, RebaseStatus, RefUpdate, StatusSummary, VcsEngine};
use pwsync_git::errors::GitError;
use pwsync_git::transport::TransportConfiguration;
use tempfile::TempDir;

use crate::factory::Factory;

/// Engine that succeeds at everything and records each call.
#[derive(Debug)]
pub struct RecordingEngine {
    work_tree: PathBuf,
    calls: Mutex<Vec<String>>,
}

impl RecordingEngine {
    /// Create an engine for `work_tree`.
    pub fn new(work_tree: &Path) -> Self {
        Self {
            work_tree: work_tree.to_path_buf(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Calls made so far, by name.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: &str) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.to_string());
    }
}

#[async_trait]
impl VcsEngine for RecordingEngine {
    fn work_tree(&self) -> &Path {
        &self.work_tree
    }

    async fn clone_repository(
        &self,
        _uri: &str,
        _directory: &Path,
        _all_branches: bool,
        _transport: &TransportConfiguration,
    ) -> Result<(), GitError> {
        self.record("clone");
        Ok(())
    }

    async fn add(&self, _pattern: &str) -> Result<(), GitError> {
        self.record("add");
        Ok(())
    }

    async fn status(&self) -> Result<StatusSummary, GitError> {
        self.record("status");
        Ok(StatusSummary::default())
    }

    async fn commit(
        &self,
        _message: &str,
        _all: bool,
        _author: Option<&CommitAuthor>,
    ) -> Result<(), GitError> {
        self.record("commit");
        Ok(())
    }

    async fn pull(
        &self,
        _remote: &str,
        _rebase: bool,
        _transport: &TransportConfiguration,
    ) -> Result<PullOutcome, GitError> {
        self.record("pull");
        Ok(PullOutcome {
            rebase: RebaseStatus::UpToDate,
        })
    }

    async fn push(
        &self,
        _remote: &str,
        _all: bool,
        _transport: &TransportConfiguration,
    ) -> Result<Vec<RefUpdate>, GitError> {
        self.record("push");
        Ok(Vec::new())
    }

    async fn rebase_abort(&self) -> Result<(), GitError> {
        self.record("rebase-abort");
        Ok(())
    }
}

/// A fully-configured test harness with factory, output capture, and stubs.
#[derive(Debug)]
pub struct TestHarness {
    /// The factory configured for testing.
    pub factory: Factory,
    /// Captured stdout/stderr output.
    pub output: TestOutput,
    /// Stub prompter for providing test answers.
    pub prompter: Arc<StubPrompter>,
    /// Stub launcher for verifying opened interactions.
    pub launcher: Arc<StubLauncher>,
    /// Engine every operation runs against.
    pub engine: Arc<RecordingEngine>,
    /// Holds the store directory.
    pub dir: TempDir,
}

impl TestHarness {
    /// Create a harness with default settings.
    pub fn new() -> Self {
        Self::with_settings(MemorySettings::new())
    }

    /// Create a harness with custom settings. The store and key paths point
    /// into a temporary directory unless `settings` overrides them.
    pub fn with_settings(settings: MemorySettings) -> Self {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("store");
        let key = dir.path().join("ssh_key");

        let mut settings = settings;
        if settings.get(REPOSITORY_PATH).is_none() {
            settings = settings.with(REPOSITORY_PATH, &store.display().to_string());
        }
        if settings.get(SSH_KEY_PATH).is_none() {
            settings = settings.with(SSH_KEY_PATH, &key.display().to_string());
        }

        let engine = Arc::new(RecordingEngine::new(&store));
        let shared = Arc::clone(&engine);

        let (factory, output) = Factory::test();
        let (factory, prompter) = factory.with_stub_prompter();
        let (factory, launcher) = factory.with_stub_launcher();
        let factory = factory
            .with_settings(Box::new(settings))
            .with_secret_store(Arc::new(MemorySecretStore::default()))
            .with_engines(Arc::new(move |_: &Path| {
                Ok(Arc::clone(&shared) as Arc<dyn VcsEngine>)
            }));

        Self {
            factory,
            output,
            prompter,
            launcher,
            engine,
            dir,
        }
    }

    /// Get captured stdout as a string.
    pub fn stdout(&self) -> String {
        self.output.stdout()
    }

    /// Get captured stderr as a string.
    pub fn stderr(&self) -> String {
        self.output.stderr()
    }

    /// Queue an answer for the next password prompt.
    pub fn answer_password(&self, answer: &str) {
        self.prompter
            .password_answers
            .lock()
            .unwrap()
            .push(answer.to_string());
    }

    /// Queue an answer for the next confirmation prompt.
    pub fn answer_confirm(&self, answer: bool) {
        self.prompter.confirm_answers.lock().unwrap().push(answer);
    }
}
