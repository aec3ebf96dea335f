//! Factory for shared command dependencies.
//!
//! Provides lazy initialization of settings and builds the orchestrator
//! with the real terminal, keyring, and git backends. Supports test mode
//! with dependency injection for isolated testing.

use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use pwsync_core::config::{AGENT_COMMAND, FileSettings, LAUNCHER, Settings, SharedSettings};
use pwsync_core::iostreams::{IOStreams, TestOutput};
use pwsync_core::keyring_store::{KeyringStore, SecretStore};
use pwsync_core::launcher::{Launcher, StubLauncher, SystemLauncher};
use pwsync_core::prompter::{DialoguerPrompter, Prompter, StubPrompter};
use pwsync_git::engine::VcsEngine;
use pwsync_git::repository;
use pwsync_ops::caller::Caller;
use pwsync_ops::orchestrator::{EngineFactory, Orchestrator};
use pwsync_ops::process_agent::ProcessAgentConnector;

/// Environment variable that turns off interactive prompts.
pub const PROMPT_DISABLED_ENV: &str = "PWSYNC_PROMPT_DISABLED";

/// Shared factory providing lazily-initialized dependencies to all commands.
///
/// In production mode, dependencies are created from the real system.
/// In test mode, dependencies can be injected for isolated testing.
pub struct Factory {
    /// Application version.
    pub app_version: String,
    /// I/O streams.
    pub io: Arc<IOStreams>,
    /// Settings (lazily loaded).
    settings: OnceLock<SharedSettings>,

    // Test overrides
    prompter_stub: Option<Arc<StubPrompter>>,
    launcher_stub: Option<Arc<StubLauncher>>,
    secrets_override: Option<Arc<dyn SecretStore>>,
    engines_override: Option<EngineFactory>,
}

impl std::fmt::Debug for Factory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("app_version", &self.app_version)
            .finish_non_exhaustive()
    }
}

impl Factory {
    /// Create a new factory with the given version.
    pub fn new(app_version: String) -> Self {
        let mut io = IOStreams::system();

        if std::env::var(PROMPT_DISABLED_ENV).is_ok() {
            io.set_never_prompt(true);
        }

        Self::with_io(app_version, io)
    }

    /// Create a test factory with captured I/O.
    ///
    /// Returns the factory and a `TestOutput` for reading captured
    /// stdout/stderr.
    pub fn test() -> (Self, TestOutput) {
        let (io, output) = IOStreams::test_with_output();
        (Self::with_io("test".to_string(), io), output)
    }

    fn with_io(app_version: String, io: IOStreams) -> Self {
        Self {
            app_version,
            io: Arc::new(io),
            settings: OnceLock::new(),
            prompter_stub: None,
            launcher_stub: None,
            secrets_override: None,
            engines_override: None,
        }
    }

    /// Set a settings override for testing.
    #[must_use]
    pub fn with_settings(self, settings: Box<dyn Settings>) -> Self {
        let _ = self.settings.set(Arc::new(Mutex::new(settings)));
        self
    }

    /// Set a stub prompter and return the shared reference for configuration.
    pub fn with_stub_prompter(mut self) -> (Self, Arc<StubPrompter>) {
        let stub = Arc::new(StubPrompter::default());
        self.prompter_stub = Some(stub.clone());
        (self, stub)
    }

    /// Set a stub launcher and return the shared reference for verification.
    pub fn with_stub_launcher(mut self) -> (Self, Arc<StubLauncher>) {
        let stub = Arc::new(StubLauncher::default());
        self.launcher_stub = Some(stub.clone());
        (self, stub)
    }

    /// Replace the keyring with another secret store.
    #[must_use]
    pub fn with_secret_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.secrets_override = Some(store);
        self
    }

    /// Replace the git backend.
    #[must_use]
    pub fn with_engines(mut self, engines: EngineFactory) -> Self {
        self.engines_override = Some(engines);
        self
    }

    /// Get the settings, loading them if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings file cannot be loaded.
    pub fn settings(&self) -> anyhow::Result<SharedSettings> {
        if let Some(settings) = self.settings.get() {
            return Ok(Arc::clone(settings));
        }
        let loaded: Box<dyn Settings> = Box::new(FileSettings::load()?);
        // Ignore set error - another thread may have set it first
        let _ = self.settings.set(Arc::new(Mutex::new(loaded)));
        self.settings
            .get()
            .map(Arc::clone)
            .ok_or_else(|| anyhow::anyhow!("failed to initialize settings"))
    }

    /// Read one setting, with its default.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be loaded.
    pub fn setting(&self, key: &str) -> anyhow::Result<String> {
        let settings = self.settings()?;
        let guard = settings
            .lock()
            .map_err(|e| anyhow::anyhow!("settings lock: {e}"))?;
        Ok(guard.get_or_default(key))
    }

    /// Create a prompter instance.
    ///
    /// In test mode with a stub prompter, returns the stub.
    pub fn prompter(&self) -> Arc<dyn Prompter> {
        if let Some(ref stub) = self.prompter_stub {
            return stub.clone();
        }
        Arc::new(DialoguerPrompter::new())
    }

    /// Create the launcher for agent interactions, honoring the `launcher`
    /// setting.
    pub fn launcher(&self) -> Arc<dyn Launcher> {
        if let Some(ref stub) = self.launcher_stub {
            return stub.clone();
        }
        match self.setting(LAUNCHER) {
            Ok(program) => Arc::new(SystemLauncher::with_program(program)),
            Err(_) => Arc::new(SystemLauncher::new()),
        }
    }

    /// Store for remembered credentials.
    pub fn secret_store(&self) -> Arc<dyn SecretStore> {
        match &self.secrets_override {
            Some(store) => Arc::clone(store),
            None => Arc::new(KeyringStore),
        }
    }

    /// Git backend opening the working tree at a path.
    pub fn engines(&self) -> EngineFactory {
        if let Some(ref engines) = self.engines_override {
            return Arc::clone(engines);
        }
        Arc::new(|work_tree: &Path| {
            repository::open(work_tree).map(|client| client as Arc<dyn VcsEngine>)
        })
    }

    /// Build an orchestrator reporting to `caller`.
    ///
    /// The signing agent is attached when `agent_command` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be loaded.
    pub fn orchestrator(&self, caller: Arc<dyn Caller>) -> anyhow::Result<Orchestrator> {
        let settings = self.settings()?;
        let agent_command = self.setting(AGENT_COMMAND)?;

        let mut orchestrator = Orchestrator::new(
            settings,
            self.engines(),
            self.prompter(),
            self.launcher(),
            caller,
        )
        .with_secret_store(self.secret_store());
        if !agent_command.trim().is_empty() {
            let connector = ProcessAgentConnector::new(agent_command);
            orchestrator = orchestrator.with_agent(Arc::new(connector));
        }
        Ok(orchestrator)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use pwsync_core::config::{MemorySettings, REMOTE_SERVER, REPOSITORY_PATH};

    use super::*;

    #[test]
    fn test_should_read_injected_settings() {
        let (factory, _output) = Factory::test();
        let factory = factory.with_settings(Box::new(
            MemorySettings::new().with(REMOTE_SERVER, "git.example.com"),
        ));

        assert_eq!(factory.setting(REMOTE_SERVER).unwrap(), "git.example.com");
    }

    #[test]
    fn test_should_share_settings_between_calls() {
        let (factory, _output) = Factory::test();
        let factory = factory.with_settings(Box::new(MemorySettings::new()));

        let first = factory.settings().unwrap();
        first
            .lock()
            .unwrap()
            .set(REPOSITORY_PATH, "/tmp/store")
            .unwrap();

        assert_eq!(factory.setting(REPOSITORY_PATH).unwrap(), "/tmp/store");
    }

    #[test]
    fn test_should_hand_out_stub_launcher() {
        let (factory, _output) = Factory::test();
        let (factory, stub) = factory.with_stub_launcher();

        factory.launcher().open("https://agent.example/approve").unwrap();

        assert_eq!(stub.opened(), vec!["https://agent.example/approve"]);
    }
}
