//! Authentication orchestration.
//!
//! The [`Orchestrator`] turns an [`OperationCode`] into an executed
//! [`Operation`](crate::operation::Operation), first obtaining whatever the
//! configured connection mode needs: a key file (maybe provisioning one and
//! unlocking it), a password, or an identity negotiated with the external
//! signing agent.
//!
//! Agent negotiation and agent signatures can need the user. Those steps
//! return [`LaunchOutcome::Suspended`]; the front end lets the user complete
//! the interaction and then calls [`Orchestrator::relay_result`] with the
//! suspension's request code. An operation waiting on a signature stays in
//! flight across the round trip.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use pwsync_core::cmdutil::is_user_cancellation;
use pwsync_core::config::{
    AGENT_TIMEOUT, CommitAuthor, ConnectionMode, Protocol, REMEMBER_CREDENTIALS, REPOSITORY_PATH,
    RemoteSettings, SSH_HOST_KEY_CHECKING, SSH_KEY_PATH, Settings, SharedSettings,
};
use pwsync_core::errors::ConfigError;
use pwsync_core::keyring_store::{SecretKind, SecretStore};
use pwsync_core::launcher::Launcher;
use pwsync_core::prompter::Prompter;
use pwsync_git::engine::VcsEngine;
use pwsync_git::errors::GitError;
use pwsync_git::remote_url::remote_url;
use pwsync_git::transport::{HostKeyPolicy, TransportConfiguration};
use secrecy::SecretString;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::caller::{Caller, CallerResult};
use crate::errors::{AgentError, OperationError, OrchestratorError};
use crate::identity::{
    AgentConnector, AgentPayload, ApiIdentity, BuildStep, IdentityBuilder, PendingInteraction,
    REQUEST_SIGN,
};
use crate::operation::{
    CloneTarget, OperationBuilder, OperationKind, OperationOutcome, RememberedSecret,
    inspect_clone_target,
};
use crate::ssh_key::{self, KeyState};

/// Operations the front end can launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationCode {
    /// Clone the remote into the store directory.
    Clone,
    /// Pull with rebase.
    Pull,
    /// Push every branch.
    Push,
    /// Commit, pull, push.
    Sync,
    /// Abort a stopped rebase.
    AbortRebase,
    /// Clone again after an SSH key was provisioned.
    RetryCloneWithKey,
}

impl OperationCode {
    /// Integer code results are relayed with.
    pub fn request_code(self) -> i32 {
        match self {
            Self::Clone => 1,
            Self::Pull => 2,
            Self::Push => 3,
            Self::Sync => 4,
            Self::AbortRebase => 5,
            Self::RetryCloneWithKey => 6,
        }
    }

    /// Operation for a relayed request code.
    pub fn from_request_code(code: i32) -> Option<Self> {
        [
            Self::Clone,
            Self::Pull,
            Self::Push,
            Self::Sync,
            Self::AbortRebase,
            Self::RetryCloneWithKey,
        ]
        .into_iter()
        .find(|c| c.request_code() == code)
    }

    /// Kind of operation launched for this code.
    pub fn kind(self) -> OperationKind {
        match self {
            Self::Clone | Self::RetryCloneWithKey => OperationKind::Clone,
            Self::Pull => OperationKind::Pull,
            Self::Push => OperationKind::Push,
            Self::Sync => OperationKind::Sync,
            Self::AbortRebase => OperationKind::AbortRebase,
        }
    }

    fn after_key_provisioning(self) -> Self {
        match self {
            Self::Clone => Self::RetryCloneWithKey,
            other => other,
        }
    }
}

/// How the user left an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// Completed.
    Ok,
    /// Abandoned.
    Cancelled,
}

/// Where a launch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// The operation ran.
    Finished(OperationOutcome),
    /// Waiting on the user; relay the result with the interaction's code.
    Suspended(PendingInteraction),
    /// The user cancelled; nothing more runs.
    Cancelled,
    /// An unexpected error stopped the launch. It was shown to the caller.
    Aborted(String),
}

/// What the configured connection mode needs to authenticate an operation.
#[derive(Debug, Clone)]
pub struct Authentication {
    /// Configured connection mode.
    pub mode: ConnectionMode,
    /// Remote protocol.
    pub protocol: Protocol,
    /// Remote host, scope of remembered secrets.
    pub host: String,
    /// Account on the remote.
    pub username: String,
    /// Private key for ssh-key mode.
    pub key_path: PathBuf,
    /// Identity for agent mode.
    pub identity: Option<Arc<ApiIdentity>>,
    /// How ssh checks the server's host key.
    pub host_keys: HostKeyPolicy,
}

/// Opens the working tree handle for a directory.
pub type EngineFactory =
    Arc<dyn Fn(&Path) -> Result<Arc<dyn VcsEngine>, GitError> + Send + Sync>;

type InFlight = Pin<Box<dyn Future<Output = Result<OperationOutcome, OperationError>> + Send>>;

enum Next {
    Done(LaunchOutcome),
    Relaunch(OperationCode),
}

enum Event {
    Completed(Result<OperationOutcome, OperationError>),
    Interaction(PendingInteraction),
}

/// Drives operations through authentication.
pub struct Orchestrator {
    settings: SharedSettings,
    engines: EngineFactory,
    prompter: Arc<dyn Prompter>,
    launcher: Arc<dyn Launcher>,
    caller: Arc<dyn Caller>,
    connector: Option<Arc<dyn AgentConnector>>,
    secrets: Option<Arc<dyn SecretStore>>,
    builder: Option<IdentityBuilder>,
    identity: Option<Arc<ApiIdentity>>,
    in_flight: Option<InFlight>,
    awaiting: Option<PendingInteraction>,
    interactions_tx: mpsc::UnboundedSender<PendingInteraction>,
    interactions: mpsc::UnboundedReceiver<PendingInteraction>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("builder", &self.builder)
            .field("identity", &self.identity)
            .field("in_flight", &self.in_flight.is_some())
            .field("awaiting", &self.awaiting)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator reporting to `caller`.
    pub fn new(
        settings: SharedSettings,
        engines: EngineFactory,
        prompter: Arc<dyn Prompter>,
        launcher: Arc<dyn Launcher>,
        caller: Arc<dyn Caller>,
    ) -> Self {
        let (interactions_tx, interactions) = mpsc::unbounded_channel();
        Self {
            settings,
            engines,
            prompter,
            launcher,
            caller,
            connector: None,
            secrets: None,
            builder: None,
            identity: None,
            in_flight: None,
            awaiting: None,
            interactions_tx,
            interactions,
        }
    }

    /// Connector used in agent mode.
    #[must_use]
    pub fn with_agent(mut self, connector: Arc<dyn AgentConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Store for remembered credentials, used when `remember_credentials`
    /// is enabled.
    #[must_use]
    pub fn with_secret_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(store);
        self
    }

    /// Interaction the orchestrator is waiting on.
    pub fn awaiting(&self) -> Option<&PendingInteraction> {
        self.awaiting.as_ref()
    }

    /// Launch an operation.
    ///
    /// Unexpected failures are shown to the caller and reported as
    /// [`LaunchOutcome::Aborted`].
    ///
    /// # Errors
    ///
    /// Currently never fails.
    #[instrument(skip(self))]
    pub async fn launch(
        &mut self,
        code: OperationCode,
    ) -> Result<LaunchOutcome, OrchestratorError> {
        let mut code = code;
        loop {
            match self.launch_once(code).await {
                Ok(Next::Done(outcome)) => return Ok(outcome),
                Ok(Next::Relaunch(next)) => {
                    debug!(?next, "relaunching");
                    code = next;
                }
                Err(err) => return Ok(self.abort(err)),
            }
        }
    }

    /// Feed the result of a suspended interaction back in.
    ///
    /// A cancelled result abandons everything pending. [`REQUEST_SIGN`]
    /// delivers a signature to the waiting identity and resumes the operation
    /// in flight; an operation code resumes identity negotiation and launches
    /// that operation again. Without `data` the result is fetched from the
    /// agent. Unknown codes cancel.
    ///
    /// # Errors
    ///
    /// See [`launch`](Self::launch).
    #[instrument(skip(self, data))]
    pub async fn relay_result(
        &mut self,
        request_code: i32,
        result: ResultCode,
        data: Option<AgentPayload>,
    ) -> Result<LaunchOutcome, OrchestratorError> {
        if result == ResultCode::Cancelled {
            info!("interaction cancelled");
            return Ok(self.cancel());
        }
        let action = self.awaiting.take().map(|p| p.action);

        if request_code == REQUEST_SIGN {
            let (Some(identity), Some(in_flight)) = (self.identity.clone(), self.in_flight.take())
            else {
                warn!("signature relayed without a waiting operation");
                return Ok(self.cancel());
            };
            let data = match (data, action) {
                (Some(data), _) => Some(data),
                (None, Some(action)) => match identity.fetch_result(&action).await {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!("failed to fetch signature from agent: {e}");
                        None
                    }
                },
                (None, None) => None,
            };
            identity.post_signature(data).await;
            return match self.drive(in_flight).await {
                Ok(outcome) => Ok(outcome),
                Err(err) => Ok(self.abort(err)),
            };
        }

        let Some(code) = OperationCode::from_request_code(request_code) else {
            warn!(request_code, "unknown request code");
            return Ok(self.cancel());
        };
        if let Some(builder) = self.builder.as_mut() {
            let consumed = match data {
                Some(data) => {
                    builder.consume(Some(&data));
                    Ok(())
                }
                None => builder.resume().await,
            };
            if let Err(err) = consumed {
                return Ok(self.abort(err.into()));
            }
        }
        self.launch(code).await
    }

    async fn launch_once(&mut self, code: OperationCode) -> Result<Next, OrchestratorError> {
        info!(?code, "launching operation");
        let work_tree = PathBuf::from(self.read(|s| s.get_or_default(REPOSITORY_PATH)));
        let engine = (self.engines)(&work_tree)?;

        if code == OperationCode::AbortRebase {
            return self.run(OperationBuilder::abort_rebase(engine)).await;
        }

        let remote = self.read(RemoteSettings::from_settings)?;
        if remote.mode == ConnectionMode::Agent && self.identity.is_none() {
            if let Some(pending) = self.build_identity(code).await? {
                return Ok(Next::Done(LaunchOutcome::Suspended(pending)));
            }
        }

        let builder = match code.kind() {
            OperationKind::Clone => {
                OperationBuilder::clone_repository(engine).uri(remote_url(&remote)?)
            }
            kind => OperationBuilder::for_kind(kind, engine)
                .author(self.read(CommitAuthor::from_settings)?),
        };
        let auth = Authentication {
            mode: remote.mode,
            protocol: remote.protocol,
            host: remote.server.clone(),
            username: remote.username.clone(),
            key_path: PathBuf::from(self.read(|s| s.get_or_default(SSH_KEY_PATH))),
            identity: self.identity.clone(),
            host_keys: HostKeyPolicy::from_setting(
                &self.read(|s| s.get_or_default(SSH_HOST_KEY_CHECKING)),
            ),
        };
        self.execute_after_authentication(builder, code, auth).await
    }

    /// Attach credentials for `auth.mode` and run the operation.
    ///
    /// ssh-key mode provisions a missing key (or cancels) and unlocks an
    /// encrypted one; username/password mode prompts for the password over
    /// either protocol; agent mode uses the negotiated identity.
    async fn execute_after_authentication(
        &mut self,
        builder: OperationBuilder,
        code: OperationCode,
        auth: Authentication,
    ) -> Result<Next, OrchestratorError> {
        match (auth.mode, auth.protocol) {
            (ConnectionMode::SshKey, _) => {
                if !auth.key_path.exists() {
                    return self.provision_key(code, &auth.key_path).await;
                }
                let (passphrase, remembered) = self.key_passphrase(&auth.key_path, &auth.host)?;
                let transport = TransportConfiguration::ssh_key(&auth.key_path, passphrase)
                    .with_host_key_policy(auth.host_keys);
                let mut builder = builder.authentication(transport);
                if let Some(secret) = remembered {
                    builder = builder.remember(secret);
                }
                self.run(builder).await
            }
            (ConnectionMode::UsernamePassword, protocol) => {
                debug!(%protocol, "password authentication");
                let (password, remembered) = self.password(&auth.host, &auth.username)?;
                let transport = TransportConfiguration::password(&auth.username, password)
                    .with_host_key_policy(auth.host_keys);
                let mut builder = builder.authentication(transport);
                if let Some(secret) = remembered {
                    builder = builder.remember(secret);
                }
                self.run(builder).await
            }
            (ConnectionMode::Agent, _) => {
                let identity = auth
                    .identity
                    .ok_or_else(|| AgentError::Protocol("no agent identity negotiated".into()))?;
                let transport =
                    TransportConfiguration::agent(identity).with_host_key_policy(auth.host_keys);
                self.run(builder.authentication(transport)).await
            }
        }
    }

    async fn build_identity(
        &mut self,
        code: OperationCode,
    ) -> Result<Option<PendingInteraction>, OrchestratorError> {
        if self.builder.is_none() {
            let connector = self.connector.clone().ok_or(AgentError::NotConfigured)?;
            let timeout = self.agent_timeout()?;
            let builder = IdentityBuilder::new(
                connector,
                Arc::clone(&self.settings),
                self.interactions_tx.clone(),
            );
            self.builder = Some(builder.with_timeout(timeout));
        }
        let Some(builder) = self.builder.as_mut() else {
            return Err(AgentError::NotConfigured.into());
        };

        match builder.try_build(code.request_code()).await? {
            BuildStep::Ready(identity) => {
                info!(key_id = identity.key_id(), "agent identity ready");
                self.identity = Some(identity);
                self.builder = None;
                Ok(None)
            }
            BuildStep::Suspended(pending) => {
                self.await_interaction(&pending);
                Ok(Some(pending))
            }
        }
    }

    fn agent_timeout(&self) -> Result<Duration, ConfigError> {
        let raw = self.read(|s| s.get_or_default(AGENT_TIMEOUT));
        raw.trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid {
                key: AGENT_TIMEOUT.to_string(),
                value: raw.clone(),
                reason: "not a number of seconds".to_string(),
            })
    }

    async fn provision_key(
        &mut self,
        code: OperationCode,
        key_path: &Path,
    ) -> Result<Next, OrchestratorError> {
        let options = [
            "Import an existing key".to_string(),
            "Generate a new key".to_string(),
            "Cancel".to_string(),
        ];
        let choice = self.prompter.select(
            &format!("No SSH key found at {}", key_path.display()),
            Some(0),
            &options,
        )?;
        match choice {
            0 => {
                let source = self.prompter.input("Path of the private key to import", "")?;
                ssh_key::import(Path::new(source.trim()), key_path)?;
            }
            1 => {
                let passphrase = if self
                    .prompter
                    .confirm("Protect the new key with a passphrase?", false)?
                {
                    let entered = self.prompter.password("Passphrase for the new key")?;
                    Some(SecretString::from(entered))
                } else {
                    None
                };
                let askpass = std::env::current_exe().map_err(GitError::Io)?;
                let public =
                    ssh_key::generate(key_path, "pwsync", passphrase.as_ref(), &askpass).await?;
                self.caller.notify(&format!(
                    "Generated a new SSH key. Add this public key to your git server:\n{public}"
                ));
            }
            _ => {
                info!("key provisioning cancelled");
                self.caller.finish(CallerResult::Cancelled);
                return Ok(Next::Done(LaunchOutcome::Cancelled));
            }
        }
        Ok(Next::Relaunch(code.after_key_provisioning()))
    }

    fn key_passphrase(
        &self,
        key_path: &Path,
        host: &str,
    ) -> Result<(Option<SecretString>, Option<RememberedSecret>), OrchestratorError> {
        if ssh_key::inspect_key(key_path)? == KeyState::Unencrypted {
            return Ok((None, None));
        }
        let remembered = self.remembered(host, SecretKind::KeyPassphrase);

        if let Some(secret) = &remembered {
            match secret.store.get(host, SecretKind::KeyPassphrase) {
                Ok(Some(stored)) => {
                    if ssh_key::passphrase_unlocks(key_path, &stored)? {
                        debug!("using remembered key passphrase");
                        return Ok((Some(stored), remembered));
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("failed to read remembered passphrase: {e:#}"),
            }
        }

        let mut prompt = format!("Passphrase for {}", key_path.display());
        loop {
            let passphrase = SecretString::from(self.prompter.password(&prompt)?);
            if ssh_key::passphrase_unlocks(key_path, &passphrase)? {
                if let Some(secret) = &remembered {
                    remember(secret, &passphrase);
                }
                return Ok((Some(passphrase), remembered));
            }
            warn!(path = %key_path.display(), "wrong key passphrase");
            self.caller
                .show_error("Wrong passphrase for the SSH key, please try again.");
            prompt = format!("Wrong passphrase. Passphrase for {}", key_path.display());
        }
    }

    fn password(
        &self,
        host: &str,
        username: &str,
    ) -> Result<(SecretString, Option<RememberedSecret>), OrchestratorError> {
        let remembered = self.remembered(host, SecretKind::Password);
        if let Some(secret) = &remembered {
            match secret.store.get(host, SecretKind::Password) {
                Ok(Some(stored)) => {
                    debug!("using remembered password");
                    return Ok((stored, remembered));
                }
                Ok(None) => {}
                Err(e) => warn!("failed to read remembered password: {e:#}"),
            }
        }

        let prompt = format!("Password for {username}@{host}");
        let password = SecretString::from(self.prompter.password(&prompt)?);
        if let Some(secret) = &remembered {
            remember(secret, &password);
        }
        Ok((password, remembered))
    }

    fn remembered(&self, host: &str, kind: SecretKind) -> Option<RememberedSecret> {
        let enabled = self.read(|s| s.get_or_default(REMEMBER_CREDENTIALS)) == "enabled";
        let store = self.secrets.as_ref().filter(|_| enabled)?;
        Some(RememberedSecret {
            store: Arc::clone(store),
            host: host.to_string(),
            kind,
        })
    }

    fn prepare_clone_target(&self, dir: &Path) -> Result<bool, OrchestratorError> {
        let target = inspect_clone_target(dir).map_err(GitError::Io)?;
        match target {
            CloneTarget::Empty => return Ok(true),
            CloneTarget::OnlyGitDir => debug!(dir = %dir.display(), "removing leftover .git"),
            CloneTarget::NonEmpty => {
                let delete = self.prompter.confirm(
                    &format!(
                        "{} is not empty. Delete its contents and clone?",
                        dir.display()
                    ),
                    false,
                )?;
                if !delete {
                    return Ok(false);
                }
                info!(dir = %dir.display(), "deleting clone target");
            }
        }
        std::fs::remove_dir_all(dir).map_err(GitError::Io)?;
        Ok(true)
    }

    async fn run(&mut self, builder: OperationBuilder) -> Result<Next, OrchestratorError> {
        if builder.kind() == OperationKind::Clone
            && !self.prepare_clone_target(builder.work_tree())?
        {
            info!("clone cancelled");
            self.caller.finish(CallerResult::Cancelled);
            return Ok(Next::Done(LaunchOutcome::Cancelled));
        }
        let operation = builder.build()?;
        let caller = Arc::clone(&self.caller);
        let in_flight: InFlight =
            Box::pin(async move { operation.execute(caller.as_ref()).await });
        self.drive(in_flight).await.map(Next::Done)
    }

    /// Wait for the operation in flight to finish, or for it to need the
    /// user; in that case it is parked until the result is relayed.
    async fn drive(
        &mut self,
        mut in_flight: InFlight,
    ) -> Result<LaunchOutcome, OrchestratorError> {
        let interactions = &mut self.interactions;
        let event = tokio::select! {
            biased;
            result = &mut in_flight => Event::Completed(result),
            Some(pending) = interactions.recv() => Event::Interaction(pending),
        };
        match event {
            Event::Completed(result) => Ok(LaunchOutcome::Finished(result?)),
            Event::Interaction(pending) => {
                self.await_interaction(&pending);
                self.in_flight = Some(in_flight);
                Ok(LaunchOutcome::Suspended(pending))
            }
        }
    }

    fn await_interaction(&mut self, pending: &PendingInteraction) {
        if self.awaiting.as_ref() == Some(pending) {
            return;
        }
        info!(
            request_code = pending.request_code,
            url = %pending.action.url,
            "waiting on the user"
        );
        if let Err(e) = self.launcher.open(&pending.action.url) {
            warn!("failed to open {}: {e:#}", pending.action.url);
        }
        self.awaiting = Some(pending.clone());
    }

    fn cancel(&mut self) -> LaunchOutcome {
        self.reset();
        self.caller.finish(CallerResult::Cancelled);
        LaunchOutcome::Cancelled
    }

    fn abort(&mut self, err: OrchestratorError) -> LaunchOutcome {
        if let OrchestratorError::Other(e) = &err {
            if is_user_cancellation(e) {
                return self.cancel();
            }
        }
        warn!("operation aborted: {err}");
        let message = err.to_string();
        self.caller.show_error(&message);
        self.cancel();
        LaunchOutcome::Aborted(message)
    }

    fn reset(&mut self) {
        if let Some(identity) = &self.identity {
            identity.cancel();
        }
        self.in_flight = None;
        self.builder = None;
        self.identity = None;
        self.awaiting = None;
    }

    fn read<T>(&self, f: impl FnOnce(&dyn Settings) -> T) -> T {
        let settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        f(&**settings)
    }
}

fn remember(secret: &RememberedSecret, value: &SecretString) {
    if let Err(e) = secret.store.store(&secret.host, secret.kind, value) {
        warn!("failed to remember {}: {e:#}", secret.kind);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use pwsync_core::config::{
        AGENT_KEY_ID, MemorySettings, REMOTE_AUTH, REMOTE_LOCATION, REMOTE_PROTOCOL,
        REMOTE_SERVER, REMOTE_USERNAME,
    };
    use pwsync_core::keyring_store::MemorySecretStore;
    use pwsync_core::launcher::StubLauncher;
    use pwsync_core::prompter::StubPrompter;
    use pwsync_git::transport::SessionFactory;
    use rstest::rstest;
    use russh_keys::encoding::Encoding;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::*;
    use crate::caller::RecordingCaller;
    use crate::identity::{
        AgentApi, AgentRequest, AgentResponse, MockAgentApi, MockAgentConnector, PendingAction,
    };
    use crate::test_support::{
        ENCRYPTED_KEY, ENCRYPTED_KEY_PASSPHRASE, FakeEngine, PLAIN_KEY,
    };

    struct Harness {
        dir: TempDir,
        engine: Arc<FakeEngine>,
        prompter: Arc<StubPrompter>,
        launcher: Arc<StubLauncher>,
        caller: Arc<RecordingCaller>,
        settings: SharedSettings,
    }

    impl Harness {
        fn new(settings: MemorySettings) -> Self {
            Self::with_engine(settings, FakeEngine::default())
        }

        fn with_engine(settings: MemorySettings, engine: FakeEngine) -> Self {
            let dir = TempDir::new().unwrap();
            let store = dir.path().join("store");
            let settings = settings
                .with(REPOSITORY_PATH, &store.display().to_string())
                .with(SSH_KEY_PATH, &dir.path().join("ssh_key").display().to_string());
            Self {
                engine: Arc::new(engine.at(&store)),
                prompter: Arc::new(StubPrompter::default()),
                launcher: Arc::new(StubLauncher::default()),
                caller: Arc::new(RecordingCaller::default()),
                settings: Arc::new(Mutex::new(Box::new(settings) as Box<dyn Settings>)),
                dir,
            }
        }

        fn orchestrator(&self) -> Orchestrator {
            let engine = Arc::clone(&self.engine);
            let engines: EngineFactory =
                Arc::new(move |_: &Path| Ok(Arc::clone(&engine) as Arc<dyn VcsEngine>));
            Orchestrator::new(
                Arc::clone(&self.settings),
                engines,
                self.prompter.clone(),
                self.launcher.clone(),
                self.caller.clone(),
            )
        }

        fn key_path(&self) -> PathBuf {
            self.dir.path().join("ssh_key")
        }

        fn passwords(&self, answers: &[&str]) {
            self.prompter
                .password_answers
                .lock()
                .unwrap()
                .extend(answers.iter().map(ToString::to_string));
        }
    }

    fn remote(protocol: &str, auth: &str) -> MemorySettings {
        MemorySettings::new()
            .with(REMOTE_SERVER, "example.com")
            .with(REMOTE_LOCATION, "/repo")
            .with(REMOTE_USERNAME, "alice")
            .with(REMOTE_PROTOCOL, protocol)
            .with(REMOTE_AUTH, auth)
    }

    #[tokio::test]
    async fn test_should_clone_over_https_with_password() {
        let h = Harness::new(remote("https", "username/password"));
        h.passwords(&["secret"]);

        let outcome = h.orchestrator().launch(OperationCode::Clone).await.unwrap();

        assert_eq!(outcome, LaunchOutcome::Finished(OperationOutcome::Succeeded));
        let calls = h.engine.network_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command, "clone");
        assert_eq!(calls[0].target, "https://example.com/repo");
        let credentials = calls[0].transport.credentials().unwrap();
        assert_eq!(credentials.username, "alice");
        assert_eq!(credentials.password.expose_secret(), "secret");
        assert_eq!(h.caller.finished(), Some(CallerResult::Ok));
        assert!(h.caller.errors().is_empty());
    }

    #[rstest]
    #[case(ConnectionMode::SshKey, Protocol::Ssh)]
    #[case(ConnectionMode::SshKey, Protocol::Https)]
    #[case(ConnectionMode::UsernamePassword, Protocol::Ssh)]
    #[case(ConnectionMode::UsernamePassword, Protocol::Https)]
    #[tokio::test]
    async fn test_should_route_each_mode_and_protocol(
        #[case] mode: ConnectionMode,
        #[case] protocol: Protocol,
    ) {
        let h = Harness::new(MemorySettings::new());
        std::fs::write(h.key_path(), PLAIN_KEY).unwrap();
        h.passwords(&["secret"]);
        let auth = Authentication {
            mode,
            protocol,
            host: "example.com".into(),
            username: "alice".into(),
            key_path: h.key_path(),
            identity: None,
            host_keys: HostKeyPolicy::AcceptAny,
        };
        let mut orchestrator = h.orchestrator();
        let builder = OperationBuilder::pull(h.engine.clone());

        let next = orchestrator
            .execute_after_authentication(builder, OperationCode::Pull, auth)
            .await
            .unwrap();

        assert!(matches!(
            next,
            Next::Done(LaunchOutcome::Finished(OperationOutcome::Succeeded))
        ));
        let calls = h.engine.network_calls();
        assert_eq!(calls.len(), 1);
        let transport = &calls[0].transport;
        assert_eq!(transport.host_key_policy(), HostKeyPolicy::AcceptAny);
        match mode {
            ConnectionMode::SshKey => {
                assert!(transport.credentials().is_none());
                assert!(matches!(
                    transport.session(),
                    Some(SessionFactory::KeyFile { passphrase: None, .. })
                ));
                assert!(h.prompter.seen().is_empty());
            }
            _ => {
                assert_eq!(transport.credentials().unwrap().username, "alice");
                assert_eq!(h.prompter.seen(), vec!["Password for alice@example.com"]);
            }
        }
    }

    #[tokio::test]
    async fn test_should_check_host_keys_when_configured_strict() {
        let h = Harness::new(remote("ssh", "ssh-key").with(SSH_HOST_KEY_CHECKING, "strict"));
        std::fs::write(h.key_path(), PLAIN_KEY).unwrap();

        let outcome = h.orchestrator().launch(OperationCode::Push).await.unwrap();

        assert_eq!(outcome, LaunchOutcome::Finished(OperationOutcome::Succeeded));
        let calls = h.engine.network_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].transport.host_key_policy(), HostKeyPolicy::Strict);
    }

    #[tokio::test]
    async fn test_should_cancel_when_key_missing_and_user_cancels() {
        let h = Harness::new(remote("ssh", "ssh-key"));
        h.prompter.select_answers.lock().unwrap().push(2);

        let outcome = h.orchestrator().launch(OperationCode::Sync).await.unwrap();

        assert_eq!(outcome, LaunchOutcome::Cancelled);
        assert!(h.engine.calls().is_empty());
        assert_eq!(h.caller.finished(), Some(CallerResult::Cancelled));
    }

    #[tokio::test]
    async fn test_should_import_missing_key_and_relaunch() {
        let h = Harness::new(remote("ssh", "ssh-key"));
        let source = h.dir.path().join("id_ed25519");
        std::fs::write(&source, PLAIN_KEY).unwrap();
        h.prompter.select_answers.lock().unwrap().push(0);
        h.prompter
            .input_answers
            .lock()
            .unwrap()
            .push(source.display().to_string());

        let outcome = h.orchestrator().launch(OperationCode::Pull).await.unwrap();

        assert_eq!(outcome, LaunchOutcome::Finished(OperationOutcome::Succeeded));
        assert!(h.key_path().exists());
        let calls = h.engine.network_calls();
        assert!(matches!(
            calls[0].transport.session(),
            Some(SessionFactory::KeyFile { key_path, .. }) if *key_path == h.key_path()
        ));
    }

    #[tokio::test]
    async fn test_should_reprompt_until_passphrase_unlocks_key() {
        let h = Harness::new(remote("ssh", "ssh-key"));
        std::fs::write(h.key_path(), ENCRYPTED_KEY).unwrap();
        h.passwords(&["wrong", ENCRYPTED_KEY_PASSPHRASE]);

        let outcome = h.orchestrator().launch(OperationCode::Push).await.unwrap();

        assert_eq!(outcome, LaunchOutcome::Finished(OperationOutcome::Succeeded));
        assert_eq!(h.prompter.seen().len(), 2);
        assert_eq!(h.caller.errors().len(), 1);
        let calls = h.engine.network_calls();
        let Some(SessionFactory::KeyFile {
            passphrase: Some(passphrase),
            ..
        }) = calls[0].transport.session()
        else {
            panic!("expected an unlocked key");
        };
        assert_eq!(passphrase.expose_secret(), ENCRYPTED_KEY_PASSPHRASE);
    }

    #[tokio::test]
    async fn test_should_use_and_keep_remembered_password() {
        let h = Harness::new(
            remote("https", "username/password").with(REMEMBER_CREDENTIALS, "enabled"),
        );
        let store = Arc::new(MemorySecretStore::default());
        h.passwords(&["secret"]);

        let mut orchestrator = h.orchestrator().with_secret_store(store.clone());
        orchestrator.launch(OperationCode::Pull).await.unwrap();
        orchestrator.launch(OperationCode::Pull).await.unwrap();

        assert_eq!(h.prompter.seen().len(), 1);
        let stored = store.get("example.com", SecretKind::Password).unwrap().unwrap();
        assert_eq!(stored.expose_secret(), "secret");
    }

    #[tokio::test]
    async fn test_should_abort_rebase_without_authentication() {
        let h = Harness::new(MemorySettings::new());

        let outcome = h.orchestrator().launch(OperationCode::AbortRebase).await.unwrap();

        assert_eq!(outcome, LaunchOutcome::Finished(OperationOutcome::Succeeded));
        assert_eq!(h.engine.calls(), vec!["rebase-abort"]);
        assert!(h.prompter.seen().is_empty());
    }

    #[tokio::test]
    async fn test_should_abort_on_invalid_settings() {
        let h = Harness::new(MemorySettings::new().with(REMOTE_USERNAME, "alice"));

        let outcome = h.orchestrator().launch(OperationCode::Pull).await.unwrap();

        assert!(matches!(outcome, LaunchOutcome::Aborted(_)));
        assert_eq!(h.caller.errors().len(), 1);
        assert_eq!(h.caller.finished(), Some(CallerResult::Cancelled));
        assert!(h.engine.calls().is_empty());
    }

    #[rstest]
    #[case(false, LaunchOutcome::Cancelled, true)]
    #[case(true, LaunchOutcome::Finished(OperationOutcome::Succeeded), false)]
    #[tokio::test]
    async fn test_should_confirm_before_deleting_clone_target(
        #[case] confirm: bool,
        #[case] expected: LaunchOutcome,
        #[case] survives: bool,
    ) {
        let h = Harness::new(remote("https", "username/password"));
        let store = h.dir.path().join("store");
        std::fs::create_dir_all(&store).unwrap();
        std::fs::write(store.join("mail.gpg"), "x").unwrap();
        h.prompter.confirm_answers.lock().unwrap().push(confirm);
        h.passwords(&["secret"]);

        let outcome = h.orchestrator().launch(OperationCode::Clone).await.unwrap();

        assert_eq!(outcome, expected);
        assert_eq!(store.join("mail.gpg").exists(), survives);
    }

    #[tokio::test]
    async fn test_should_remove_lone_git_dir_silently() {
        let h = Harness::new(remote("https", "username/password"));
        let store = h.dir.path().join("store");
        std::fs::create_dir_all(store.join(".git")).unwrap();
        h.passwords(&["secret"]);

        let outcome = h.orchestrator().launch(OperationCode::Clone).await.unwrap();

        assert_eq!(outcome, LaunchOutcome::Finished(OperationOutcome::Succeeded));
        assert!(!store.exists());
        assert_eq!(h.prompter.seen(), vec!["Password for alice@example.com"]);
    }

    #[tokio::test]
    async fn test_should_cancel_unknown_request_code() {
        let h = Harness::new(remote("ssh", "ssh-key"));

        let outcome = h
            .orchestrator()
            .relay_result(42, ResultCode::Ok, None)
            .await
            .unwrap();

        assert_eq!(outcome, LaunchOutcome::Cancelled);
        assert_eq!(h.caller.finished(), Some(CallerResult::Cancelled));
    }

    fn public_key_blob() -> Vec<u8> {
        let mut blob = Vec::new();
        blob.extend_ssh_string(b"ssh-ed25519");
        blob.extend_ssh_string(&[1; 32]);
        blob
    }

    fn approve() -> PendingAction {
        PendingAction {
            url: "https://agent.example/approve".into(),
            token: "tok".into(),
        }
    }

    fn agent_connector(api: MockAgentApi) -> Arc<dyn AgentConnector> {
        let api: Arc<dyn AgentApi> = Arc::new(api);
        let mut connector = MockAgentConnector::new();
        connector
            .expect_connect()
            .returning(move || Ok(Arc::clone(&api)));
        Arc::new(connector)
    }

    fn expect_public_key(api: &mut MockAgentApi) {
        api.expect_execute()
            .with(eq(AgentRequest::PublicKey {
                key_id: "k1".into(),
            }))
            .times(1)
            .returning(|_| {
                Ok(AgentResponse::Success(AgentPayload {
                    public_key: Some(public_key_blob()),
                    ..AgentPayload::default()
                }))
            });
    }

    #[tokio::test]
    async fn test_should_suspend_for_key_selection_and_resume() {
        let h = Harness::new(remote("ssh", "agent"));
        let mut api = MockAgentApi::new();
        api.expect_execute()
            .with(eq(AgentRequest::SelectKey))
            .times(1)
            .returning(|_| Ok(AgentResponse::UserInteractionRequired(approve())));
        expect_public_key(&mut api);
        let mut orchestrator = h.orchestrator().with_agent(agent_connector(api));

        let outcome = orchestrator.launch(OperationCode::Sync).await.unwrap();
        let LaunchOutcome::Suspended(pending) = outcome else {
            panic!("expected a suspension, got {outcome:?}");
        };
        assert_eq!(pending.request_code, OperationCode::Sync.request_code());
        assert_eq!(h.launcher.opened(), vec![approve().url]);
        assert!(h.engine.calls().is_empty());

        let outcome = orchestrator
            .relay_result(
                pending.request_code,
                ResultCode::Ok,
                Some(AgentPayload {
                    key_id: Some("k1".into()),
                    ..AgentPayload::default()
                }),
            )
            .await
            .unwrap();

        assert_eq!(outcome, LaunchOutcome::Finished(OperationOutcome::Succeeded));
        assert!(matches!(
            h.engine.network_calls()[0].transport.session(),
            Some(SessionFactory::Agent { .. })
        ));
        assert_eq!(
            h.settings.lock().unwrap().get(AGENT_KEY_ID).as_deref(),
            Some("k1")
        );
    }

    #[tokio::test]
    async fn test_should_park_operation_until_signature_is_relayed() {
        let h = Harness::with_engine(
            remote("ssh", "agent").with(AGENT_KEY_ID, "k1"),
            FakeEngine::default().signing(),
        );
        let mut api = MockAgentApi::new();
        expect_public_key(&mut api);
        api.expect_execute()
            .withf(|r| matches!(r, AgentRequest::Sign { .. }))
            .times(1)
            .returning(|_| Ok(AgentResponse::UserInteractionRequired(approve())));
        let mut orchestrator = h.orchestrator().with_agent(agent_connector(api));

        let outcome = orchestrator.launch(OperationCode::Pull).await.unwrap();
        let LaunchOutcome::Suspended(pending) = outcome else {
            panic!("expected a suspension, got {outcome:?}");
        };
        assert_eq!(pending.request_code, REQUEST_SIGN);

        let outcome = orchestrator
            .relay_result(
                REQUEST_SIGN,
                ResultCode::Ok,
                Some(AgentPayload {
                    signature: Some(vec![5; 64]),
                    ..AgentPayload::default()
                }),
            )
            .await
            .unwrap();

        assert_eq!(outcome, LaunchOutcome::Finished(OperationOutcome::Succeeded));
        assert_eq!(h.engine.calls(), vec!["pull"]);
    }

    #[tokio::test]
    async fn test_should_drop_everything_on_cancelled_result() {
        let h = Harness::new(remote("ssh", "agent"));
        let mut api = MockAgentApi::new();
        api.expect_execute()
            .with(eq(AgentRequest::SelectKey))
            .returning(|_| Ok(AgentResponse::UserInteractionRequired(approve())));
        let mut orchestrator = h.orchestrator().with_agent(agent_connector(api));

        orchestrator.launch(OperationCode::Pull).await.unwrap();
        assert!(orchestrator.awaiting().is_some());

        let outcome = orchestrator
            .relay_result(OperationCode::Pull.request_code(), ResultCode::Cancelled, None)
            .await
            .unwrap();

        assert_eq!(outcome, LaunchOutcome::Cancelled);
        assert!(orchestrator.awaiting().is_none());
        assert_eq!(h.caller.finished(), Some(CallerResult::Cancelled));
    }

    #[test]
    fn test_should_map_request_codes_both_ways() {
        for code in [
            OperationCode::Clone,
            OperationCode::Pull,
            OperationCode::Push,
            OperationCode::Sync,
            OperationCode::AbortRebase,
            OperationCode::RetryCloneWithKey,
        ] {
            assert_eq!(OperationCode::from_request_code(code.request_code()), Some(code));
        }
        assert_eq!(OperationCode::from_request_code(REQUEST_SIGN), None);
        assert_eq!(OperationCode::RetryCloneWithKey.kind(), OperationKind::Clone);
    }
}
