//! Per-command transport configuration.
//!
//! A [`TransportConfiguration`] describes how a network command
//! authenticates. Before git runs, it is turned into a [`TransportSession`]:
//! the `-c` overrides and environment that point git and ssh back at this
//! binary for credentials (the `git-credential` helper and the askpass
//! entry point) or at an ephemeral agent socket.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;

use crate::errors::GitError;

/// Username handed to the `git-credential` helper.
pub const USERNAME_ENV: &str = "PWSYNC_GIT_USERNAME";
/// Password handed to the `git-credential` helper.
pub const PASSWORD_ENV: &str = "PWSYNC_GIT_PASSWORD";
/// Marks a process started by ssh as askpass.
pub const ASKPASS_MODE_ENV: &str = "PWSYNC_ASKPASS";
/// Secret the askpass entry point prints.
pub const ASKPASS_SECRET_ENV: &str = "PWSYNC_ASKPASS_SECRET";

/// How the server's host key is checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept any host key and remember none.
    #[default]
    AcceptAny,
    /// Use ssh's own known-hosts checking.
    Strict,
}

impl HostKeyPolicy {
    /// Policy for a `ssh_host_key_checking` setting value. Anything but
    /// `strict` accepts any key.
    pub fn from_setting(value: &str) -> Self {
        if value.trim() == "strict" {
            Self::Strict
        } else {
            Self::AcceptAny
        }
    }
}

/// Produces SSH signatures for a single public key.
#[async_trait]
pub trait SshSigner: Send + Sync + fmt::Debug {
    /// Public key in SSH wire format.
    fn public_key_blob(&self) -> Vec<u8>;

    /// Human-readable comment shown by ssh.
    fn comment(&self) -> String;

    /// Sign `data`, returning an SSH signature blob. `flags` are the agent
    /// protocol signature flags.
    async fn sign(&self, data: &[u8], flags: u32) -> Result<Vec<u8>, GitError>;
}

/// Username/password credentials for git's credential helper.
#[derive(Debug, Clone)]
pub struct CredentialsProvider {
    /// Account name.
    pub username: String,
    /// Account password.
    pub password: SecretString,
}

/// How the ssh session itself authenticates.
#[derive(Debug, Clone)]
pub enum SessionFactory {
    /// Keyboard-interactive or password authentication.
    Password {
        /// Password answered to ssh's prompt.
        password: SecretString,
    },
    /// Private key file.
    KeyFile {
        /// Path to the private key.
        key_path: PathBuf,
        /// Passphrase of an encrypted key.
        passphrase: Option<SecretString>,
    },
    /// Signatures from an external signer, served over an agent socket.
    Agent {
        /// Signer backing the socket.
        signer: Arc<dyn SshSigner>,
    },
}

/// Authentication attached to one network command.
#[derive(Debug, Clone, Default)]
pub struct TransportConfiguration {
    credentials: Option<CredentialsProvider>,
    session: Option<SessionFactory>,
    host_key_policy: HostKeyPolicy,
}

impl TransportConfiguration {
    /// No authentication; git and ssh use their own configuration.
    pub fn none() -> Self {
        Self::default()
    }

    /// Username and password, valid for both ssh and https remotes.
    pub fn password(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            credentials: Some(CredentialsProvider {
                username: username.into(),
                password: password.clone(),
            }),
            session: Some(SessionFactory::Password { password }),
            host_key_policy: HostKeyPolicy::default(),
        }
    }

    /// Private key file with an optional passphrase.
    pub fn ssh_key(key_path: impl Into<PathBuf>, passphrase: Option<SecretString>) -> Self {
        Self {
            credentials: None,
            session: Some(SessionFactory::KeyFile {
                key_path: key_path.into(),
                passphrase,
            }),
            host_key_policy: HostKeyPolicy::default(),
        }
    }

    /// Signatures produced by `signer`.
    pub fn agent(signer: Arc<dyn SshSigner>) -> Self {
        Self {
            credentials: None,
            session: Some(SessionFactory::Agent { signer }),
            host_key_policy: HostKeyPolicy::default(),
        }
    }

    /// Override host key checking.
    #[must_use]
    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    /// Credentials for git's credential helper, if any.
    pub fn credentials(&self) -> Option<&CredentialsProvider> {
        self.credentials.as_ref()
    }

    /// Session authentication, if any.
    pub fn session(&self) -> Option<&SessionFactory> {
        self.session.as_ref()
    }

    /// Host key policy.
    pub fn host_key_policy(&self) -> HostKeyPolicy {
        self.host_key_policy
    }

    /// Materialize the configuration for one git invocation.
    ///
    /// `helper` is the executable git and ssh call back into for
    /// credentials. An agent session binds its socket here; it stays open
    /// until the returned session is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error when a path cannot be quoted for the shell or the
    /// agent socket cannot be bound.
    pub fn prepare(&self, helper: &Path) -> Result<TransportSession, GitError> {
        let mut session = TransportSession::default();
        session.env("GIT_TERMINAL_PROMPT", "0");

        if let Some(credentials) = &self.credentials {
            let helper_cmd = format!("!{} git-credential", quote(&helper.to_string_lossy())?);
            session.config("credential.helper", "");
            session.config("credential.helper", &helper_cmd);
            session.env(USERNAME_ENV, &credentials.username);
            session.env(PASSWORD_ENV, credentials.password.expose_secret());
        }

        let mut ssh = vec!["ssh".to_string()];
        if self.host_key_policy == HostKeyPolicy::AcceptAny {
            ssh.extend(option("StrictHostKeyChecking=no"));
            ssh.extend(option("UserKnownHostsFile=/dev/null"));
            ssh.extend(option("LogLevel=ERROR"));
        }

        match &self.session {
            None => {}
            Some(SessionFactory::Password { password }) => {
                ssh.extend(option("PreferredAuthentications=password,keyboard-interactive"));
                ssh.extend(option("PubkeyAuthentication=no"));
                session.askpass(helper, password);
            }
            Some(SessionFactory::KeyFile {
                key_path,
                passphrase,
            }) => {
                ssh.push("-i".to_string());
                ssh.push(quote(&key_path.to_string_lossy())?);
                ssh.extend(option("IdentitiesOnly=yes"));
                ssh.extend(option("IdentityAgent=none"));
                ssh.extend(option("PreferredAuthentications=publickey"));
                match passphrase {
                    Some(passphrase) => session.askpass(helper, passphrase),
                    None => ssh.extend(option("BatchMode=yes")),
                }
            }
            Some(SessionFactory::Agent { signer }) => {
                let socket = bind_agent(Arc::clone(signer))?;
                let path = socket_path(&socket);
                ssh.extend(option(&format!("IdentityAgent={}", quote(&path)?)));
                ssh.extend(option("PreferredAuthentications=publickey"));
                ssh.extend(option("BatchMode=yes"));
                session.env("SSH_AUTH_SOCK", &path);
                session.keep_agent(socket);
            }
        }

        session.env("GIT_SSH_COMMAND", &ssh.join(" "));
        Ok(session)
    }
}

/// Git arguments and environment for one invocation.
#[derive(Default)]
pub struct TransportSession {
    config: Vec<(String, String)>,
    env: Vec<(String, String)>,
    #[cfg(unix)]
    agent: Option<crate::agent::AgentSocket>,
}

impl TransportSession {
    /// Environment that makes ssh tools ask `helper` for `secret` instead
    /// of reading the terminal.
    pub fn askpass_only(helper: &Path, secret: &SecretString) -> Self {
        let mut session = Self::default();
        session.askpass(helper, secret);
        session
    }

    fn config(&mut self, key: &str, value: &str) {
        self.config.push((key.to_string(), value.to_string()));
    }

    fn env(&mut self, key: &str, value: &str) {
        self.env.push((key.to_string(), value.to_string()));
    }

    fn askpass(&mut self, helper: &Path, secret: &SecretString) {
        self.env("SSH_ASKPASS", &helper.to_string_lossy());
        self.env("SSH_ASKPASS_REQUIRE", "force");
        self.env(ASKPASS_MODE_ENV, "1");
        self.env(ASKPASS_SECRET_ENV, secret.expose_secret());
    }

    #[cfg(unix)]
    fn keep_agent(&mut self, socket: crate::agent::AgentSocket) {
        self.agent = Some(socket);
    }

    #[cfg(not(unix))]
    fn keep_agent(&mut self, socket: std::convert::Infallible) {
        match socket {}
    }

    /// Global git arguments (`-c key=value` pairs) to place before the subcommand.
    pub fn git_args(&self) -> Vec<String> {
        self.config
            .iter()
            .flat_map(|(k, v)| ["-c".to_string(), format!("{k}={v}")])
            .collect()
    }

    /// Value of an environment variable set by this session.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Apply the environment to a command.
    pub fn apply(&self, cmd: &mut Command) {
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
    }
}

impl fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("TransportSession")
            .field("config", &self.config.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("env", &keys)
            .finish_non_exhaustive()
    }
}

fn option(value: &str) -> [String; 2] {
    ["-o".to_string(), value.to_string()]
}

fn quote(value: &str) -> Result<String, GitError> {
    shlex::try_quote(value)
        .map(std::borrow::Cow::into_owned)
        .map_err(|e| GitError::Internal {
            message: format!("cannot quote {value:?} for the shell"),
            cause: Some(e.to_string()),
        })
}

#[cfg(unix)]
fn bind_agent(signer: Arc<dyn SshSigner>) -> Result<crate::agent::AgentSocket, GitError> {
    crate::agent::AgentSocket::bind(signer)
}

#[cfg(unix)]
fn socket_path(socket: &crate::agent::AgentSocket) -> String {
    socket.path().to_string_lossy().into_owned()
}

#[cfg(not(unix))]
fn bind_agent(_signer: Arc<dyn SshSigner>) -> Result<std::convert::Infallible, GitError> {
    Err(GitError::Internal {
        message: "agent authentication requires Unix domain sockets".to_string(),
        cause: None,
    })
}

#[cfg(not(unix))]
fn socket_path(socket: &std::convert::Infallible) -> String {
    match *socket {}
}
