//! Validated description of the remote repository.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use super::{
    GIT_USER_EMAIL, GIT_USER_NAME, REMOTE_AUTH, REMOTE_LOCATION, REMOTE_PORT, REMOTE_PROTOCOL,
    REMOTE_SERVER, REMOTE_USERNAME, Settings,
};
use crate::errors::ConfigError;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("EMAIL_RE is a valid regex")
});

/// Transport protocol used to reach the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// SSH transport.
    Ssh,
    /// HTTPS transport.
    Https,
}

impl Protocol {
    /// Default port of the protocol.
    pub fn default_port(self) -> u16 {
        match self {
            Self::Ssh => 22,
            Self::Https => 443,
        }
    }
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_end_matches("://") {
            "ssh" => Ok(Self::Ssh),
            "https" => Ok(Self::Https),
            other => Err(ConfigError::Invalid {
                key: REMOTE_PROTOCOL.to_string(),
                value: other.to_string(),
                reason: "expected ssh or https".to_string(),
            }),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ssh => "ssh",
            Self::Https => "https",
        })
    }
}

/// How credentials are obtained for the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// A private key file on disk.
    SshKey,
    /// A password typed by the user.
    UsernamePassword,
    /// An external signing agent holding the key.
    Agent,
}

impl FromStr for ConnectionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ssh-key" => Ok(Self::SshKey),
            "username/password" => Ok(Self::UsernamePassword),
            "agent" => Ok(Self::Agent),
            other => Err(ConfigError::Invalid {
                key: REMOTE_AUTH.to_string(),
                value: other.to_string(),
                reason: "expected ssh-key, username/password or agent".to_string(),
            }),
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SshKey => "ssh-key",
            Self::UsernamePassword => "username/password",
            Self::Agent => "agent",
        })
    }
}

/// Remote repository settings after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    /// Transport protocol.
    pub protocol: Protocol,
    /// Connection mode.
    pub mode: ConnectionMode,
    /// Server host name.
    pub server: String,
    /// Repository path on the server.
    pub location: String,
    /// Explicit port, `None` for the protocol default.
    pub port: Option<u16>,
    /// User name on the server.
    pub username: String,
}

impl RemoteSettings {
    /// Read and validate the remote settings.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for missing server information, a missing
    /// user name where one is needed, or malformed values.
    pub fn from_settings(settings: &dyn Settings) -> Result<Self, ConfigError> {
        let protocol: Protocol = settings.get_or_default(REMOTE_PROTOCOL).parse()?;
        let mode: ConnectionMode = settings.get_or_default(REMOTE_AUTH).parse()?;

        let server = settings.get_or_default(REMOTE_SERVER).trim().to_string();
        if server.is_empty() {
            return Err(ConfigError::Missing(REMOTE_SERVER.to_string()));
        }

        let port_raw = settings.get_or_default(REMOTE_PORT);
        let port = if port_raw.trim().is_empty() {
            None
        } else {
            Some(
                port_raw
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| ConfigError::Invalid {
                        key: REMOTE_PORT.to_string(),
                        value: port_raw.clone(),
                        reason: "not a port number".to_string(),
                    })?,
            )
        };

        let username = settings.get_or_default(REMOTE_USERNAME).trim().to_string();
        let needs_username = protocol == Protocol::Ssh || mode == ConnectionMode::UsernamePassword;
        if needs_username && username.is_empty() {
            return Err(ConfigError::Missing(REMOTE_USERNAME.to_string()));
        }

        if mode != ConnectionMode::UsernamePassword && protocol == Protocol::Https {
            return Err(ConfigError::Invalid {
                key: REMOTE_AUTH.to_string(),
                value: mode.to_string(),
                reason: "https remotes only support username/password".to_string(),
            });
        }

        Ok(Self {
            protocol,
            mode,
            server,
            location: settings.get_or_default(REMOTE_LOCATION).trim().to_string(),
            port,
            username,
        })
    }

    /// Port to connect to, resolving the protocol default.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }

    /// Whether the configured port differs from the protocol default.
    pub fn has_custom_port(&self) -> bool {
        self.effective_port() != self.protocol.default_port()
    }
}

/// Commit author identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    /// Author name.
    pub name: String,
    /// Author email.
    pub email: String,
}

impl CommitAuthor {
    /// Read the optional commit author from settings.
    ///
    /// Returns `None` when neither name nor email is configured, leaving git
    /// to use its own configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the email is malformed.
    pub fn from_settings(settings: &dyn Settings) -> Result<Option<Self>, ConfigError> {
        let name = settings.get_or_default(GIT_USER_NAME);
        let email = settings.get_or_default(GIT_USER_EMAIL);
        if name.is_empty() && email.is_empty() {
            return Ok(None);
        }
        if !EMAIL_RE.is_match(&email) {
            return Err(ConfigError::Invalid {
                key: GIT_USER_EMAIL.to_string(),
                value: email,
                reason: "not an email address".to_string(),
            });
        }
        Ok(Some(Self { name, email }))
    }
}
