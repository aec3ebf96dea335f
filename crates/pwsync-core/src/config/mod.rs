//! Settings for pwsync.
//!
//! All persisted state is a flat set of string key/value pairs stored in
//! `settings.yml` inside the pwsync config directory. Each known key has a
//! documented default (see [`SETTING_OPTIONS`]).

mod file_config;
mod memory_config;
mod remote;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub use file_config::FileSettings;
pub use memory_config::MemorySettings;
pub use remote::{CommitAuthor, ConnectionMode, Protocol, RemoteSettings};

use crate::errors::ConfigError;

/// Settings shared between the front end and long-lived engine objects.
pub type SharedSettings = Arc<Mutex<Box<dyn Settings>>>;

/// Settings key: local working tree of the password store.
pub const REPOSITORY_PATH: &str = "repository_path";
/// Settings key: remote server host name.
pub const REMOTE_SERVER: &str = "git_remote_server";
/// Settings key: repository path on the server.
pub const REMOTE_LOCATION: &str = "git_remote_location";
/// Settings key: remote port (empty means the protocol default).
pub const REMOTE_PORT: &str = "git_remote_port";
/// Settings key: `ssh` or `https`.
pub const REMOTE_PROTOCOL: &str = "git_remote_protocol";
/// Settings key: remote user name.
pub const REMOTE_USERNAME: &str = "git_remote_username";
/// Settings key: connection mode (`ssh-key`, `username/password`, `agent`).
pub const REMOTE_AUTH: &str = "git_remote_auth";
/// Settings key: path of the private key used in `ssh-key` mode.
pub const SSH_KEY_PATH: &str = "ssh_key_path";
/// Settings key: how ssh checks the server's host key.
pub const SSH_HOST_KEY_CHECKING: &str = "ssh_host_key_checking";
/// Settings key: command line that starts the signing agent.
pub const AGENT_COMMAND: &str = "agent_command";
/// Settings key: key id selected in the signing agent.
pub const AGENT_KEY_ID: &str = "agent_key_id";
/// Settings key: seconds to wait for an interactive signature.
pub const AGENT_TIMEOUT: &str = "agent_timeout";
/// Settings key: commit author name.
pub const GIT_USER_NAME: &str = "git_user_name";
/// Settings key: commit author email.
pub const GIT_USER_EMAIL: &str = "git_user_email";
/// Settings key: keep passwords and passphrases in the OS keyring.
pub const REMEMBER_CREDENTIALS: &str = "remember_credentials";
/// Settings key: program used to open pending agent interactions.
pub const LAUNCHER: &str = "launcher";

/// Configuration directory path (usually ~/.config/pwsync).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PWSYNC_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::config_dir().map_or_else(
        || {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config")
                .join("pwsync")
        },
        |d| d.join("pwsync"),
    )
}

/// Data directory path, home of the store and the generated key.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PWSYNC_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::data_dir().map_or_else(config_dir, |d| d.join("pwsync"))
}

/// Persisted key/value settings.
pub trait Settings: Send + Sync + std::fmt::Debug {
    /// Get a stored value.
    fn get(&self, key: &str) -> Option<String>;

    /// Get a stored value, falling back to the documented default.
    fn get_or_default(&self, key: &str) -> String {
        self.get(key)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default_for_key(key))
    }

    /// Set a value. An empty value resets the key to its default.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be stored.
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;

    /// All explicitly stored keys and values, sorted by key.
    fn entries(&self) -> Vec<(String, String)>;

    /// Persist the settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be saved.
    fn write(&self) -> anyhow::Result<()>;
}

/// A known setting.
#[derive(Debug)]
pub struct SettingOption {
    /// Settings key.
    pub key: &'static str,
    /// Description of what this option does.
    pub description: &'static str,
    /// Valid values, empty means any string.
    pub allowed_values: &'static [&'static str],
}

impl SettingOption {
    /// Get the current value, or the default.
    pub fn current_value(&self, settings: &dyn Settings) -> String {
        settings.get_or_default(self.key)
    }
}

/// Known settings with descriptions and allowed values.
pub static SETTING_OPTIONS: &[SettingOption] = &[
    SettingOption {
        key: REPOSITORY_PATH,
        description: "local directory holding the password store",
        allowed_values: &[],
    },
    SettingOption {
        key: REMOTE_SERVER,
        description: "host name of the git server",
        allowed_values: &[],
    },
    SettingOption {
        key: REMOTE_LOCATION,
        description: "path of the repository on the server",
        allowed_values: &[],
    },
    SettingOption {
        key: REMOTE_PORT,
        description: "port of the git server, empty for the protocol default",
        allowed_values: &[],
    },
    SettingOption {
        key: REMOTE_PROTOCOL,
        description: "transport used to reach the server",
        allowed_values: &["ssh", "https"],
    },
    SettingOption {
        key: REMOTE_USERNAME,
        description: "user name on the git server",
        allowed_values: &[],
    },
    SettingOption {
        key: REMOTE_AUTH,
        description: "how to authenticate against the server",
        allowed_values: &["ssh-key", "username/password", "agent"],
    },
    SettingOption {
        key: SSH_KEY_PATH,
        description: "private key used in ssh-key mode",
        allowed_values: &[],
    },
    SettingOption {
        key: SSH_HOST_KEY_CHECKING,
        description: "accept any ssh host key, or check it against known_hosts",
        allowed_values: &["accept-any", "strict"],
    },
    SettingOption {
        key: AGENT_COMMAND,
        description: "command that starts the external signing agent",
        allowed_values: &[],
    },
    SettingOption {
        key: AGENT_KEY_ID,
        description: "key selected in the signing agent (cached)",
        allowed_values: &[],
    },
    SettingOption {
        key: AGENT_TIMEOUT,
        description: "seconds to wait for an interactive agent signature",
        allowed_values: &[],
    },
    SettingOption {
        key: GIT_USER_NAME,
        description: "author name used for commits",
        allowed_values: &[],
    },
    SettingOption {
        key: GIT_USER_EMAIL,
        description: "author email used for commits",
        allowed_values: &[],
    },
    SettingOption {
        key: REMEMBER_CREDENTIALS,
        description: "store passwords and key passphrases in the OS keyring",
        allowed_values: &["enabled", "disabled"],
    },
    SettingOption {
        key: LAUNCHER,
        description: "program used to open agent interactions, empty for the system default",
        allowed_values: &[],
    },
];

/// Look up a known setting.
pub fn option_for_key(key: &str) -> Option<&'static SettingOption> {
    SETTING_OPTIONS.iter().find(|o| o.key == key)
}

/// Check that `value` is acceptable for `key`.
///
/// # Errors
///
/// Returns an error for unknown keys or values outside the allowed set.
pub fn validate(key: &str, value: &str) -> Result<(), ConfigError> {
    let option = option_for_key(key).ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
    if value.is_empty()
        || option.allowed_values.is_empty()
        || option.allowed_values.contains(&value)
    {
        return Ok(());
    }
    Err(ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: format!("valid values are {}", option.allowed_values.join(", ")),
    })
}

/// Default values.
pub fn default_for_key(key: &str) -> String {
    match key {
        REPOSITORY_PATH => data_dir().join("store").display().to_string(),
        SSH_KEY_PATH => data_dir().join("ssh_key").display().to_string(),
        REMOTE_PROTOCOL => "ssh".to_string(),
        REMOTE_AUTH => "ssh-key".to_string(),
        SSH_HOST_KEY_CHECKING => "accept-any".to_string(),
        AGENT_TIMEOUT => "300".to_string(),
        REMEMBER_CREDENTIALS => "disabled".to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::test_utils::EnvVarGuard;

    #[rstest]
    #[case(REMOTE_PROTOCOL, "ssh")]
    #[case(REMOTE_AUTH, "ssh-key")]
    #[case(AGENT_TIMEOUT, "300")]
    #[case(SSH_HOST_KEY_CHECKING, "accept-any")]
    #[case(REMEMBER_CREDENTIALS, "disabled")]
    #[case(REMOTE_PORT, "")]
    #[case(REMOTE_SERVER, "")]
    #[case("unknown_key", "")]
    fn test_should_return_defaults(#[case] key: &str, #[case] expected: &str) {
        assert_eq!(default_for_key(key), expected);
    }

    #[test]
    fn test_should_place_store_and_key_under_data_dir() {
        let _guard = EnvVarGuard::set("PWSYNC_DATA_DIR", "/tmp/pwsync-data");
        assert_eq!(default_for_key(REPOSITORY_PATH), "/tmp/pwsync-data/store");
        assert_eq!(default_for_key(SSH_KEY_PATH), "/tmp/pwsync-data/ssh_key");
    }

    #[test]
    fn test_should_use_env_var_for_config_dir() {
        let _guard = EnvVarGuard::set("PWSYNC_CONFIG_DIR", "/tmp/test-pwsync-config");
        assert_eq!(config_dir(), PathBuf::from("/tmp/test-pwsync-config"));
    }

    #[test]
    fn test_should_describe_every_key_once() {
        for option in SETTING_OPTIONS {
            let count = SETTING_OPTIONS.iter().filter(|o| o.key == option.key).count();
            assert_eq!(count, 1, "duplicate option {}", option.key);
        }
    }

    #[rstest]
    #[case(REMOTE_PROTOCOL, "https", true)]
    #[case(REMOTE_PROTOCOL, "ftp", false)]
    #[case(REMOTE_AUTH, "agent", true)]
    #[case(REMOTE_AUTH, "token", false)]
    #[case(REMOTE_SERVER, "git.example.com", true)]
    #[case(REMOTE_PROTOCOL, "", true)]
    fn test_should_validate_values(#[case] key: &str, #[case] value: &str, #[case] ok: bool) {
        assert_eq!(validate(key, value).is_ok(), ok);
    }

    #[test]
    fn test_should_reject_unknown_key() {
        let err = validate("editor", "vim").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey(_)));
    }
}
