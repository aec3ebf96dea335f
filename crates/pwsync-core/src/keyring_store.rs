//! Remembered credentials.
//!
//! When `remember_credentials` is enabled, the remote password and the SSH
//! key passphrase are kept in OS-native credential storage (Keychain on
//! macOS, Secret Service on Linux, etc.).

use std::collections::HashMap;
use std::fmt;

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};

/// Kind of remembered secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretKind {
    /// Password for the remote account.
    Password,
    /// Passphrase of the local SSH key.
    KeyPassphrase,
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Password => "password",
            Self::KeyPassphrase => "ssh-key-passphrase",
        })
    }
}

/// Storage for remembered secrets, scoped by remote host.
pub trait SecretStore: Send + Sync + fmt::Debug {
    /// Fetch a secret.
    fn get(&self, host: &str, kind: SecretKind) -> Result<Option<SecretString>>;

    /// Store a secret, replacing any previous value.
    fn store(&self, host: &str, kind: SecretKind, secret: &SecretString) -> Result<()>;

    /// Forget a secret. Forgetting a missing secret is not an error.
    fn delete(&self, host: &str, kind: SecretKind) -> Result<()>;
}

/// Secret store backed by the OS keyring.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringStore;

impl KeyringStore {
    fn entry(host: &str, kind: SecretKind) -> Result<keyring::Entry> {
        let service = format!("pwsync:{host}");
        keyring::Entry::new(&service, &kind.to_string()).context("failed to create keyring entry")
    }
}

impl SecretStore for KeyringStore {
    fn get(&self, host: &str, kind: SecretKind) -> Result<Option<SecretString>> {
        match Self::entry(host, kind)?.get_password() {
            Ok(secret) => Ok(Some(SecretString::from(secret))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("keyring error: {e}")),
        }
    }

    fn store(&self, host: &str, kind: SecretKind, secret: &SecretString) -> Result<()> {
        Self::entry(host, kind)?
            .set_password(secret.expose_secret())
            .context("failed to store secret in keyring")
    }

    fn delete(&self, host: &str, kind: SecretKind) -> Result<()> {
        match Self::entry(host, kind)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("keyring error: {e}")),
        }
    }
}

/// Secret store that keeps nothing beyond the process, for tests and for
/// runs with `remember_credentials` disabled.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: std::sync::Mutex<HashMap<(String, SecretKind), SecretString>>,
}

impl SecretStore for MemorySecretStore {
    fn get(&self, host: &str, kind: SecretKind) -> Result<Option<SecretString>> {
        let secrets = self
            .secrets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(secrets.get(&(host.to_string(), kind)).cloned())
    }

    fn store(&self, host: &str, kind: SecretKind, secret: &SecretString) -> Result<()> {
        self.secrets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert((host.to_string(), kind), secret.clone());
        Ok(())
    }

    fn delete(&self, host: &str, kind: SecretKind) -> Result<()> {
        self.secrets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&(host.to_string(), kind));
        Ok(())
    }
}
