//! In-memory settings for testing.
//!
//! Provides [`MemorySettings`], a [`Settings`] implementation that never
//! touches the filesystem.

use std::collections::BTreeMap;

use super::Settings;

/// In-memory settings.
///
/// # Examples
///
/// ```
/// use pwsync_core::config::{MemorySettings, Settings};
///
/// let settings = MemorySettings::new()
///     .with("git_remote_server", "git.example.com")
///     .with("git_remote_protocol", "https");
///
/// assert_eq!(settings.get_or_default("git_remote_server"), "git.example.com");
/// assert_eq!(settings.get_or_default("git_remote_auth"), "ssh-key");
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemorySettings {
    values: BTreeMap<String, String>,
}

impl MemorySettings {
    /// Create empty settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, builder style.
    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }
}

impl Settings for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        if value.is_empty() {
            self.values.remove(key);
        } else {
            self.values.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn write(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
