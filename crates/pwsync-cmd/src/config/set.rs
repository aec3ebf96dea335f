//! `pwsync config set` command.

use anyhow::Result;
use clap::Args;

use pwsync_core::config::{AGENT_COMMAND, AGENT_KEY_ID};
use pwsync_core::errors::ConfigError;
use pwsync_core::ios_eprintln;

use crate::factory::Factory;

/// Update a setting. An empty value restores the default.
#[derive(Debug, Args)]
pub struct SetArgs {
    /// The setting to update.
    key: String,
    /// The new value.
    value: String,
}

impl SetArgs {
    /// Run the config set command.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is invalid or cannot be saved.
    pub fn run(&self, factory: &Factory) -> Result<()> {
        let ios = &factory.io;

        match pwsync_core::config::validate(&self.key, &self.value) {
            Ok(()) => {}
            Err(ConfigError::UnknownKey(_)) => {
                ios_eprintln!(ios, "! warning: '{}' is not a known setting", self.key);
            }
            Err(e) => anyhow::bail!("failed to set {:?}: {e}", self.key),
        }

        let settings = factory.settings()?;
        let mut settings = settings
            .lock()
            .map_err(|e| anyhow::anyhow!("settings lock: {e}"))?;

        // A different agent may not know the cached key
        let previous = settings.get(AGENT_COMMAND);
        if self.key == AGENT_COMMAND && previous.as_deref() != Some(self.value.as_str()) {
            settings.set(AGENT_KEY_ID, "")?;
        }
        settings.set(&self.key, &self.value)?;
        settings.write()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use pwsync_core::config::{MemorySettings, Settings};

    use super::*;
    use crate::test_helpers::TestHarness;

    fn stored(h: &TestHarness, key: &str) -> Option<String> {
        h.factory.settings().unwrap().lock().unwrap().get(key)
    }

    #[test]
    fn test_should_set_known_value() {
        let h = TestHarness::new();
        let args = SetArgs {
            key: "git_remote_protocol".to_string(),
            value: "https".to_string(),
        };
        args.run(&h.factory).unwrap();
        assert!(h.stdout().is_empty());
        assert_eq!(stored(&h, "git_remote_protocol").as_deref(), Some("https"));
    }

    #[test]
    fn test_should_warn_for_unknown_key() {
        let h = TestHarness::new();
        let args = SetArgs {
            key: "unknown_key".to_string(),
            value: "something".to_string(),
        };
        args.run(&h.factory).unwrap();
        assert!(h.stderr().contains("warning"));
        assert!(h.stderr().contains("unknown_key"));
    }

    #[test]
    fn test_should_error_for_invalid_value() {
        let h = TestHarness::new();
        let args = SetArgs {
            key: "git_remote_auth".to_string(),
            value: "token".to_string(),
        };
        let result = args.run(&h.factory);
        assert!(result.unwrap_err().to_string().contains("valid values"));
        assert_eq!(stored(&h, "git_remote_auth"), None);
    }

    #[test]
    fn test_should_reset_to_default_with_empty_value() {
        let h = TestHarness::with_settings(MemorySettings::new().with("git_remote_auth", "agent"));
        let args = SetArgs {
            key: "git_remote_auth".to_string(),
            value: String::new(),
        };
        args.run(&h.factory).unwrap();
        assert_eq!(stored(&h, "git_remote_auth"), None);
    }

    #[test]
    fn test_should_forget_agent_key_when_agent_changes() {
        let h = TestHarness::with_settings(
            MemorySettings::new()
                .with("agent_command", "old-agent")
                .with("agent_key_id", "key-1"),
        );
        let args = SetArgs {
            key: "agent_command".to_string(),
            value: "new-agent --stdio".to_string(),
        };
        args.run(&h.factory).unwrap();
        assert_eq!(stored(&h, "agent_key_id"), None);
        assert_eq!(
            stored(&h, "agent_command").as_deref(),
            Some("new-agent --stdio")
        );
    }
}
