//! `pwsync config list` command.

use anyhow::Result;
use clap::Args;

use pwsync_core::ios_println;

use crate::factory::Factory;

/// Print every known setting and its value.
#[derive(Debug, Args)]
pub struct ListArgs {}

impl ListArgs {
    /// Run the config list command.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be read.
    pub fn run(&self, factory: &Factory) -> Result<()> {
        let ios = &factory.io;
        let settings = factory.settings()?;
        let settings = settings
            .lock()
            .map_err(|e| anyhow::anyhow!("settings lock: {e}"))?;

        for option in pwsync_core::config::SETTING_OPTIONS {
            let value = option.current_value(&**settings);
            ios_println!(ios, "{}={value}", option.key);
        }

        Ok(())
    }
}
