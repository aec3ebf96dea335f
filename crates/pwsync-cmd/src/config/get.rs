//! `pwsync config get` command.

use anyhow::Result;
use clap::Args;

use pwsync_core::ios_println;

use crate::factory::Factory;

/// Print the value of a given setting.
#[derive(Debug, Args)]
pub struct GetArgs {
    /// The setting to read.
    key: String,
}

impl GetArgs {
    /// Run the config get command.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not found.
    pub fn run(&self, factory: &Factory) -> Result<()> {
        let ios = &factory.io;
        let settings = factory.settings()?;
        let settings = settings
            .lock()
            .map_err(|e| anyhow::anyhow!("settings lock: {e}"))?;

        match settings.get(&self.key) {
            Some(val) if !val.is_empty() => {
                ios_println!(ios, "{val}");
                Ok(())
            }
            _ => {
                if pwsync_core::config::option_for_key(&self.key).is_none() {
                    anyhow::bail!("could not find key \"{}\"", self.key);
                }
                let default = pwsync_core::config::default_for_key(&self.key);
                if !default.is_empty() {
                    ios_println!(ios, "{default}");
                }
                Ok(())
            }
        }
    }
}
