//! Settings commands (`pwsync config`).
//!
//! Provides get, set, and list subcommands over the persisted settings.

pub mod get;
pub mod list;
pub mod set;

use clap::Subcommand;

use crate::factory::Factory;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the value of a given setting.
    Get(get::GetArgs),
    /// Update a setting. An empty value restores the default.
    Set(set::SetArgs),
    /// Print every known setting and its value.
    #[command(alias = "ls")]
    List(list::ListArgs),
}

impl ConfigCommand {
    /// Run the appropriate config subcommand.
    ///
    /// # Errors
    ///
    /// Returns an error if the subcommand fails.
    pub fn run(self, factory: &Factory) -> anyhow::Result<()> {
        match self {
            Self::Get(args) => args.run(factory),
            Self::Set(args) => args.run(factory),
            Self::List(args) => args.run(factory),
        }
    }
}
