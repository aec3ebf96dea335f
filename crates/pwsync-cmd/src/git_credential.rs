//! `pwsync git-credential` command.
//!
//! Git calls back into pwsync through this helper when an operation runs
//! with username/password authentication. The credentials come from the
//! environment of the git process, set up for that one command.

use std::io::BufRead;

use clap::Args;

use pwsync_core::ios_println;
use pwsync_git::credential::{HelperCredentials, handle_credential_request};

use crate::factory::Factory;

/// Implements the git credential helper protocol.
///
/// Supports `get`; `store` and `erase` are accepted and ignored.
#[derive(Debug, Args)]
pub struct GitCredentialArgs {
    /// The git credential operation: get, store, or erase.
    operation: String,
}

impl GitCredentialArgs {
    /// Run the git-credential command against stdin.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be read.
    pub fn run(&self, factory: &Factory) -> anyhow::Result<()> {
        let stdin = std::io::stdin();
        let credentials = HelperCredentials::from_env();
        self.answer(factory, credentials.as_ref(), &mut stdin.lock())
    }

    fn answer<R: BufRead>(
        &self,
        factory: &Factory,
        credentials: Option<&HelperCredentials>,
        input: &mut R,
    ) -> anyhow::Result<()> {
        let mut response = Vec::new();
        handle_credential_request(&self.operation, credentials, input, &mut response)?;
        let response = String::from_utf8(response)?;
        for line in response.lines() {
            ios_println!(factory.io, "{line}");
        }
        Ok(())
    }
}
