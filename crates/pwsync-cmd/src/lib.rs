//! Command implementations for pwsync.
//!
//! Each subcommand is a clap `Args` or `Subcommand` type with a `run` method
//! taking the shared [`factory::Factory`].

pub mod askpass;
pub mod caller;
pub mod config;
pub mod factory;
pub mod git_credential;
pub mod operation;

#[cfg(test)]
pub(crate) mod test_helpers;
