//! Sync operation engine for pwsync.
//!
//! Operations ([`operation::Operation`]) are built from a fixed set of git
//! [`command::Command`]s and run in order by the [`executor`]. The
//! [`orchestrator::Orchestrator`] decides how each operation authenticates,
//! negotiating with an external signing agent through
//! [`identity::IdentityBuilder`] when needed.

pub mod caller;
pub mod command;
pub mod errors;
pub mod executor;
pub mod identity;
pub mod operation;
pub mod orchestrator;
pub mod process_agent;
pub mod ssh_key;

#[cfg(test)]
pub(crate) mod test_support;
