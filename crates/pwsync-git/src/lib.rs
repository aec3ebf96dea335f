//! Git engine and transport plumbing for pwsync.
//!
//! The [`engine::VcsEngine`] trait is the narrow surface the operation layer
//! consumes; [`client::GitClient`] implements it on top of the git CLI.
//! Credentials reach git only through the per-command
//! [`transport::TransportConfiguration`].

#[cfg(unix)]
pub mod agent;
pub mod client;
pub mod credential;
pub mod engine;
pub mod errors;
pub mod remote_url;
pub mod repository;
pub mod ssh_wire;
pub mod transport;
