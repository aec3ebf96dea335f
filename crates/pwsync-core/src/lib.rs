//! Core types, traits, and utilities for pwsync.
//!
//! This crate provides the foundational abstractions used across all pwsync crates:
//! - [`Settings`](config::Settings) for persisted key/value configuration
//! - [`RemoteSettings`](config::RemoteSettings) for the validated remote description
//! - [`Prompter`](prompter::Prompter) for interactive prompts
//! - [`IOStreams`](iostreams::IOStreams) for capturable terminal output
//! - [`Launcher`](launcher::Launcher) for handing interactions to an external program
//! - Keyring-backed storage for remembered credentials

pub mod cmdutil;
pub mod config;
pub mod errors;
pub mod iostreams;
pub mod keyring_store;
pub mod launcher;
pub mod prompter;
#[cfg(test)]
pub mod test_utils;

pub use errors::CoreError;
