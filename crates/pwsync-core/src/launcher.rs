//! Hand-off of interactive steps to an external program.
//!
//! A signing agent that needs the user (to pick a key, unlock it, or approve
//! a signature) answers with a target to open: usually a URL, sometimes a
//! command line. The launcher opens it and returns immediately; completion
//! is reported back separately.

use tracing::debug;

/// Opens interaction targets.
pub trait Launcher: Send + Sync + std::fmt::Debug {
    /// Open `target` for the user.
    ///
    /// # Errors
    ///
    /// Returns an error if the target cannot be opened.
    fn open(&self, target: &str) -> anyhow::Result<()>;
}

/// Launcher using the configured program, or the system handler via `open`.
#[derive(Debug, Clone, Default)]
pub struct SystemLauncher {
    program: Option<String>,
}

impl SystemLauncher {
    /// Create a launcher that uses the system default handler.
    pub fn new() -> Self {
        Self { program: None }
    }

    /// Create a launcher for a configured program. Empty means system default.
    pub fn with_program(program: impl Into<String>) -> Self {
        let program = program.into();
        Self {
            program: (!program.trim().is_empty()).then_some(program),
        }
    }
}

impl Launcher for SystemLauncher {
    fn open(&self, target: &str) -> anyhow::Result<()> {
        debug!(target, program = ?self.program, "launching interaction");
        match &self.program {
            Some(program) => {
                let parts = shlex::split(program).unwrap_or_else(|| vec![program.clone()]);
                match parts.split_first() {
                    Some((bin, args)) => {
                        std::process::Command::new(bin).args(args).arg(target).spawn()?;
                    }
                    None => open::that(target)?,
                }
            }
            None => open::that(target)?,
        }
        Ok(())
    }
}

/// Stub launcher for testing that records targets instead of opening them.
#[derive(Debug, Default)]
pub struct StubLauncher {
    /// Targets that were "opened".
    pub targets: std::sync::Mutex<Vec<String>>,
}

impl StubLauncher {
    /// Targets opened so far.
    pub fn opened(&self) -> Vec<String> {
        self.targets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Launcher for StubLauncher {
    fn open(&self, target: &str) -> anyhow::Result<()> {
        self.targets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(target.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_record_targets_in_stub() {
        let launcher = StubLauncher::default();
        launcher.open("https://agent.local/select").unwrap();
        launcher.open("https://agent.local/sign").unwrap();

        assert_eq!(
            launcher.opened(),
            vec![
                "https://agent.local/select".to_string(),
                "https://agent.local/sign".to_string(),
            ],
        );
    }

    #[test]
    fn test_should_treat_blank_program_as_system_default() {
        let launcher = SystemLauncher::with_program("  ");
        assert!(format!("{launcher:?}").contains("None"));
    }

    #[test]
    fn test_should_keep_configured_program() {
        let launcher = SystemLauncher::with_program("firefox --new-window");
        assert!(format!("{launcher:?}").contains("firefox --new-window"));
    }
}
