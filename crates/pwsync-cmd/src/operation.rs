//! `pwsync clone|pull|push|sync|abort-rebase` commands.
//!
//! Every sync operation goes through the orchestrator. When the signing
//! agent needs the user, the interaction is opened in the configured
//! launcher and the command waits for the user to confirm before relaying
//! the result and carrying on.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::debug;

use pwsync_core::cmdutil::{CancelError, SilentError};
use pwsync_core::iostreams::IOStreams;
use pwsync_core::ios_eprintln;
use pwsync_core::prompter::Prompter;
use pwsync_ops::identity::PendingInteraction;
use pwsync_ops::operation::OperationOutcome;
use pwsync_ops::orchestrator::{LaunchOutcome, OperationCode, ResultCode};

use crate::caller::TerminalCaller;
use crate::factory::Factory;

/// Options shared by every sync operation.
#[derive(Debug, Args)]
pub struct OperationArgs {
    /// Fail instead of waiting when the signing agent needs the user.
    #[arg(long)]
    no_wait: bool,
}

impl OperationArgs {
    /// Run the operation for `code` to completion.
    ///
    /// # Errors
    ///
    /// Returns [`CancelError`] when the user cancels and [`SilentError`]
    /// when the failure was already reported.
    pub async fn run(&self, factory: &Factory, code: OperationCode) -> Result<()> {
        let caller = TerminalCaller::new(Arc::clone(&factory.io));
        let mut orchestrator = factory.orchestrator(Arc::new(caller))?;
        let prompter = factory.prompter();

        let mut outcome = orchestrator.launch(code).await?;
        loop {
            outcome = match outcome {
                LaunchOutcome::Finished(OperationOutcome::Succeeded) => {
                    factory.io.stop_progress();
                    let cs = factory.io.color_scheme();
                    ios_eprintln!(
                        factory.io,
                        "{} {} complete",
                        cs.success_icon(),
                        cs.bold(code.kind().name())
                    );
                    return Ok(());
                }
                LaunchOutcome::Finished(OperationOutcome::Failed(message)) => {
                    debug!("operation failed: {message}");
                    return Err(SilentError.into());
                }
                LaunchOutcome::Aborted(message) => {
                    debug!("operation aborted: {message}");
                    return Err(SilentError.into());
                }
                LaunchOutcome::Cancelled => return Err(CancelError.into()),
                LaunchOutcome::Suspended(pending) => {
                    if self.no_wait {
                        ios_eprintln!(
                            factory.io,
                            "signing agent needs you at {}",
                            pending.action.url
                        );
                        orchestrator
                            .relay_result(pending.request_code, ResultCode::Cancelled, None)
                            .await?;
                        return Err(SilentError.into());
                    }
                    let result = wait_for_user(&factory.io, prompter.as_ref(), &pending);
                    orchestrator
                        .relay_result(pending.request_code, result, None)
                        .await?
                }
            };
        }
    }
}

/// Let the user complete `pending`, reporting whether they did.
fn wait_for_user(
    io: &IOStreams,
    prompter: &dyn Prompter,
    pending: &PendingInteraction,
) -> ResultCode {
    io.stop_progress();
    let cs = io.color_scheme();
    ios_eprintln!(
        io,
        "{} Continue in the signing agent: {}",
        cs.warning_icon(),
        cs.cyan(&pending.action.url)
    );
    if !io.can_prompt() {
        ios_eprintln!(io, "cannot wait for the signing agent without a terminal");
        return ResultCode::Cancelled;
    }
    match prompter.confirm("Finished in the signing agent?", true) {
        Ok(true) => ResultCode::Ok,
        Ok(false) => ResultCode::Cancelled,
        Err(e) => {
            debug!("prompt failed: {e}");
            ResultCode::Cancelled
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use pwsync_core::config::MemorySettings;
    use rstest::rstest;

    use super::*;
    use crate::test_helpers::TestHarness;

    fn https_remote() -> MemorySettings {
        MemorySettings::new()
            .with("git_remote_server", "git.example.com")
            .with("git_remote_location", "alice/store.git")
            .with("git_remote_protocol", "https")
            .with("git_remote_auth", "username/password")
            .with("git_remote_username", "alice")
    }

    #[rstest]
    #[case(OperationCode::Pull, vec!["pull"])]
    #[case(OperationCode::Push, vec!["push"])]
    #[tokio::test]
    async fn test_should_run_network_operation_with_password(
        #[case] code: OperationCode,
        #[case] expected: Vec<&str>,
    ) {
        let h = TestHarness::with_settings(https_remote());
        h.answer_password("secret");

        OperationArgs { no_wait: false }
            .run(&h.factory, code)
            .await
            .unwrap();

        assert_eq!(h.engine.calls(), expected);
        assert!(h.stderr().contains("complete"));
        assert_eq!(
            h.prompter.seen(),
            vec!["Password for alice@git.example.com".to_string()]
        );
    }

    #[tokio::test]
    async fn test_should_clone_into_missing_store() {
        let h = TestHarness::with_settings(https_remote());
        h.answer_password("secret");

        OperationArgs { no_wait: false }
            .run(&h.factory, OperationCode::Clone)
            .await
            .unwrap();

        assert_eq!(h.engine.calls(), vec!["clone"]);
    }

    #[tokio::test]
    async fn test_should_keep_non_empty_store_when_clone_is_declined() {
        let h = TestHarness::with_settings(https_remote());
        let store = h.dir.path().join("store");
        std::fs::create_dir_all(&store).unwrap();
        std::fs::write(store.join("mail.gpg"), "secret").unwrap();
        h.answer_password("secret");
        h.answer_confirm(false);

        let err = OperationArgs { no_wait: false }
            .run(&h.factory, OperationCode::Clone)
            .await
            .unwrap_err();

        assert!(err.downcast_ref::<CancelError>().is_some());
        assert!(store.join("mail.gpg").exists());
        assert!(h.engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_should_abort_rebase_without_credentials() {
        let h = TestHarness::new();

        OperationArgs { no_wait: false }
            .run(&h.factory, OperationCode::AbortRebase)
            .await
            .unwrap();

        assert_eq!(h.engine.calls(), vec!["rebase-abort"]);
        assert!(h.prompter.seen().is_empty());
    }

    #[tokio::test]
    async fn test_should_fail_silently_on_invalid_settings() {
        let h = TestHarness::with_settings(
            MemorySettings::new()
                .with("git_remote_protocol", "https")
                .with("git_remote_auth", "ssh-key")
                .with("git_remote_server", "git.example.com")
                .with("git_remote_username", "alice"),
        );

        let err = OperationArgs { no_wait: false }
            .run(&h.factory, OperationCode::Pull)
            .await
            .unwrap_err();

        assert!(err.downcast_ref::<SilentError>().is_some());
        assert!(h.stderr().contains("https remotes only support"));
        assert!(h.engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_should_cancel_when_key_provisioning_is_declined() {
        let h = TestHarness::with_settings(
            MemorySettings::new()
                .with("git_remote_server", "git.example.com")
                .with("git_remote_location", "alice/store.git")
                .with("git_remote_username", "alice"),
        );
        // Import, Generate, Cancel
        h.prompter.select_answers.lock().unwrap().push(2);

        let err = OperationArgs { no_wait: false }
            .run(&h.factory, OperationCode::Push)
            .await
            .unwrap_err();

        assert!(err.downcast_ref::<CancelError>().is_some());
        assert!(h.engine.calls().is_empty());
    }
}
