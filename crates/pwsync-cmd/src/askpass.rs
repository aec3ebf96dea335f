//! Askpass mode.
//!
//! ssh runs the program named by `SSH_ASKPASS` with the prompt as its only
//! argument and reads the answer from stdout. Transport sessions point it at
//! the pwsync binary itself and mark the environment, so the binary checks
//! for askpass mode before parsing its command line.

use pwsync_git::credential::askpass_answer;
use pwsync_git::transport::{ASKPASS_MODE_ENV, ASKPASS_SECRET_ENV, USERNAME_ENV};

/// Name of the credential helper subcommand, which inherits the askpass
/// environment from git but must not be treated as an askpass call.
const CREDENTIAL_COMMAND: &str = "git-credential";

/// Whether this process was started by ssh as an askpass program.
pub fn is_askpass_invocation(args: &[String]) -> bool {
    std::env::var(ASKPASS_MODE_ENV).is_ok_and(|v| v == "1")
        && args.get(1).is_none_or(|arg| arg != CREDENTIAL_COMMAND)
}

/// Answer the prompt passed by ssh from the session environment.
pub fn answer(args: &[String]) -> String {
    let prompt = args.get(1).map_or("", String::as_str);
    let username = std::env::var(USERNAME_ENV).ok();
    let secret = std::env::var(ASKPASS_SECRET_ENV).ok();
    askpass_answer(prompt, username.as_deref(), secret.as_deref())
}
