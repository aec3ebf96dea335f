//! pwsync - synchronize a git-backed password store with its remote.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pwsync_cmd::factory::Factory;
use pwsync_ops::orchestrator::OperationCode;

/// Process exit codes.
mod exit_codes {
    pub const OK: i32 = 0;
    pub const ERROR: i32 = 1;
    pub const CANCEL: i32 = 2;
}

/// pwsync - keep a password store in sync with its git remote.
#[derive(Debug, Parser)]
#[command(
    name = "pwsync",
    version,
    about = "Synchronize a git-backed password store",
    long_about = "Clone, pull, push, and sync a git-backed password store, authenticating \
                  with an SSH key, a username and password, or an external signing agent."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Clone the remote into the store directory.
    Clone(pwsync_cmd::operation::OperationArgs),
    /// Pull from the remote, rebasing local commits.
    Pull(pwsync_cmd::operation::OperationArgs),
    /// Push every branch to the remote.
    Push(pwsync_cmd::operation::OperationArgs),
    /// Commit local changes, pull, then push.
    Sync(pwsync_cmd::operation::OperationArgs),
    /// Abort a rebase left stopped by a conflicting pull.
    AbortRebase(pwsync_cmd::operation::OperationArgs),
    /// Manage settings.
    #[command(subcommand)]
    Config(pwsync_cmd::config::ConfigCommand),
    /// Git credential helper used by password authentication.
    #[command(name = "git-credential", hide = true)]
    GitCredential(pwsync_cmd::git_credential::GitCredentialArgs),
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    if pwsync_cmd::askpass::is_askpass_invocation(&args) {
        println!("{}", pwsync_cmd::askpass::answer(&args));
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PWSYNC_DEBUG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let factory = Factory::new(env!("CARGO_PKG_VERSION").to_string());

    let exit_code = if let Some(cmd) = cli.command {
        match run_command(cmd, &factory).await {
            Ok(()) => exit_codes::OK,
            Err(e) => {
                if e.downcast_ref::<pwsync_core::cmdutil::SilentError>().is_some() {
                    exit_codes::ERROR
                } else if e.downcast_ref::<pwsync_core::cmdutil::CancelError>().is_some() {
                    exit_codes::CANCEL
                } else {
                    tracing::error!("{e:#}");
                    exit_codes::ERROR
                }
            }
        }
    } else {
        use clap::CommandFactory;
        Cli::command().print_help().ok();
        println!();
        exit_codes::OK
    };

    std::process::exit(exit_code);
}

async fn run_command(cmd: Commands, factory: &Factory) -> anyhow::Result<()> {
    match cmd {
        Commands::Clone(args) => args.run(factory, OperationCode::Clone).await,
        Commands::Pull(args) => args.run(factory, OperationCode::Pull).await,
        Commands::Push(args) => args.run(factory, OperationCode::Push).await,
        Commands::Sync(args) => args.run(factory, OperationCode::Sync).await,
        Commands::AbortRebase(args) => args.run(factory, OperationCode::AbortRebase).await,
        Commands::Config(sub) => sub.run(factory),
        Commands::GitCredential(args) => args.run(factory),
    }
}
