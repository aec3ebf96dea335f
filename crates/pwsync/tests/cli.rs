//! End-to-end tests of the `pwsync` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn pwsync(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("pwsync").unwrap();
    cmd.env("PWSYNC_CONFIG_DIR", config_dir.path())
        .env("PWSYNC_DATA_DIR", config_dir.path())
        .env("PWSYNC_PROMPT_DISABLED", "1")
        .env_remove("PWSYNC_ASKPASS");
    cmd
}

#[test]
fn test_should_list_operations_in_help() {
    let dir = TempDir::new().unwrap();
    pwsync(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("abort-rebase"))
        .stdout(predicate::str::contains("git-credential").not());
}

#[test]
fn test_should_persist_settings_between_runs() {
    let dir = TempDir::new().unwrap();
    pwsync(&dir)
        .args(["config", "set", "git_remote_server", "git.example.com"])
        .assert()
        .success();

    pwsync(&dir)
        .args(["config", "get", "git_remote_server"])
        .assert()
        .success()
        .stdout("git.example.com\n");

    pwsync(&dir)
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("git_remote_server=git.example.com"))
        .stdout(predicate::str::contains("git_remote_auth=ssh-key"));
}

#[test]
fn test_should_reject_invalid_setting_value() {
    let dir = TempDir::new().unwrap();
    pwsync(&dir)
        .args(["config", "set", "git_remote_protocol", "ftp"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("valid values are ssh, https"));
}

#[test]
fn test_should_answer_as_askpass_program() {
    let dir = TempDir::new().unwrap();
    pwsync(&dir)
        .env("PWSYNC_ASKPASS", "1")
        .env("PWSYNC_ASKPASS_SECRET", "open sesame")
        .arg("Enter passphrase for key '/tmp/id':")
        .assert()
        .success()
        .stdout("open sesame\n");
}

#[test]
fn test_should_answer_git_credential_request() {
    let dir = TempDir::new().unwrap();
    pwsync(&dir)
        .env("PWSYNC_ASKPASS", "1")
        .env("PWSYNC_GIT_USERNAME", "alice")
        .env("PWSYNC_GIT_PASSWORD", "secret")
        .args(["git-credential", "get"])
        .write_stdin("protocol=https\nhost=git.example.com\n\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("username=alice"))
        .stdout(predicate::str::contains("password=secret"));
}

#[test]
fn test_should_fail_sync_without_remote() {
    let dir = TempDir::new().unwrap();
    pwsync(&dir)
        .arg("sync")
        .assert()
        .code(1)
        .stderr(predicate::str::is_empty().not());
}
