//! The private key used in ssh-key mode.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use pwsync_git::transport::TransportSession;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

/// Whether a key needs a passphrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// Usable as is.
    Unencrypted,
    /// Needs a passphrase.
    Encrypted,
}

fn read_key(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read SSH key {}", path.display()))
}

/// Check that `path` holds a private key and whether it is encrypted.
///
/// # Errors
///
/// Returns an error when the file cannot be read or is not a supported
/// private key.
pub fn inspect_key(path: &Path) -> Result<KeyState> {
    let pem = read_key(path)?;
    match russh_keys::decode_secret_key(&pem, None) {
        Ok(_) => Ok(KeyState::Unencrypted),
        Err(russh_keys::Error::KeyIsEncrypted) => Ok(KeyState::Encrypted),
        Err(e) => bail!("{} is not a supported private key: {e}", path.display()),
    }
}

/// Whether `passphrase` decrypts the key at `path`.
///
/// # Errors
///
/// Returns an error when the file cannot be read.
pub fn passphrase_unlocks(path: &Path, passphrase: &SecretString) -> Result<bool> {
    let pem = read_key(path)?;
    Ok(russh_keys::decode_secret_key(&pem, Some(passphrase.expose_secret())).is_ok())
}

/// Copy an existing private key to `dest`, readable only by the owner.
///
/// # Errors
///
/// Returns an error when `source` is not a private key or cannot be copied.
pub fn import(source: &Path, dest: &Path) -> Result<()> {
    inspect_key(source)?;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::copy(source, dest)
        .with_context(|| format!("failed to copy key to {}", dest.display()))?;
    restrict_permissions(dest)?;
    info!(from = %source.display(), to = %dest.display(), "imported SSH key");
    Ok(())
}

/// Generate a new ed25519 key at `dest` with `ssh-keygen`, returning the
/// public key line to register with the server.
///
/// A passphrase never reaches ssh-keygen's command line: ssh-keygen asks
/// for it through `askpass`, the executable answering in askpass mode.
///
/// # Errors
///
/// Returns an error when `ssh-keygen` is missing or fails.
pub async fn generate(
    dest: &Path,
    comment: &str,
    passphrase: Option<&SecretString>,
    askpass: &Path,
) -> Result<String> {
    let keygen = which::which("ssh-keygen").context("ssh-keygen not found in PATH")?;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut cmd = tokio::process::Command::new(keygen);
    cmd.args(["-q", "-t", "ed25519", "-C", comment]);
    match passphrase {
        Some(secret) => TransportSession::askpass_only(askpass, secret).apply(&mut cmd),
        None => {
            cmd.args(["-N", ""]);
        }
    }
    let output = cmd
        .arg("-f")
        .arg(dest)
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .context("failed to run ssh-keygen")?;
    if !output.status.success() {
        bail!(
            "ssh-keygen failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    restrict_permissions(dest)?;
    debug!(path = %dest.display(), encrypted = passphrase.is_some(), "generated SSH key");

    let public = public_key_path(dest);
    let line = std::fs::read_to_string(&public)
        .with_context(|| format!("failed to read {}", public.display()))?;
    Ok(line.trim().to_string())
}

/// Path of the public half of a key.
pub fn public_key_path(private: &Path) -> PathBuf {
    let mut name = private.as_os_str().to_owned();
    name.push(".pub");
    PathBuf::from(name)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("failed to restrict permissions of {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn has_keygen() -> bool {
        which::which("ssh-keygen").is_ok()
    }

    /// Stand-in for the binary's askpass mode.
    #[cfg(unix)]
    fn askpass_script(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("askpass.sh");
        std::fs::write(
            &path,
            format!(
                "#!/bin/sh\nprintf '%s\\n' \"${}\"\n",
                pwsync_git::transport::ASKPASS_SECRET_ENV
            ),
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_should_reject_non_key_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "not a key").unwrap();

        assert!(inspect_key(&path).is_err());
        assert!(import(&path, &dir.path().join("dest")).is_err());
        assert!(!dir.path().join("dest").exists());
    }

    #[test]
    fn test_should_derive_public_key_path() {
        assert_eq!(
            public_key_path(Path::new("/data/ssh_key")),
            PathBuf::from("/data/ssh_key.pub")
        );
    }

    #[tokio::test]
    async fn test_should_generate_and_import_plain_key() {
        if !has_keygen() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let generated = dir.path().join("gen/id");

        let public = generate(&generated, "pwsync-test", None, Path::new("/nonexistent"))
            .await
            .unwrap();
        assert!(public.starts_with("ssh-ed25519 "));
        assert!(public.ends_with("pwsync-test"));
        assert_eq!(inspect_key(&generated).unwrap(), KeyState::Unencrypted);

        let imported = dir.path().join("store/ssh_key");
        import(&generated, &imported).unwrap();
        assert_eq!(inspect_key(&imported).unwrap(), KeyState::Unencrypted);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&imported).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_should_encrypt_generated_key_through_askpass() {
        if !has_keygen() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let askpass = askpass_script(dir.path());
        let path = dir.path().join("id");
        let secret = SecretString::from("hunter2");

        generate(&path, "pwsync-test", Some(&secret), &askpass)
            .await
            .unwrap();

        assert_eq!(inspect_key(&path).unwrap(), KeyState::Encrypted);
        assert!(passphrase_unlocks(&path, &secret).unwrap());
        assert!(!passphrase_unlocks(&path, &SecretString::from("wrong")).unwrap());
    }
}
