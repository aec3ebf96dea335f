//! Remote URL construction from settings.

use pwsync_core::config::{Protocol, RemoteSettings};

use crate::errors::GitError;

/// Build the URL git uses to reach the configured remote.
///
/// SSH on the default port uses the scp-like `user@host:path` form; a custom
/// port needs `ssh://user@host:port/path`. HTTPS never embeds the username,
/// the credential helper supplies it.
///
/// # Errors
///
/// Returns an error when the pieces do not form a valid URL.
pub fn remote_url(remote: &RemoteSettings) -> Result<String, GitError> {
    let server = remote.server.trim().trim_end_matches(':');
    if server.is_empty() {
        return Err(GitError::InvalidRemote("no server configured".to_string()));
    }
    let location = remote.location.trim();

    let url = match remote.protocol {
        Protocol::Ssh if !remote.has_custom_port() => {
            format!("{}@{server}:{location}", remote.username)
        }
        Protocol::Ssh => format!(
            "ssh://{}@{server}:{}/{}",
            remote.username,
            remote.effective_port(),
            location.trim_start_matches('/'),
        ),
        Protocol::Https => {
            let authority = if remote.has_custom_port() {
                format!("{server}:{}", remote.effective_port())
            } else {
                server.to_string()
            };
            let url = format!("https://{authority}/{}", location.trim_start_matches('/'));
            url::Url::parse(&url).map_err(|e| GitError::InvalidRemote(format!("{url}: {e}")))?;
            url
        }
    };
    Ok(url)
}
