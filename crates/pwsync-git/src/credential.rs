//! Git credential protocol handler for `pwsync git-credential`.
//!
//! Git invokes the helper configured by a password transport session; the
//! session hands the username and password down through the environment,
//! and the helper answers git's `get` request with them.

use std::collections::HashMap;
use std::io::{BufRead, Write};

use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::transport::{PASSWORD_ENV, USERNAME_ENV};

/// Credentials the helper can answer with.
#[derive(Debug, Clone)]
pub struct HelperCredentials {
    /// Account name.
    pub username: String,
    /// Account password.
    pub password: SecretString,
}

impl HelperCredentials {
    /// Read credentials passed down by the transport session.
    pub fn from_env() -> Option<Self> {
        let username = std::env::var(USERNAME_ENV).ok()?;
        let password = std::env::var(PASSWORD_ENV).ok()?;
        Some(Self {
            username,
            password: SecretString::from(password),
        })
    }
}

/// Handle a git credential helper request.
///
/// Reads the credential request from `input` and, for `get`, writes the
/// credentials back to `output`.
///
/// # Errors
///
/// Returns an error if I/O fails.
pub fn handle_credential_request<R: BufRead, W: Write>(
    operation: &str,
    credentials: Option<&HelperCredentials>,
    input: &mut R,
    output: &mut W,
) -> anyhow::Result<()> {
    match operation {
        "get" => handle_get(credentials, input, output),
        "store" | "erase" => {
            // Secrets live in the transport session only
            debug!("ignoring credential {operation} request");
            Ok(())
        }
        _ => {
            debug!("unknown credential operation: {operation}");
            Ok(())
        }
    }
}

fn handle_get<R: BufRead, W: Write>(
    credentials: Option<&HelperCredentials>,
    input: &mut R,
    output: &mut W,
) -> anyhow::Result<()> {
    let fields = parse_credential_input(input)?;

    let protocol = fields.get("protocol").map_or("", String::as_str);
    let host = fields.get("host").map_or("", String::as_str);

    if host.is_empty() {
        debug!("skipping credential request with no host");
        return Ok(());
    }

    let Some(credentials) = credentials else {
        debug!("no credentials in environment for host={host}");
        return Ok(());
    };

    // A username embedded in the URL wins; git rejects a mismatching answer
    let username = fields
        .get("username")
        .filter(|u| !u.is_empty())
        .map_or(credentials.username.as_str(), String::as_str);

    debug!("providing credential for host={host}");

    writeln!(output, "protocol={protocol}")?;
    writeln!(output, "host={host}")?;
    writeln!(output, "username={username}")?;
    writeln!(output, "password={}", credentials.password.expose_secret())?;
    writeln!(output)?;

    Ok(())
}

/// Parse git credential protocol input into key-value pairs.
fn parse_credential_input<R: BufRead>(input: &mut R) -> anyhow::Result<HashMap<String, String>> {
    let mut fields = HashMap::new();

    for line in input.lines() {
        let line = line?;
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once('=') {
            fields.insert(key.to_string(), value.to_string());
        }
    }

    Ok(fields)
}

/// Answer an askpass prompt from ssh.
///
/// Username prompts get the session's username; anything else (password,
/// passphrase) gets the session's secret.
pub fn askpass_answer(prompt: &str, username: Option<&str>, secret: Option<&str>) -> String {
    if prompt.to_lowercase().starts_with("username") {
        username.unwrap_or_default().to_string()
    } else {
        secret.unwrap_or_default().to_string()
    }
}
