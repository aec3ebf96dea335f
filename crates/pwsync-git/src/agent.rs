//! Ephemeral SSH agent socket.
//!
//! Serves the identity-listing and signing subset of the SSH agent protocol
//! for a single [`SshSigner`], so ssh can authenticate with a key held by an
//! external signing agent. Every other request is answered with failure.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh_keys::encoding::{Encoding, Reader};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::errors::GitError;
use crate::ssh_wire::{
    AGENT_FAILURE, AGENT_IDENTITIES_ANSWER, AGENT_REQUEST_IDENTITIES, AGENT_SIGN_REQUEST,
    AGENT_SIGN_RESPONSE,
};
use crate::transport::SshSigner;

const MAX_MESSAGE_LEN: usize = 256 * 1024;

/// A listening agent socket, removed when dropped.
#[derive(Debug)]
pub struct AgentSocket {
    _dir: TempDir,
    path: PathBuf,
    task: JoinHandle<()>,
}

impl AgentSocket {
    /// Bind a socket in a private temporary directory and start serving.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or socket cannot be created.
    pub fn bind(signer: Arc<dyn SshSigner>) -> Result<Self, GitError> {
        let dir = tempfile::Builder::new().prefix("pwsync-agent-").tempdir()?;
        let path = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&path)?;
        debug!(path = %path.display(), "agent socket listening");

        // Connections live in the accept task's JoinSet, so aborting that
        // task also aborts every open connection.
        let task = tokio::spawn(async move {
            let mut connections = JoinSet::new();
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => {
                            let signer = Arc::clone(&signer);
                            connections.spawn(async move {
                                if let Err(e) = serve_connection(stream, signer.as_ref()).await {
                                    debug!("agent connection closed: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            warn!("agent socket accept failed: {e}");
                            break;
                        }
                    },
                    Some(_) = connections.join_next(), if !connections.is_empty() => {}
                }
            }
        });

        Ok(Self {
            _dir: dir,
            path,
            task,
        })
    }

    /// Socket path for `SSH_AUTH_SOCK`.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for AgentSocket {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Answer agent requests on one connection until the peer hangs up.
///
/// # Errors
///
/// Returns an error on I/O failure or an oversized message.
pub async fn serve_connection<S>(mut stream: S, signer: &dyn SshSigner) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let mut len = [0u8; 4];
        match stream.read_exact(&mut len).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }
        let len = usize::try_from(u32::from_be_bytes(len))
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad length"))?;
        if len == 0 || len > MAX_MESSAGE_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("agent message length {len} out of range"),
            ));
        }

        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;

        let reply = handle_message(&body, signer).await;
        let mut framed = Vec::with_capacity(reply.len() + 4);
        framed.extend_ssh_string(&reply);
        stream.write_all(&framed).await?;
        stream.flush().await?;
    }
}

async fn handle_message(body: &[u8], signer: &dyn SshSigner) -> Vec<u8> {
    match body[0] {
        AGENT_REQUEST_IDENTITIES => {
            let mut reply = vec![AGENT_IDENTITIES_ANSWER];
            reply.extend_from_slice(&1u32.to_be_bytes());
            reply.extend_ssh_string(&signer.public_key_blob());
            reply.extend_ssh_string(signer.comment().as_bytes());
            reply
        }
        AGENT_SIGN_REQUEST => {
            let mut reader = body.reader(1);
            let (Ok(key), Ok(data)) = (reader.read_string(), reader.read_string()) else {
                debug!("malformed sign request");
                return vec![AGENT_FAILURE];
            };
            let flags = reader.read_u32().unwrap_or(0);
            if key != signer.public_key_blob().as_slice() {
                debug!("sign request for an unknown key");
                return vec![AGENT_FAILURE];
            }
            match signer.sign(data, flags).await {
                Ok(signature) => {
                    let mut reply = vec![AGENT_SIGN_RESPONSE];
                    reply.extend_ssh_string(&signature);
                    reply
                }
                Err(e) => {
                    warn!("signing failed: {e}");
                    vec![AGENT_FAILURE]
                }
            }
        }
        other => {
            debug!(request = other, "unsupported agent request");
            vec![AGENT_FAILURE]
        }
    }
}
