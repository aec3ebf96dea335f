//! Signing agent reached through a child process.
//!
//! The agent command (setting `agent_command`) is started once per
//! connection and spoken to in JSON lines over its stdin and stdout. Each
//! request carries an `id` that the response echoes; byte fields are
//! base64.
//!
//! ```text
//! > {"id":1,"method":"select_key"}
//! < {"id":1,"result":"user_interaction_required","pending":{"url":"...","token":"..."}}
//! > {"id":2,"method":"resume","token":"..."}
//! < {"id":2,"result":"success","data":{"key_id":"k1"}}
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::errors::AgentError;
use crate::identity::{
    AgentApi, AgentConnector, AgentErrorCode, AgentPayload, AgentRequest, AgentResponse,
    HashAlgorithm, PendingAction,
};

type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type Reader = Lines<Box<dyn AsyncBufRead + Send + Unpin>>;

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    key_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash_algorithm: Option<HashAlgorithm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
}

impl<'a> WireRequest<'a> {
    fn new(id: u64, method: &'a str) -> Self {
        Self {
            id,
            method,
            key_id: None,
            data: None,
            hash_algorithm: None,
            token: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WireResult {
    Success,
    Error,
    UserInteractionRequired,
}

#[derive(Debug, Deserialize)]
struct WireError {
    code: AgentErrorCode,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct WirePayload {
    key_id: Option<String>,
    description: Option<String>,
    public_key: Option<String>,
    algorithm: Option<String>,
    signature: Option<String>,
    follow_up_token: Option<String>,
}

impl WirePayload {
    fn decode(self) -> Result<AgentPayload, AgentError> {
        let bytes = |field: &str, value: Option<String>| {
            value
                .map(|v| STANDARD.decode(v.trim()))
                .transpose()
                .map_err(|e| AgentError::Protocol(format!("bad base64 in {field}: {e}")))
        };
        Ok(AgentPayload {
            public_key: bytes("public_key", self.public_key)?,
            signature: bytes("signature", self.signature)?,
            key_id: self.key_id,
            description: self.description,
            algorithm: self.algorithm,
            follow_up_token: self.follow_up_token,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    id: u64,
    result: WireResult,
    #[serde(default)]
    data: Option<WirePayload>,
    error: Option<WireError>,
    pending: Option<PendingAction>,
}

impl WireResponse {
    fn into_response(self) -> Result<AgentResponse, AgentError> {
        match self.result {
            WireResult::Success => Ok(AgentResponse::Success(
                self.data.unwrap_or_default().decode()?,
            )),
            WireResult::Error => {
                let error = self.error.unwrap_or(WireError {
                    code: AgentErrorCode::Generic,
                    message: "agent reported an error".to_string(),
                });
                Ok(AgentResponse::Error {
                    code: error.code,
                    message: error.message,
                })
            }
            WireResult::UserInteractionRequired => self
                .pending
                .map(AgentResponse::UserInteractionRequired)
                .ok_or_else(|| AgentError::Protocol("interaction without pending action".into())),
        }
    }
}

/// An agent connection speaking JSON lines.
pub struct JsonLinesAgent {
    io: Mutex<(Writer, Reader)>,
    next_id: AtomicU64,
    child: Option<Child>,
}

impl std::fmt::Debug for JsonLinesAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesAgent")
            .field("next_id", &self.next_id)
            .field("pid", &self.child.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}

impl JsonLinesAgent {
    /// Speak to an agent over the given streams.
    pub fn new<W, R>(writer: W, reader: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncBufRead + Send + Unpin> = Box::new(reader);
        Self {
            io: Mutex::new((Box::new(writer), reader.lines())),
            next_id: AtomicU64::new(1),
            child: None,
        }
    }

    async fn call(&self, request: WireRequest<'_>) -> Result<WireResponse, AgentError> {
        let mut line = serde_json::to_string(&request)
            .map_err(|e| AgentError::Protocol(format!("cannot encode request: {e}")))?;
        line.push('\n');

        let mut io = self.io.lock().await;
        let (writer, reader) = &mut *io;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;

        let reply = reader
            .next_line()
            .await?
            .ok_or_else(|| AgentError::Protocol("agent closed the connection".into()))?;
        let response: WireResponse = serde_json::from_str(&reply)
            .map_err(|e| AgentError::Protocol(format!("malformed agent response: {e}")))?;
        if response.id != request.id {
            return Err(AgentError::Protocol(format!(
                "response {} does not answer request {}",
                response.id, request.id
            )));
        }
        Ok(response)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl AgentApi for JsonLinesAgent {
    #[instrument(skip_all)]
    async fn execute(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let id = self.next_id();
        let wire = match &request {
            AgentRequest::SelectKey => WireRequest::new(id, "select_key"),
            AgentRequest::PublicKey { key_id } => WireRequest {
                key_id: Some(key_id.as_str()),
                ..WireRequest::new(id, "public_key")
            },
            AgentRequest::Sign {
                data,
                key_id,
                hash_algorithm,
                token,
            } => WireRequest {
                key_id: Some(key_id.as_str()),
                data: Some(STANDARD.encode(data)),
                hash_algorithm: Some(*hash_algorithm),
                token: token.as_deref(),
                ..WireRequest::new(id, "sign")
            },
        };
        debug!(id, method = wire.method, "agent request");
        self.call(wire).await?.into_response()
    }

    #[instrument(skip_all)]
    async fn resume(&self, action: &PendingAction) -> Result<AgentPayload, AgentError> {
        let wire = WireRequest {
            token: Some(&action.token),
            ..WireRequest::new(self.next_id(), "resume")
        };
        match self.call(wire).await?.into_response()? {
            AgentResponse::Success(payload) => Ok(payload),
            AgentResponse::Error { code, message } => Err(AgentError::Agent { code, message }),
            AgentResponse::UserInteractionRequired(_) => Err(AgentError::Protocol(
                "interaction is not complete yet".into(),
            )),
        }
    }
}

/// Starts the configured agent command.
#[derive(Debug, Clone)]
pub struct ProcessAgentConnector {
    command: String,
}

impl ProcessAgentConnector {
    /// Connector for a shell-quoted command line.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl AgentConnector for ProcessAgentConnector {
    #[instrument(skip(self), fields(command = %self.command))]
    async fn connect(&self) -> Result<Arc<dyn AgentApi>, AgentError> {
        let argv = shlex::split(&self.command)
            .filter(|argv| !argv.is_empty())
            .ok_or(AgentError::NotConfigured)?;
        let program = which::which(&argv[0]).map_err(|e| {
            AgentError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{}: {e}", argv[0]),
            ))
        })?;

        let mut child = Command::new(program)
            .args(&argv[1..])
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(AgentError::Protocol("agent pipes unavailable".into()));
        };
        debug!(pid = ?child.id(), "agent started");

        let mut agent = JsonLinesAgent::new(stdin, BufReader::new(stdout));
        agent.child = Some(child);
        Ok(Arc::new(agent))
    }
}
