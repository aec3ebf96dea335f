//! SSH identity backed by an external signing agent.
//!
//! The agent lives outside this process and may need the user to approve a
//! request in another application. [`IdentityBuilder`] walks the agent
//! through three requests (connect, select a key, fetch its public key),
//! suspending with a [`PendingInteraction`] whenever the agent wants the
//! user. Once every gate is satisfied it yields an [`ApiIdentity`], which
//! signs on behalf of ssh through [`SshSigner`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use pwsync_core::config::{AGENT_KEY_ID, SharedSettings};
use pwsync_git::errors::GitError;
use pwsync_git::ssh_wire::{self, RSA_SHA2_256, RSA_SHA2_512};
use pwsync_git::transport::SshSigner;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use crate::errors::AgentError;

/// Request code of an interaction raised while signing.
pub const REQUEST_SIGN: i32 = 100;

/// How long a signature may wait for the user by default.
pub const DEFAULT_SIGNATURE_TIMEOUT: Duration = Duration::from_secs(300);

/// Category of an agent error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentErrorCode {
    /// The requested key does not exist (anymore).
    NoSuchKey,
    /// The key exists but cannot authenticate.
    NoAuthenticationKey,
    /// Anything else.
    #[serde(other)]
    Generic,
}

/// Digest the agent signs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-1, legacy `ssh-rsa` signatures.
    Sha1,
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

impl HashAlgorithm {
    /// Digest for a key algorithm and the agent protocol's signature flags.
    pub fn for_key(key_algorithm: &str, flags: u32) -> Self {
        match key_algorithm {
            "ssh-rsa" if flags & RSA_SHA2_512 != 0 => Self::Sha512,
            "ssh-rsa" if flags & RSA_SHA2_256 != 0 => Self::Sha256,
            "ssh-rsa" => Self::Sha1,
            "ecdsa-sha2-nistp384" => Self::Sha384,
            "ecdsa-sha2-nistp256" => Self::Sha256,
            _ => Self::Sha512,
        }
    }
}

/// A request to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentRequest {
    /// Let the user pick a key.
    SelectKey,
    /// Fetch the public key of a selected key.
    PublicKey {
        /// Selected key.
        key_id: String,
    },
    /// Sign data with a key.
    Sign {
        /// Data to sign.
        data: Vec<u8>,
        /// Key to sign with.
        key_id: String,
        /// Digest to use.
        hash_algorithm: HashAlgorithm,
        /// Token from an earlier interaction, if resuming one.
        token: Option<String>,
    },
}

/// An interaction the user must complete in the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Where the user completes it.
    pub url: String,
    /// Opaque token to resume the request with.
    pub token: String,
}

/// Data an agent returns. Every field is optional; which ones are set
/// depends on the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentPayload {
    /// Selected key.
    pub key_id: Option<String>,
    /// Human-readable key description.
    pub description: Option<String>,
    /// Public key in SSH wire format.
    pub public_key: Option<Vec<u8>>,
    /// Key algorithm, such as `ssh-ed25519`.
    pub algorithm: Option<String>,
    /// Raw signature.
    pub signature: Option<Vec<u8>>,
    /// Token to re-issue a request with after an interaction.
    pub follow_up_token: Option<String>,
}

/// The agent's answer to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentResponse {
    /// The request succeeded.
    Success(AgentPayload),
    /// The request failed.
    Error {
        /// Error category.
        code: AgentErrorCode,
        /// Message from the agent.
        message: String,
    },
    /// The user must act before the request can finish.
    UserInteractionRequired(PendingAction),
}

/// A connected agent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentApi: Send + Sync + fmt::Debug {
    /// Send a request.
    async fn execute(&self, request: AgentRequest) -> Result<AgentResponse, AgentError>;

    /// Collect the result of an interaction the user completed.
    async fn resume(&self, action: &PendingAction) -> Result<AgentPayload, AgentError>;
}

/// Opens agent connections.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentConnector: Send + Sync + fmt::Debug {
    /// Connect to the agent.
    async fn connect(&self) -> Result<Arc<dyn AgentApi>, AgentError>;
}

/// Suspension handed to the front end: complete `action`, then relay the
/// result under `request_code`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInteraction {
    /// Code the result must be relayed with.
    pub request_code: i32,
    /// What the user must do.
    pub action: PendingAction,
}

/// Result of [`IdentityBuilder::try_build`].
#[derive(Debug)]
pub enum BuildStep {
    /// Every gate is satisfied.
    Ready(Arc<ApiIdentity>),
    /// Waiting on the user.
    Suspended(PendingInteraction),
}

/// Drives the agent until an [`ApiIdentity`] can be built.
///
/// The builder is resumable: each [`try_build`](Self::try_build) picks up at
/// the first unsatisfied gate and never re-requests a satisfied one.
#[derive(Debug)]
pub struct IdentityBuilder {
    connector: Arc<dyn AgentConnector>,
    settings: SharedSettings,
    interactions: mpsc::UnboundedSender<PendingInteraction>,
    timeout: Duration,
    api: Option<Arc<dyn AgentApi>>,
    key_id: Option<String>,
    description: Option<String>,
    public_key: Option<Vec<u8>>,
    algorithm: Option<String>,
    pending: Option<PendingInteraction>,
}

impl IdentityBuilder {
    /// Start a builder. A key id remembered in `settings` counts as already
    /// selected.
    pub fn new(
        connector: Arc<dyn AgentConnector>,
        settings: SharedSettings,
        interactions: mpsc::UnboundedSender<PendingInteraction>,
    ) -> Self {
        let key_id = settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(AGENT_KEY_ID)
            .filter(|id| !id.trim().is_empty());
        Self {
            connector,
            settings,
            interactions,
            timeout: DEFAULT_SIGNATURE_TIMEOUT,
            api: None,
            key_id,
            description: None,
            public_key: None,
            algorithm: None,
            pending: None,
        }
    }

    /// How long a built identity waits for an interactive signature.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Selected key, if any.
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// Advance through the gates.
    ///
    /// While an interaction is outstanding the same suspension is returned
    /// without contacting the agent. When the agent reports the key gone at
    /// any gate, the key is forgotten and selected again, once.
    ///
    /// # Errors
    ///
    /// Returns an error when the agent fails or answers out of protocol.
    #[instrument(skip(self), fields(key_id = ?self.key_id))]
    pub async fn try_build(&mut self, request_code: i32) -> Result<BuildStep, AgentError> {
        if let Some(pending) = &self.pending {
            debug!("interaction still outstanding");
            return Ok(BuildStep::Suspended(pending.clone()));
        }

        let api = match &self.api {
            Some(api) => Arc::clone(api),
            None => {
                let api = self.connector.connect().await?;
                self.api = Some(Arc::clone(&api));
                api
            }
        };

        let mut reselected = false;
        loop {
            let err = match self.next_gate(api.as_ref(), request_code).await {
                Ok(Some(suspended)) => return Ok(suspended),
                Ok(None) => break,
                Err(err) => err,
            };
            if err.is_key_lost() && !reselected {
                warn!("agent key is gone, selecting again: {err}");
                reselected = true;
                self.reset_key();
                continue;
            }
            return Err(err);
        }

        self.identity().map(BuildStep::Ready)
    }

    /// Run the selection and public-key gates that are still open.
    /// `Ok(None)` means every gate is satisfied.
    async fn next_gate(
        &mut self,
        api: &dyn AgentApi,
        request_code: i32,
    ) -> Result<Option<BuildStep>, AgentError> {
        let key_id = match self.key_id.clone() {
            Some(id) => id,
            None => match api.execute(AgentRequest::SelectKey).await? {
                AgentResponse::Success(payload) => {
                    self.absorb(&payload);
                    self.key_id
                        .clone()
                        .ok_or_else(|| AgentError::Protocol("agent selected no key".into()))?
                }
                AgentResponse::UserInteractionRequired(action) => {
                    return Ok(Some(self.suspend(request_code, action)));
                }
                AgentResponse::Error { code, message } => {
                    return Err(AgentError::Agent { code, message });
                }
            },
        };

        if self.public_key.is_none() {
            match api.execute(AgentRequest::PublicKey { key_id }).await? {
                AgentResponse::Success(payload) => self.absorb(&payload),
                AgentResponse::UserInteractionRequired(action) => {
                    return Ok(Some(self.suspend(request_code, action)));
                }
                AgentResponse::Error { code, message } => {
                    return Err(AgentError::Agent { code, message });
                }
            }
        }
        Ok(None)
    }

    /// Absorb the result of a completed interaction and clear the
    /// suspension. `None` only clears it.
    pub fn consume(&mut self, data: Option<&AgentPayload>) {
        self.pending = None;
        if let Some(payload) = data {
            self.absorb(payload);
        }
    }

    /// Collect the result of the outstanding interaction from the agent and
    /// absorb it.
    ///
    /// # Errors
    ///
    /// Returns an error when the agent cannot report the result.
    pub async fn resume(&mut self) -> Result<(), AgentError> {
        let (Some(pending), Some(api)) = (self.pending.clone(), self.api.clone()) else {
            return Ok(());
        };
        let payload = api.resume(&pending.action).await?;
        self.consume(Some(&payload));
        Ok(())
    }

    fn suspend(&mut self, request_code: i32, action: PendingAction) -> BuildStep {
        info!(url = %action.url, "agent needs the user");
        let pending = PendingInteraction {
            request_code,
            action,
        };
        self.pending = Some(pending.clone());
        BuildStep::Suspended(pending)
    }

    fn absorb(&mut self, payload: &AgentPayload) {
        if let Some(id) = payload.key_id.as_ref().filter(|id| !id.is_empty()) {
            if self.key_id.as_ref() != Some(id) {
                self.key_id = Some(id.clone());
                self.persist_key_id(id);
            }
        }
        if payload.description.is_some() {
            self.description.clone_from(&payload.description);
        }
        if let Some(blob) = &payload.public_key {
            self.public_key = Some(blob.clone());
            self.algorithm = payload
                .algorithm
                .clone()
                .or_else(|| ssh_wire::key_algorithm(blob));
        }
    }

    fn reset_key(&mut self) {
        self.key_id = None;
        self.description = None;
        self.public_key = None;
        self.algorithm = None;
        self.persist_key_id("");
    }

    fn persist_key_id(&self, id: &str) {
        let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = settings.set(AGENT_KEY_ID, id).and_then(|()| settings.write()) {
            warn!("failed to remember agent key: {e:#}");
        }
    }

    fn identity(&self) -> Result<Arc<ApiIdentity>, AgentError> {
        let (Some(api), Some(key_id), Some(public_key)) =
            (&self.api, &self.key_id, &self.public_key)
        else {
            return Err(AgentError::Protocol("agent returned no public key".into()));
        };
        let algorithm = self
            .algorithm
            .clone()
            .ok_or_else(|| AgentError::Protocol("unknown key algorithm".into()))?;
        Ok(Arc::new(ApiIdentity {
            key_id: key_id.clone(),
            description: self.description.clone().unwrap_or_else(|| key_id.clone()),
            public_key: public_key.clone(),
            algorithm,
            api: Arc::clone(api),
            interactions: self.interactions.clone(),
            timeout: self.timeout,
            pending: Mutex::new(None),
        }))
    }
}

struct PendingSignature {
    request: AgentRequest,
    reply: oneshot::Sender<Result<Vec<u8>, AgentError>>,
}

/// A key held by the agent.
pub struct ApiIdentity {
    key_id: String,
    description: String,
    public_key: Vec<u8>,
    algorithm: String,
    api: Arc<dyn AgentApi>,
    interactions: mpsc::UnboundedSender<PendingInteraction>,
    timeout: Duration,
    pending: Mutex<Option<PendingSignature>>,
}

impl fmt::Debug for ApiIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiIdentity")
            .field("key_id", &self.key_id)
            .field("description", &self.description)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl ApiIdentity {
    /// Agent's key id.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Key algorithm.
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Whether a signature is waiting on the user.
    pub fn is_waiting(&self) -> bool {
        self.lock_pending().is_some()
    }

    /// Ask the agent for a raw signature of `data`.
    ///
    /// When the agent needs the user, the interaction is sent to the control
    /// loop and this waits for [`post_signature`](Self::post_signature), up
    /// to the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the agent fails, the interaction is cancelled,
    /// or the timeout passes.
    #[instrument(skip(self, data), fields(key_id = %self.key_id, len = data.len()))]
    pub async fn get_signature(
        &self,
        data: &[u8],
        hash_algorithm: HashAlgorithm,
    ) -> Result<Vec<u8>, AgentError> {
        let request = AgentRequest::Sign {
            data: data.to_vec(),
            key_id: self.key_id.clone(),
            hash_algorithm,
            token: None,
        };
        let action = match self.api.execute(request.clone()).await? {
            AgentResponse::UserInteractionRequired(action) => action,
            response => return signature_of(response),
        };

        let (reply, waiter) = oneshot::channel();
        *self.lock_pending() = Some(PendingSignature { request, reply });
        let interaction = PendingInteraction {
            request_code: REQUEST_SIGN,
            action,
        };
        if self.interactions.send(interaction).is_err() {
            self.lock_pending().take();
            return Err(AgentError::Cancelled);
        }

        debug!("waiting for signature interaction");
        match tokio::time::timeout(self.timeout, waiter).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AgentError::Cancelled),
            Err(_) => {
                self.lock_pending().take();
                warn!("signature interaction timed out");
                Err(AgentError::Timeout(self.timeout))
            }
        }
    }

    /// Deliver the result of a signature interaction and wake the waiting
    /// signer.
    ///
    /// The waiter is released exactly once: with the signature, with the
    /// signature obtained by re-issuing the request with a follow-up token,
    /// or with an error when the data is missing or malformed. Without a
    /// waiting signer this does nothing.
    pub async fn post_signature(&self, data: Option<AgentPayload>) {
        let Some(pending) = self.lock_pending().take() else {
            debug!("no signature waiting");
            return;
        };
        let result = self.resolve(pending.request, data).await;
        if pending.reply.send(result).is_err() {
            debug!("signature arrived after the signer gave up");
        }
    }

    /// Ask the agent for the result of a completed signature interaction.
    ///
    /// # Errors
    ///
    /// Returns an error when the agent cannot report it.
    pub async fn fetch_result(&self, action: &PendingAction) -> Result<AgentPayload, AgentError> {
        self.api.resume(action).await
    }

    /// Abandon a waiting signature.
    pub fn cancel(&self) {
        if self.lock_pending().take().is_some() {
            info!("signature interaction cancelled");
        }
    }

    async fn resolve(
        &self,
        request: AgentRequest,
        data: Option<AgentPayload>,
    ) -> Result<Vec<u8>, AgentError> {
        let payload =
            data.ok_or_else(|| AgentError::Protocol("interaction returned no data".into()))?;
        if let Some(signature) = payload.signature {
            return Ok(signature);
        }
        let token = payload
            .follow_up_token
            .ok_or_else(|| AgentError::Protocol("interaction returned no signature".into()))?;

        let AgentRequest::Sign {
            data,
            key_id,
            hash_algorithm,
            ..
        } = request
        else {
            return Err(AgentError::Protocol("not a signing request".into()));
        };
        let retry = AgentRequest::Sign {
            data,
            key_id,
            hash_algorithm,
            token: Some(token),
        };
        match self.api.execute(retry).await? {
            AgentResponse::UserInteractionRequired(_) => Err(AgentError::Protocol(
                "agent asked for another interaction after a follow-up".into(),
            )),
            response => signature_of(response),
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<PendingSignature>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn signature_of(response: AgentResponse) -> Result<Vec<u8>, AgentError> {
    match response {
        AgentResponse::Success(payload) => payload
            .signature
            .ok_or_else(|| AgentError::Protocol("agent returned no signature".into())),
        AgentResponse::Error { code, message } => Err(AgentError::Agent { code, message }),
        AgentResponse::UserInteractionRequired(_) => {
            Err(AgentError::Protocol("unexpected interaction".into()))
        }
    }
}

#[async_trait]
impl SshSigner for ApiIdentity {
    fn public_key_blob(&self) -> Vec<u8> {
        self.public_key.clone()
    }

    fn comment(&self) -> String {
        self.description.clone()
    }

    async fn sign(&self, data: &[u8], flags: u32) -> Result<Vec<u8>, GitError> {
        let hash = HashAlgorithm::for_key(&self.algorithm, flags);
        let raw = self
            .get_signature(data, hash)
            .await
            .map_err(|e| GitError::Internal {
                message: "signing agent failed".to_string(),
                cause: Some(e.to_string()),
            })?;
        let algorithm = ssh_wire::signature_algorithm(&self.algorithm, flags);
        Ok(ssh_wire::signature_blob(&algorithm, &raw))
    }
}
