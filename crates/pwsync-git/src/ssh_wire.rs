//! SSH wire helpers shared by the agent socket and signers.
//!
//! Encoding itself is `russh_keys::encoding`; this module adds the agent
//! protocol constants russh-keys keeps private and the signature blob
//! layout.

use russh_keys::encoding::{Encoding, Reader};

/// `SSH_AGENT_FAILURE`.
pub const AGENT_FAILURE: u8 = 5;
/// `SSH_AGENTC_REQUEST_IDENTITIES`.
pub const AGENT_REQUEST_IDENTITIES: u8 = 11;
/// `SSH_AGENT_IDENTITIES_ANSWER`.
pub const AGENT_IDENTITIES_ANSWER: u8 = 12;
/// `SSH_AGENTC_SIGN_REQUEST`.
pub const AGENT_SIGN_REQUEST: u8 = 13;
/// `SSH_AGENT_SIGN_RESPONSE`.
pub const AGENT_SIGN_RESPONSE: u8 = 14;

/// Agent flag asking for an `rsa-sha2-256` signature.
pub const RSA_SHA2_256: u32 = 2;
/// Agent flag asking for an `rsa-sha2-512` signature.
pub const RSA_SHA2_512: u32 = 4;

/// Encode an SSH signature blob: `string algorithm, string signature`.
pub fn signature_blob(algorithm: &str, raw: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(8 + algorithm.len() + raw.len());
    blob.extend_ssh_string(algorithm.as_bytes());
    blob.extend_ssh_string(raw);
    blob
}

/// Algorithm name leading a public key blob.
pub fn key_algorithm(blob: &[u8]) -> Option<String> {
    blob.reader(0)
        .read_string()
        .ok()
        .map(|name| String::from_utf8_lossy(name).into_owned())
}

/// Signature algorithm to use for a key, honoring RSA agent flags.
pub fn signature_algorithm(key_algorithm: &str, flags: u32) -> String {
    if key_algorithm != "ssh-rsa" {
        return key_algorithm.to_string();
    }
    if flags & RSA_SHA2_512 != 0 {
        "rsa-sha2-512".to_string()
    } else if flags & RSA_SHA2_256 != 0 {
        "rsa-sha2-256".to_string()
    } else {
        "ssh-rsa".to_string()
    }
}
