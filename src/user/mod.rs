//! Users and their SSH public keys as the remote host knows them.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Serialize};

use crate::repository::RepositoryError;

/// Key types accepted in an OpenSSH public key line
const KEY_TYPES: &[&str] = &[
    "ssh-rsa",
    "ssh-ed25519",
    "ssh-dss",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
    "sk-ssh-ed25519@openssh.com",
    "sk-ecdsa-sha2-nistp256@openssh.com",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Names are non-empty and limited to letters, digits and `-+.@_`
    pub fn validate(&self) -> Result<(), RepositoryError> {
        let valid = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.' | '@' | '_'));
        if valid {
            Ok(())
        } else {
            Err(RepositoryError::InvalidUser(format!(
                "username is not valid: {:?}",
                self.name
            )))
        }
    }

    /// Account slug on the remote host: the part before any `@`
    pub fn slug(&self) -> &str {
        self.name.split('@').next().unwrap_or(&self.name)
    }
}

/// A public key registered for a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKey {
    pub id: u64,
    pub label: String,
    pub text: String,
}

/// Keys rendered as `label -> key text`, the way API clients list them
pub fn key_map(keys: &[SshKey]) -> BTreeMap<String, String> {
    keys.iter()
        .map(|k| (k.label.clone(), k.text.clone()))
        .collect()
}

/// Check that `body` is an OpenSSH public key line, `<type> <base64> [comment]`,
/// whose decoded blob names the same key type
pub fn validate_key(body: &str) -> Result<(), RepositoryError> {
    let mut fields = body.split_whitespace();
    let (Some(kind), Some(blob)) = (fields.next(), fields.next()) else {
        return Err(RepositoryError::InvalidKey("expected '<type> <key> [comment]'".to_string()));
    };
    if !KEY_TYPES.contains(&kind) {
        return Err(RepositoryError::InvalidKey(format!("unknown key type {kind}")));
    }
    let decoded = B64
        .decode(blob)
        .map_err(|e| RepositoryError::InvalidKey(format!("key body is not base64: {e}")))?;
    if blob_key_type(&decoded) != Some(kind.as_bytes()) {
        return Err(RepositoryError::InvalidKey(format!(
            "key body does not hold a {kind} key"
        )));
    }
    Ok(())
}

/// Leading length-prefixed string of an SSH wire-format key blob
fn blob_key_type(blob: &[u8]) -> Option<&[u8]> {
    let (len, rest) = blob.split_first_chunk::<4>()?;
    let len = usize::try_from(u32::from_be_bytes(*len)).ok()?;
    rest.get(..len)
}
