//! Viewer identity: a best-effort fingerprint of an anonymous caller.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;

/// Upper bound on key length accepted by the stores.
pub const MAX_KEY_LEN: usize = 64;

/// A probable distinct viewer. Shared fingerprints collide; the key is not a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(with = "hex::serde")]
    pub key: Vec<u8>,
    #[serde(skip)]
    pub address: String,
    #[serde(skip)]
    pub user_agent: String,
}

impl Identity {
    /// Derive the identity for an already resolved address.
    pub fn fingerprint(address: &str, user_agent: &str) -> Self {
        Self {
            key: fingerprint_key(address, user_agent),
            address: address.to_string(),
            user_agent: user_agent.to_string(),
        }
    }

    /// Derive the identity from raw request data (forwarded-for header, peer address, user agent).
    pub fn from_request(forwarded_for: Option<&str>, peer: &str, user_agent: &str) -> Self {
        let address = resolve_address(forwarded_for, peer);
        Self::fingerprint(&address, user_agent)
    }

    pub fn key_hex(&self) -> String {
        hex::encode(&self.key)
    }

    /// Reject empty or oversized keys. Called before any store I/O.
    pub fn validate(&self) -> AppResult<()> {
        validate_key(&self.key)
    }
}

pub fn validate_key(key: &[u8]) -> AppResult<()> {
    if key.is_empty() {
        return Err(AppError::InvalidIdentity("empty key".to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(AppError::InvalidIdentity(format!(
            "key is {} bytes, max {}",
            key.len(),
            MAX_KEY_LEN
        )));
    }
    Ok(())
}

/// SHA-256 over both fields, each prefixed with its length so that no pair of
/// fields can produce the byte stream of another pair.
fn fingerprint_key(address: &str, user_agent: &str) -> Vec<u8> {
    let mut h = Sha256::new();
    for field in [address, user_agent] {
        h.update((field.len() as u64).to_be_bytes());
        h.update(field.as_bytes());
    }
    h.finalize().to_vec()
}

/// Pick the caller address: first `X-Forwarded-For` entry if present, else the peer.
/// The port is dropped when the value parses as a socket address.
pub fn resolve_address(forwarded_for: Option<&str>, peer: &str) -> String {
    let raw = forwarded_for
        .and_then(|h| h.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| peer.trim());
    match raw.parse::<SocketAddr>() {
        Ok(addr) => addr.ip().to_string(),
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = Identity::fingerprint("10.0.0.1", "Mozilla/5.0");
        let b = Identity::fingerprint("10.0.0.1", "Mozilla/5.0");
        assert_eq!(a.key, b.key);
        assert_eq!(a.key.len(), 32);
    }

    #[test]
    fn fields_do_not_bleed_into_each_other() {
        let a = Identity::fingerprint("10.0.0.1", "0Mozilla");
        let b = Identity::fingerprint("10.0.0.10", "Mozilla");
        assert_ne!(a.key, b.key);
        let c = Identity::fingerprint("ab", "");
        let d = Identity::fingerprint("a", "b");
        assert_ne!(c.key, d.key);
    }

    #[test]
    fn different_agents_differ() {
        let a = Identity::fingerprint("10.0.0.1", "curl/8.0");
        let b = Identity::fingerprint("10.0.0.1", "Mozilla/5.0");
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn resolve_prefers_forwarded_for() {
        assert_eq!(
            resolve_address(Some("203.0.113.7, 10.0.0.1"), "10.0.0.1:5555"),
            "203.0.113.7"
        );
        assert_eq!(resolve_address(Some("  "), "10.0.0.1:5555"), "10.0.0.1");
        assert_eq!(resolve_address(None, "10.0.0.1:5555"), "10.0.0.1");
    }

    #[test]
    fn resolve_strips_ports_only_when_parseable() {
        assert_eq!(resolve_address(None, "[2001:db8::1]:443"), "2001:db8::1");
        assert_eq!(resolve_address(None, "2001:db8::1"), "2001:db8::1");
        assert_eq!(resolve_address(None, "unix-socket"), "unix-socket");
    }

    #[test]
    fn port_does_not_change_identity() {
        let a = Identity::from_request(None, "10.0.0.1:1111", "ua");
        let b = Identity::from_request(None, "10.0.0.1:2222", "ua");
        assert_eq!(a.key, b.key);
        assert_eq!(a.address, "10.0.0.1");
    }

    #[test]
    fn validate_rejects_empty_and_oversized() {
        let mut id = Identity::fingerprint("10.0.0.1", "ua");
        assert!(id.validate().is_ok());
        id.key.clear();
        assert!(matches!(id.validate(), Err(AppError::InvalidIdentity(_))));
        id.key = vec![7; MAX_KEY_LEN + 1];
        assert!(matches!(id.validate(), Err(AppError::InvalidIdentity(_))));
    }

    #[test]
    fn json_exposes_only_hex_key() {
        let id = Identity::fingerprint("10.0.0.1", "ua");
        let v = serde_json::to_value(&id).unwrap();
        assert_eq!(v["key"].as_str().unwrap(), id.key_hex());
        assert!(v.get("address").is_none());
        assert!(v.get("user_agent").is_none());
    }
}
