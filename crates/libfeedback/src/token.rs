use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

use feedback_protocol::SessionId;

use crate::session::SessionObserver;

/// Hex characters kept from the digest (128 bits).
pub const TOKEN_LENGTH: usize = 32;
const TOKEN_NONCE_BYTES: usize = 16;

/// Bearer credential for a session's human-facing URL.
///
/// **SECURITY**: `Debug` is redacted so tokens never end up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Derive a fresh token for `session_id`: SHA-256 over the id and 16 bytes
/// from the OS RNG, hex-encoded and truncated. Never deterministic.
pub fn generate_token(session_id: &str) -> AccessToken {
    let mut nonce = [0u8; TOKEN_NONCE_BYTES];
    OsRng.fill_bytes(&mut nonce);

    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(b":");
    hasher.update(nonce);
    let mut token = hex::encode(hasher.finalize());
    token.truncate(TOKEN_LENGTH);
    AccessToken(token)
}

/// Constant-time comparison of an expected and a presented token.
pub fn verify(expected: &str, presented: &str) -> bool {
    bool::from(expected.as_bytes().ct_eq(presented.as_bytes()))
}

/// Holds the single live token of each session.
///
/// Issuing replaces whatever token the session had. A session with no token
/// on record is only accessible when `require_token` is off.
pub struct TokenStore {
    tokens: Mutex<HashMap<SessionId, AccessToken>>,
    require_token: bool,
}

impl TokenStore {
    pub fn new(require_token: bool) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            require_token,
        }
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<SessionId, AccessToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn require_token(&self) -> bool {
        self.require_token
    }

    pub fn issue(&self, session_id: &str) -> AccessToken {
        let token = generate_token(session_id);
        let replaced = self
            .tokens()
            .insert(session_id.to_string(), token.clone())
            .is_some();
        debug!(session_id = %session_id, replaced, "issued session token");
        token
    }

    /// Check a presented token against the one on record for `session_id`.
    pub fn check(&self, session_id: &str, presented: Option<&str>) -> bool {
        let tokens = self.tokens();
        let Some(expected) = tokens.get(session_id) else {
            if !self.require_token {
                debug!(session_id = %session_id, "no token on record, allowing unauthenticated access");
            }
            return !self.require_token;
        };
        let granted = presented.is_some_and(|presented| verify(expected.as_str(), presented));
        debug!(session_id = %session_id, granted, "token check");
        granted
    }

    pub fn revoke(&self, session_id: &str) -> bool {
        let revoked = self.tokens().remove(session_id).is_some();
        if revoked {
            debug!(session_id = %session_id, "revoked session token");
        }
        revoked
    }

    pub fn len(&self) -> usize {
        self.tokens().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionObserver for TokenStore {
    fn sessions_removed(&self, session_ids: &[SessionId]) {
        let mut tokens = self.tokens();
        for id in session_ids {
            tokens.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_shape() {
        let token = generate_token("session_abc");
        assert_eq!(token.as_str().len(), TOKEN_LENGTH);
        assert!(token.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_are_fresh_per_call() {
        let a = generate_token("session_abc");
        let b = generate_token("session_abc");
        assert_ne!(a, b);
    }

    #[test]
    fn debug_is_redacted() {
        let token = generate_token("session_abc");
        let rendered = format!("{token:?}");
        assert!(!rendered.contains(token.as_str()));
    }

    #[test]
    fn verify_compares_exactly() {
        assert!(verify("abcd", "abcd"));
        assert!(!verify("abcd", "abce"));
        assert!(!verify("abcd", "abc"));
        assert!(!verify("abcd", ""));
    }

    #[test]
    fn reissue_invalidates_previous() {
        let store = TokenStore::new(true);
        let first = store.issue("s1");
        let second = store.issue("s1");

        assert!(!store.check("s1", Some(first.as_str())));
        assert!(store.check("s1", Some(second.as_str())));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn missing_token_presented() {
        let store = TokenStore::new(true);
        store.issue("s1");
        assert!(!store.check("s1", None));
    }

    #[test]
    fn unknown_session_follows_policy() {
        let strict = TokenStore::new(true);
        assert!(!strict.check("s1", None));
        assert!(!strict.check("s1", Some("anything")));

        let open = TokenStore::new(false);
        assert!(open.check("s1", None));
    }

    #[test]
    fn revoke_falls_back_to_policy() {
        let store = TokenStore::new(false);
        let token = store.issue("s1");
        assert!(!store.check("s1", Some("wrong")));

        assert!(store.revoke("s1"));
        assert!(!store.revoke("s1"));
        assert!(store.check("s1", Some("wrong")));
        assert!(store.check("s1", Some(token.as_str())));
    }

    #[test]
    fn tokens_are_bound_to_their_session() {
        let store = TokenStore::new(true);
        let a = store.issue("s1");
        store.issue("s2");
        assert!(!store.check("s2", Some(a.as_str())));
    }

    #[test]
    fn removed_sessions_lose_tokens() {
        let store = TokenStore::new(true);
        store.issue("s1");
        store.issue("s2");
        store.sessions_removed(&["s1".to_string()]);
        assert_eq!(store.len(), 1);
        assert!(!store.check("s1", None));
    }
}
