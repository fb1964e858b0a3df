use std::sync::Arc;

use tracing::debug;

use feedback_protocol::paths::session_path;

use crate::token::TokenStore;

/// Externally visible address of the service, used to build session URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicAddress {
    pub host: String,
    pub port: u16,
    pub use_https: bool,
}

impl PublicAddress {
    pub fn scheme(&self) -> &'static str {
        if self.use_https { "https" } else { "http" }
    }

    fn is_default_port(&self) -> bool {
        (self.use_https && self.port == 443) || (!self.use_https && self.port == 80)
    }

    /// `scheme://host[:port]`, without the port when it is the scheme's default.
    pub fn base_url(&self) -> String {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        if self.is_default_port() {
            format!("{}://{host}", self.scheme())
        } else {
            format!("{}://{host}:{}", self.scheme(), self.port)
        }
    }
}

impl Default for PublicAddress {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8766,
            use_https: false,
        }
    }
}

/// Turns session ids into token-carrying URLs and checks presented tokens.
pub struct UrlBinder {
    address: PublicAddress,
    tokens: Arc<TokenStore>,
}

impl UrlBinder {
    pub fn new(address: PublicAddress, tokens: Arc<TokenStore>) -> Self {
        Self { address, tokens }
    }

    pub fn address(&self) -> &PublicAddress {
        &self.address
    }

    pub fn base_url(&self) -> String {
        self.address.base_url()
    }

    /// Issue a fresh token for `session_id` (revoking any earlier one) and
    /// return the session's URL.
    pub fn bind(&self, session_id: &str) -> String {
        let token = self.tokens.issue(session_id);
        debug!(session_id = %session_id, "bound session url");
        format!(
            "{}{}?token={}",
            self.base_url(),
            session_path(session_id),
            token.as_str()
        )
    }

    pub fn authorize(&self, session_id: &str, presented: Option<&str>) -> bool {
        self.tokens.check(session_id, presented)
    }

    pub fn revoke(&self, session_id: &str) -> bool {
        self.tokens.revoke(session_id)
    }

    /// Absolute URL of an API endpoint on this service.
    pub fn api_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{endpoint}", self.base_url())
        } else {
            format!("{}/{endpoint}", self.base_url())
        }
    }

    pub fn active_tokens(&self) -> usize {
        self.tokens.len()
    }
}
