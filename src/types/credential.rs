//! Access/refresh token pair

use std::time::{Duration, SystemTime};

use crate::jwt;

/// Access token, optional refresh token, and expiry
///
/// `Debug` output redacts both tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialPair {
    /// Bearer token sent with each request
    pub access_token: String,
    /// Long-lived token exchanged for new access tokens
    pub refresh_token: Option<String>,
    /// When the access token expires, if known
    pub expires_at: Option<SystemTime>,
}

impl CredentialPair {
    /// Create a pair with no explicit expiry
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at: None,
        }
    }

    /// Set the expiry from a provider's `expires_in` (seconds from now)
    #[must_use]
    pub fn with_expires_in(mut self, expires_in: Option<u64>) -> Self {
        self.expires_at = expires_in.map(|secs| SystemTime::now() + Duration::from_secs(secs));
        self
    }

    /// Effective expiry: the token's own `exp` claim wins over `expires_at`
    #[must_use]
    pub fn effective_expiry(&self) -> Option<SystemTime> {
        jwt::expiry(&self.access_token).or(self.expires_at)
    }

    /// Get the Authorization header value
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
