//! Identity provider seam
//!
//! [`IdentityProvider`] is the boundary to the remote service that issues and
//! revokes credentials. [`HttpIdentityProvider`] talks to it over HTTP; tests
//! and embedders can substitute their own implementation.

mod account;
mod http;

pub use account::{
    MIN_CODE_LENGTH, MIN_PASSWORD_LENGTH, PasswordReset, Registration, RegistrationOutcome,
    RegistrationToken, validate_code, validate_email, validate_new_password,
};
pub use http::HttpIdentityProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};
use crate::types::{CredentialPair, Tenant, User};

/// Identifier and secret submitted at login
#[derive(Clone, PartialEq, Eq)]
pub struct LoginRequest {
    /// Username or email
    pub identifier: String,
    /// Password
    pub secret: String,
}

impl LoginRequest {
    /// Create a login request
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }

    /// Reject empty fields before any network call
    ///
    /// # Errors
    /// Returns `Validation` if the identifier or secret is empty
    pub fn validate(&self) -> Result<()> {
        if self.identifier.trim().is_empty() {
            return Err(SessionError::validation("identifier is required"));
        }
        if self.secret.is_empty() {
            return Err(SessionError::validation("secret is required"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Tokens (and optionally account data) returned by login or refresh
///
/// Deserialization accepts camelCase and snake_case names, `token` for the
/// access token and `company` for the tenant. When a body carries several
/// spellings of one field, camelCase wins over snake_case, which wins over
/// the short alias.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireGrant")]
pub struct TokenGrant {
    /// New access token
    pub access_token: Option<String>,

    /// New refresh token, if rotated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Access token lifetime in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    /// Token type, usually `Bearer`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Signed-in user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,

    /// Tenant of the signed-in user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<Tenant>,
}

/// Every spelling providers use, each in its own slot so that a body with
/// more than one never fails as a duplicate field
#[derive(Deserialize)]
struct WireGrant {
    #[serde(default, rename = "accessToken")]
    access_token_camel: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "refreshToken")]
    refresh_token_camel: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default, rename = "expiresIn")]
    expires_in_camel: Option<u64>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default, rename = "tokenType")]
    token_type_camel: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    user: Option<User>,
    #[serde(default)]
    tenant: Option<Tenant>,
    #[serde(default)]
    company: Option<Tenant>,
}

impl From<WireGrant> for TokenGrant {
    fn from(wire: WireGrant) -> Self {
        Self {
            access_token: wire
                .access_token_camel
                .or(wire.access_token)
                .or(wire.token),
            refresh_token: wire.refresh_token_camel.or(wire.refresh_token),
            expires_in: wire.expires_in_camel.or(wire.expires_in),
            token_type: wire.token_type_camel.or(wire.token_type),
            user: wire.user,
            tenant: wire.tenant.or(wire.company),
        }
    }
}

impl TokenGrant {
    /// Grant carrying only an access token
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            ..Self::default()
        }
    }

    /// Set the refresh token
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Set the lifetime in seconds
    #[must_use]
    pub fn with_expires_in(mut self, seconds: u64) -> Self {
        self.expires_in = Some(seconds);
        self
    }

    /// Convert into a credential pair
    ///
    /// # Errors
    /// Returns `InvalidResponse` if no (non-empty) access token was granted
    pub fn credential(&self) -> Result<CredentialPair> {
        let access_token = self
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SessionError::invalid_response("response carried no access token"))?;
        Ok(CredentialPair::new(access_token, self.refresh_token.clone())
            .with_expires_in(self.expires_in))
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .field("user", &self.user)
            .field("tenant", &self.tenant)
            .finish()
    }
}

/// Account data returned by the profile endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// The signed-in user
    pub user: User,
    /// Tenant, when the endpoint reports one
    pub tenant: Option<Tenant>,
}

impl From<User> for Profile {
    fn from(user: User) -> Self {
        Self { user, tenant: None }
    }
}

/// Remote service that issues, refreshes and revokes credentials
///
/// Implementations map HTTP failures with [`SessionError::from_status`] so the
/// session can tell a rejected credential from an unreachable server.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange an identifier and secret for tokens
    async fn login(&self, request: &LoginRequest) -> Result<TokenGrant>;

    /// Exchange a refresh token for a new access token
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant>;

    /// Fetch the account behind an access token
    async fn profile(&self, access_token: &str) -> Result<Profile>;

    /// Revoke the session behind an access token
    async fn logout(&self, access_token: &str) -> Result<()>;

    /// Create an account
    ///
    /// Providers without self-service sign-up keep the default, which
    /// reports the call as unavailable.
    async fn register(&self, registration: &Registration) -> Result<RegistrationOutcome> {
        let _ = registration;
        Err(unsupported("registration"))
    }

    /// Send a password-reset code to `email`
    async fn request_password_reset(&self, email: &str) -> Result<()> {
        let _ = email;
        Err(unsupported("password reset"))
    }

    /// Check a password-reset code without consuming it
    async fn verify_password_reset(&self, email: &str, code: &str) -> Result<()> {
        let _ = (email, code);
        Err(unsupported("password reset"))
    }

    /// Replace the password using a verified code
    async fn reset_password(&self, reset: &PasswordReset) -> Result<()> {
        let _ = reset;
        Err(unsupported("password reset"))
    }
}

fn unsupported(operation: &str) -> SessionError {
    SessionError::unavailable(None, format!("{operation} is not supported by this provider"))
}
