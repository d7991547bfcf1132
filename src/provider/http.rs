//! HTTP identity provider

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

use super::account::{WireRegistration, validate_code, validate_email};
use super::{
    IdentityProvider, LoginRequest, PasswordReset, Profile, Registration, RegistrationOutcome,
    TokenGrant,
};
use crate::config::ProviderConfig;
use crate::error::{Result, SessionError};
use crate::types::{Tenant, User};
use crate::utils::truncate_body;

/// Header carrying the sign-up verification code
const OTP_HEADER: &str = "Otp-Security-Code";

/// Field names checked, in order, for a human-readable error message
const ERROR_MESSAGE_FIELDS: [&str; 3] = ["message", "error_description", "error"];

/// [`IdentityProvider`] backed by a JSON HTTP API
///
/// Endpoints and timeout come from [`ProviderConfig`]. Responses may be bare
/// objects or wrapped in a `{"data": {...}}` envelope.
#[derive(Debug, Clone)]
pub struct HttpIdentityProvider {
    config: ProviderConfig,
    http_client: reqwest::Client,
}

impl HttpIdentityProvider {
    /// Create a provider with its own HTTP client
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the configuration is invalid or the client
    /// cannot be built
    pub fn new(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SessionError::invalid_config(format!("HTTP client: {e}")))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    /// Create a provider sharing an existing HTTP client
    #[must_use]
    pub fn with_client(config: ProviderConfig, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
        }
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn login(&self, request: &LoginRequest) -> Result<TokenGrant> {
        request.validate()?;
        let url = self.config.url(&self.config.login_path);
        tracing::debug!(%url, identifier = %request.identifier, "Logging in");

        let body = serde_json::json!({ "nonce": generate_nonce(self.config.nonce_length) });
        let response = self
            .http_client
            .post(&url)
            .basic_auth(&request.identifier, Some(&request.secret))
            .json(&body)
            .send()
            .await?;

        read_payload(response).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        let url = self.config.url(&self.config.refresh_path);
        tracing::debug!(%url, "Refreshing access token");

        let body = serde_json::json!({ "refreshToken": refresh_token });
        let response = self.http_client.post(&url).json(&body).send().await?;

        read_payload(response).await
    }

    async fn profile(&self, access_token: &str) -> Result<Profile> {
        let url = self.config.url(&self.config.profile_path);
        tracing::debug!(%url, "Fetching profile");

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let value: Value = read_payload(response).await?;
        parse_profile(value)
    }

    async fn logout(&self, access_token: &str) -> Result<()> {
        let url = self.config.url(&self.config.logout_path);
        tracing::debug!(%url, "Logging out");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(access_token)
            .send()
            .await?;

        expect_success(response).await
    }

    async fn register(&self, registration: &Registration) -> Result<RegistrationOutcome> {
        registration.validate()?;
        let url = self.config.url(&self.config.register_path);
        tracing::debug!(%url, company_id = %registration.company_id, "Registering account");

        let mut request = self.http_client.post(&url).json(registration);
        if let Some(code) = &registration.otp {
            request = request.header(OTP_HEADER, code.as_str());
        }
        let response = request.send().await?;

        let wire: WireRegistration = read_payload(response).await?;
        wire.try_into()
    }

    async fn request_password_reset(&self, email: &str) -> Result<()> {
        validate_email(email)?;
        let url = self.config.url(&self.config.reset_request_path);
        tracing::debug!(%url, "Requesting password reset code");

        let body = serde_json::json!({ "email": email.trim() });
        let response = self.http_client.post(&url).json(&body).send().await?;

        expect_success(response).await
    }

    async fn verify_password_reset(&self, email: &str, code: &str) -> Result<()> {
        validate_email(email)?;
        validate_code(code)?;
        let url = self.config.url(&self.config.reset_verify_path);
        tracing::debug!(%url, "Verifying password reset code");

        let body = serde_json::json!({ "email": email.trim(), "otp": code.trim() });
        let response = self.http_client.post(&url).json(&body).send().await?;

        expect_success(response).await
    }

    async fn reset_password(&self, reset: &PasswordReset) -> Result<()> {
        reset.validate()?;
        let url = self.config.url(&self.config.reset_path);
        tracing::debug!(%url, "Resetting password");

        let response = self.http_client.post(&url).json(reset).send().await?;

        expect_success(response).await
    }
}

/// Check the status of a call whose body is ignored
async fn expect_success(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

/// Check the status and decode the (possibly enveloped) JSON body
async fn read_payload<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(status_error(status, &body));
    }

    parse_payload(&body)
}

fn status_error(status: reqwest::StatusCode, body: &str) -> SessionError {
    let message = extract_error_message(body)
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| "request failed".to_string());
    tracing::debug!(status = status.as_u16(), "Identity provider returned an error");
    SessionError::from_status(status.as_u16(), truncate_body(&message))
}

/// Decode a success body, unwrapping a `{"data": {...}}` envelope
pub(crate) fn parse_payload<T: DeserializeOwned>(body: &str) -> Result<T> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| SessionError::invalid_response(format!("malformed JSON: {e}")))?;
    serde_json::from_value(unwrap_envelope(value))
        .map_err(|e| SessionError::invalid_response(format!("unexpected payload: {e}")))
}

fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.get("data").is_some_and(Value::is_object) => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// A profile body is either a bare user or `{"user": {...}, "tenant": {...}}`
fn parse_profile(value: Value) -> Result<Profile> {
    let Value::Object(mut map) = value else {
        return Err(SessionError::invalid_response("profile is not a JSON object"));
    };

    let Some(user) = map.remove("user").filter(Value::is_object) else {
        let user: User = serde_json::from_value(Value::Object(map))
            .map_err(|e| SessionError::invalid_response(format!("unexpected profile: {e}")))?;
        return Ok(user.into());
    };

    let user: User = serde_json::from_value(user)
        .map_err(|e| SessionError::invalid_response(format!("unexpected profile: {e}")))?;
    let tenant = map
        .remove("tenant")
        .or_else(|| map.remove("company"))
        .filter(Value::is_object)
        .map(serde_json::from_value::<Tenant>)
        .transpose()
        .map_err(|e| SessionError::invalid_response(format!("unexpected tenant: {e}")))?;

    Ok(Profile { user, tenant })
}

/// Pull a message out of an error body, falling back to the raw text
fn extract_error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return Some(trimmed.to_string());
    };

    let candidates = [Some(&value), value.get("data")];
    candidates
        .into_iter()
        .flatten()
        .flat_map(|v| ERROR_MESSAGE_FIELDS.iter().filter_map(move |f| v.get(*f)))
        .find_map(|v| v.as_str().map(str::to_string))
        .or_else(|| Some(trimmed.to_string()))
}

/// Generate a URL-safe nonce of `length` characters from hashed entropy
fn generate_nonce(length: usize) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let pid = std::process::id();
    let thread_id = std::thread::current().id();

    let mut nonce = String::with_capacity(length + 43);
    let mut block = 0u64;
    while nonce.len() < length {
        let mut hasher = Sha256::new();
        hasher.update(timestamp.to_le_bytes());
        hasher.update(pid.to_le_bytes());
        hasher.update(format!("{thread_id:?}").as_bytes());
        hasher.update(COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
        hasher.update(block.to_le_bytes());
        nonce.push_str(&URL_SAFE_NO_PAD.encode(hasher.finalize()));
        block += 1;
    }
    nonce.truncate(length);
    nonce
}
