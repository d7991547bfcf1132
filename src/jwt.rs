//! Bearer token claim decoding
//!
//! Extracts the payload of a three-part JWT (`header.payload.signature`) so the
//! session can reason about expiry, subject and scopes locally.
//!
//! # Security
//!
//! **Decoding is not validation.** Nothing in this module verifies the
//! signature, issuer or audience of a token. Claims returned here are
//! informational only: use them to schedule refreshes or to display who is
//! signed in, never to make authorization decisions. Signature verification
//! is the identity provider's responsibility.
//!
//! # Example
//!
//! ```
//! use session_auth::jwt;
//!
//! assert!(jwt::decode("not-a-token").is_none());
//! assert!(jwt::is_expired("not-a-token"));
//! ```

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};

use crate::utils::{from_unix_secs, remaining_until};

/// Clock skew tolerance applied to every expiry check
pub const EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// URL-safe alphabet that accepts payloads with or without `=` padding
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decoded token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (`sub`), usually the user ID
    #[serde(rename = "sub", default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// Issuer (`iss`)
    #[serde(rename = "iss", default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Issued-at, Unix seconds (`iat`)
    #[serde(rename = "iat", default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<i64>,

    /// Expiry, Unix seconds (`exp`)
    #[serde(rename = "exp", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,

    /// Granted scopes (`scope`), as an array or a space-delimited string
    #[serde(
        rename = "scope",
        default,
        deserialize_with = "deserialize_scopes",
        skip_serializing_if = "BTreeSet::is_empty"
    )]
    pub scopes: BTreeSet<String>,

    /// Token type (`type`)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Token ID (`jti`)
    #[serde(rename = "jti", default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,

    /// Any other claims
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScopeClaim {
    List(Vec<String>),
    Delimited(String),
}

fn deserialize_scopes<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let claim: Option<ScopeClaim> = Option::deserialize(deserializer)?;
    Ok(match claim {
        Some(ScopeClaim::List(scopes)) => scopes.into_iter().collect(),
        Some(ScopeClaim::Delimited(scopes)) => {
            scopes.split_whitespace().map(str::to_string).collect()
        }
        None => BTreeSet::new(),
    })
}

impl Claims {
    /// Absolute expiry time, if the token carries an `exp` claim
    #[must_use]
    pub fn expiry(&self) -> Option<SystemTime> {
        self.expires_at.map(from_unix_secs)
    }

    /// Absolute issue time, if the token carries an `iat` claim
    #[must_use]
    pub fn issued(&self) -> Option<SystemTime> {
        self.issued_at.map(from_unix_secs)
    }

    /// Whether the claims are expired at `now`, applying [`EXPIRY_BUFFER`].
    ///
    /// Claims without an expiry are treated as expired.
    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        match self.expiry() {
            Some(expiry) => expired_with_buffer(expiry, now),
            None => true,
        }
    }
}

/// Apply the skew buffer: expired iff `now >= expiry - EXPIRY_BUFFER`.
pub(crate) fn expired_with_buffer(expiry: SystemTime, now: SystemTime) -> bool {
    match expiry.checked_sub(EXPIRY_BUFFER) {
        Some(threshold) => now >= threshold,
        None => true,
    }
}

/// Decode the claims of a token without verifying it.
///
/// Returns `None` unless the token has exactly three `.`-separated segments
/// and the middle one is URL-safe base64 encoding a JSON object.
#[must_use]
pub fn decode(token: &str) -> Option<Claims> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!("Token is not a three-part JWT");
        return None;
    };

    let bytes = match PAYLOAD_ENGINE.decode(payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "Token payload is not valid base64url");
            return None;
        }
    };

    match serde_json::from_slice::<Claims>(&bytes) {
        Ok(claims) => Some(claims),
        Err(e) => {
            tracing::debug!(error = %e, "Token payload is not a JSON claims object");
            None
        }
    }
}

/// Absolute expiry of a token
#[must_use]
pub fn expiry(token: &str) -> Option<SystemTime> {
    decode(token).and_then(|claims| claims.expiry())
}

/// Whether a token is expired now (see [`is_expired_at`])
#[must_use]
pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, SystemTime::now())
}

/// Whether a token is expired at `now`.
///
/// Undecodable tokens and tokens without `exp` count as expired.
#[must_use]
pub fn is_expired_at(token: &str, now: SystemTime) -> bool {
    decode(token).is_none_or(|claims| claims.is_expired_at(now))
}

/// Subject (`sub`) of a token
#[must_use]
pub fn subject(token: &str) -> Option<String> {
    decode(token).and_then(|claims| claims.subject)
}

/// Scopes of a token, empty if absent or undecodable
#[must_use]
pub fn scopes(token: &str) -> BTreeSet<String> {
    decode(token).map(|claims| claims.scopes).unwrap_or_default()
}

/// Token type (`type`) claim
#[must_use]
pub fn token_type(token: &str) -> Option<String> {
    decode(token).and_then(|claims| claims.token_type)
}

/// Time until the token's `exp`, zero if expired or unknown
#[must_use]
pub fn time_until_expiry(token: &str) -> Duration {
    time_until_expiry_at(token, SystemTime::now())
}

/// Time until the token's `exp` measured from `now`, zero-floored
#[must_use]
pub fn time_until_expiry_at(token: &str, now: SystemTime) -> Duration {
    expiry(token)
        .map(|expiry| remaining_until(expiry, now))
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{make_token, make_token_with_exp, unix_now};

    #[test]
    fn test_decode_standard_claims() {
        let token = make_token(&serde_json::json!({
            "sub": "user-42",
            "iss": "https://id.example.com",
            "iat": 1_700_000_000,
            "exp": 1_700_003_600,
            "scope": ["read", "write"],
            "type": "access",
            "jti": "abc",
            "tenant": "acme"
        }));

        let claims = decode(&token).unwrap();
        assert_eq!(claims.subject.as_deref(), Some("user-42"));
        assert_eq!(claims.issued_at, Some(1_700_000_000));
        assert_eq!(claims.expires_at, Some(1_700_003_600));
        assert_eq!(claims.token_type.as_deref(), Some("access"));
        assert!(claims.scopes.contains("read"));
        assert!(claims.scopes.contains("write"));
        assert_eq!(claims.extra["tenant"], "acme");
    }

    #[test]
    fn test_space_delimited_scope() {
        let token = make_token(&serde_json::json!({ "scope": "profile  email" }));
        let scopes = scopes(&token);
        assert_eq!(scopes.len(), 2);
        assert!(scopes.contains("email"));
    }

    #[test]
    fn test_missing_scope_is_empty() {
        let token = make_token(&serde_json::json!({ "sub": "x" }));
        assert!(scopes(&token).is_empty());
        assert!(scopes("garbage").is_empty());
    }

    #[test]
    fn test_decode_rejects_wrong_segment_count() {
        assert!(decode("").is_none());
        assert!(decode("a.b").is_none());
        assert!(decode("a.b.c.d").is_none());

        let token = make_token(&serde_json::json!({ "sub": "x" }));
        assert!(decode(&format!("{token}.extra")).is_none());
    }

    #[test]
    fn test_decode_rejects_bad_payload() {
        // Not base64
        assert!(decode("h.@@@.s").is_none());
        // Valid base64, not JSON
        let not_json = PAYLOAD_ENGINE.encode("hello");
        assert!(decode(&format!("h.{not_json}.s")).is_none());
        // Valid JSON, not an object
        let number = PAYLOAD_ENGINE.encode("42");
        assert!(decode(&format!("h.{number}.s")).is_none());
    }

    #[test]
    fn test_decode_accepts_padded_payload() {
        let padded = base64::engine::general_purpose::URL_SAFE.encode(r#"{"sub":"ab"}"#);
        assert!(padded.ends_with('='));
        let claims = decode(&format!("h.{padded}.s")).unwrap();
        assert_eq!(claims.subject.as_deref(), Some("ab"));
    }

    #[test]
    fn test_expiry_boundary_uses_one_minute_buffer() {
        let exp = 1_800_000_000_i64;
        let token = make_token(&serde_json::json!({ "exp": exp }));
        let expiry = from_unix_secs(exp);

        let just_before = expiry - EXPIRY_BUFFER - Duration::from_millis(1);
        let at_threshold = expiry - EXPIRY_BUFFER;

        assert!(!is_expired_at(&token, just_before));
        assert!(is_expired_at(&token, at_threshold));
        assert!(is_expired_at(&token, expiry));
    }

    #[test]
    fn test_token_without_exp_is_expired() {
        let token = make_token(&serde_json::json!({ "sub": "x" }));
        assert!(is_expired(&token));
        assert_eq!(time_until_expiry(&token), Duration::ZERO);
        assert!(expiry(&token).is_none());
    }

    #[test]
    fn test_short_lived_token_scenario() {
        let now = SystemTime::now();
        let token = make_token_with_exp(unix_now() + 5);

        let remaining = time_until_expiry_at(&token, now);
        assert!(remaining > Duration::ZERO);
        assert!(remaining < Duration::from_millis(5000));

        assert!(is_expired_at(&token, now + Duration::from_secs(6)));
    }

    #[test]
    fn test_long_lived_token_not_expired() {
        let token = make_token_with_exp(unix_now() + 3600);
        assert!(!is_expired(&token));
        assert!(time_until_expiry(&token) > Duration::from_secs(3500));
    }

    #[test]
    fn test_subject_and_type_helpers() {
        let token = make_token(&serde_json::json!({ "sub": "u1", "type": "refresh" }));
        assert_eq!(subject(&token).as_deref(), Some("u1"));
        assert_eq!(token_type(&token).as_deref(), Some("refresh"));
        assert_eq!(subject("bad"), None);
    }
}
