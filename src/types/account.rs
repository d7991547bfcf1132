//! Signed-in user and tenant records

use serde::{Deserialize, Serialize};

use super::identifiers::{TenantId, UserId};
use crate::jwt::Claims;

/// The signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User ID
    pub id: UserId,
    /// Login name
    #[serde(default)]
    pub username: String,
    /// Email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Role name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Granted permissions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

/// Placeholder ID for tokens that carry no subject
const UNKNOWN_USER_ID: &str = "unknown";

impl User {
    /// Build a user from locally decoded token claims.
    ///
    /// Used when the profile endpoint cannot be reached; the result is only as
    /// trustworthy as the unverified token it came from.
    #[must_use]
    pub fn from_claims(claims: Option<&Claims>, username: Option<&str>) -> Self {
        let id = claims
            .and_then(|c| c.subject.clone())
            .unwrap_or_else(|| UNKNOWN_USER_ID.to_string());
        let permissions = claims
            .map(|c| c.scopes.iter().cloned().collect())
            .unwrap_or_default();
        let claim_str = |key: &str| {
            claims
                .and_then(|c| c.extra.get(key))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        Self {
            username: username
                .map(str::to_string)
                .or_else(|| claim_str("preferred_username"))
                .unwrap_or_else(|| id.clone()),
            id: UserId::new(id),
            email: claim_str("email"),
            name: claim_str("name"),
            role: claim_str("role"),
            permissions,
        }
    }
}

/// The tenant (company) the user belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    /// Tenant ID
    pub id: TenantId,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Business segment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt;
    use crate::test_support::make_token;

    #[test]
    fn test_user_from_claims() {
        let token = make_token(&serde_json::json!({
            "sub": "42",
            "email": "a@example.com",
            "scope": ["read"]
        }));
        let claims = jwt::decode(&token);
        let user = User::from_claims(claims.as_ref(), Some("alice"));

        assert_eq!(user.id.as_str(), "42");
        assert_eq!(user.username, "alice");
        assert_eq!(user.email.as_deref(), Some("a@example.com"));
        assert_eq!(user.permissions, vec!["read".to_string()]);
    }

    #[test]
    fn test_user_from_missing_claims() {
        let user = User::from_claims(None, None);
        assert_eq!(user.id.as_str(), UNKNOWN_USER_ID);
        assert_eq!(user.username, UNKNOWN_USER_ID);
    }

    #[test]
    fn test_tenant_accepts_camel_case() {
        let tenant: Tenant =
            serde_json::from_str(r#"{"id": 7, "name": "Acme", "segmentId": "retail"}"#).unwrap();
        assert_eq!(tenant.id.as_str(), "7");
        assert_eq!(tenant.segment_id.as_deref(), Some("retail"));
    }
}
