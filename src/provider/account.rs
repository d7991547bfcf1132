//! Self-service account requests: sign-up and password reset
//!
//! Every request type validates locally so malformed input fails with
//! [`SessionError::Validation`] before the provider is contacted.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SessionError};

/// Minimum length of a new password
pub const MIN_PASSWORD_LENGTH: usize = 6;
/// Minimum length of a one-time code
pub const MIN_CODE_LENGTH: usize = 4;

const PASSWORD_FIELD: &str = "password";
const CONFIRM_PASSWORD_FIELD: &str = "confirmPassword";
const EMAIL_FIELD: &str = "email";

/// Sign-up submission
///
/// `fields` holds the tenant-specific form data (name, email, password, ...)
/// and is sent flattened next to `companyId`.
#[derive(Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    /// Tenant the account is created under
    pub company_id: String,
    /// Form fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    /// Self-registration tags
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// One-time code confirming the contact address
    pub otp: Option<String>,
}

impl Registration {
    /// Start a registration under `company_id`
    pub fn new(company_id: impl Into<String>) -> Self {
        Self {
            company_id: company_id.into(),
            fields: Map::new(),
            tags: Vec::new(),
            otp: None,
        }
    }

    /// Set a form field
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Set the tags
    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Attach the one-time code
    #[must_use]
    pub fn otp(mut self, code: impl Into<String>) -> Self {
        self.otp = Some(code.into());
        self
    }

    /// Check the submission before it is sent.
    ///
    /// The company id is required. An `email` field must look like an
    /// address, a `password` field must satisfy the password policy, and a
    /// `confirmPassword` field must match it. A code, when attached, must
    /// have at least four characters.
    ///
    /// # Errors
    /// Returns `Validation` describing the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.company_id.trim().is_empty() {
            return Err(SessionError::validation("company id is required"));
        }

        if let Some(email) = self.fields.get(EMAIL_FIELD) {
            validate_email(email.as_str().unwrap_or_default())?;
        }

        if let Some(password) = self.fields.get(PASSWORD_FIELD) {
            let password = password.as_str().unwrap_or_default();
            validate_new_password(password)?;
            let confirmed = self
                .fields
                .get(CONFIRM_PASSWORD_FIELD)
                .is_none_or(|confirm| confirm.as_str() == Some(password));
            if !confirmed {
                return Err(SessionError::validation("passwords do not match"));
            }
        }

        if let Some(code) = &self.otp {
            validate_code(code)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("company_id", &self.company_id)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("tags", &self.tags)
            .field("otp", &self.otp.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// What the provider did with a registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Account created; the user signs in normally
    Member,
    /// Account created and a sign-in token issued
    Token(RegistrationToken),
    /// Membership requires payment at `link`
    Checkout {
        /// Checkout URL
        link: String,
    },
}

/// Sign-in material issued with a registration
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationToken {
    /// Token authorizing the first sign-in
    pub auth_token: String,
    /// Account number assigned by the provider
    #[serde(default)]
    pub no_id: Option<String>,
    /// Code paired with the token
    #[serde(default)]
    pub security_code: Option<String>,
}

impl std::fmt::Debug for RegistrationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationToken")
            .field("auth_token", &"<redacted>")
            .field("no_id", &self.no_id)
            .field("security_code", &self.security_code.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireRegistration {
    response_type: String,
    #[serde(default)]
    auth_data: Option<RegistrationToken>,
    #[serde(default)]
    link: Option<String>,
}

impl TryFrom<WireRegistration> for RegistrationOutcome {
    type Error = SessionError;

    fn try_from(wire: WireRegistration) -> Result<Self> {
        match wire.response_type.as_str() {
            "member" => Ok(Self::Member),
            "token" => wire
                .auth_data
                .map(Self::Token)
                .ok_or_else(|| SessionError::invalid_response("token registration without authData")),
            "paid_membership_checkout" => {
                let link = wire
                    .link
                    .filter(|l| !l.trim().is_empty())
                    .ok_or_else(|| SessionError::invalid_response("checkout without link"))?;
                Ok(Self::Checkout {
                    link: with_https(&link),
                })
            }
            other => Err(SessionError::invalid_response(format!(
                "unknown registration response type {other:?}"
            ))),
        }
    }
}

/// Checkout links may arrive without a scheme
fn with_https(link: &str) -> String {
    if link.starts_with("http://") || link.starts_with("https://") {
        link.to_string()
    } else {
        format!("https://{link}")
    }
}

/// Final step of a password reset
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordReset {
    /// Account email
    pub email: String,
    /// One-time code sent to the email
    #[serde(rename = "otp")]
    pub code: String,
    /// Replacement password
    pub new_password: String,
}

impl PasswordReset {
    /// Create a reset request
    pub fn new(
        email: impl Into<String>,
        code: impl Into<String>,
        new_password: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            code: code.into(),
            new_password: new_password.into(),
        }
    }

    /// Check email, code and password policy
    ///
    /// # Errors
    /// Returns `Validation` describing the first problem found
    pub fn validate(&self) -> Result<()> {
        validate_email(&self.email)?;
        validate_code(&self.code)?;
        validate_new_password(&self.new_password)
    }
}

impl std::fmt::Debug for PasswordReset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordReset")
            .field("email", &self.email)
            .field("code", &"<redacted>")
            .field("new_password", &"<redacted>")
            .finish()
    }
}

/// Require something shaped like `local@domain.tld`
///
/// # Errors
/// Returns `Validation` for an empty or malformed address
pub fn validate_email(email: &str) -> Result<()> {
    let email = email.trim();
    if email.is_empty() {
        return Err(SessionError::validation("email is required"));
    }

    let valid = email.split_once('@').is_some_and(|(local, domain)| {
        let labels: Vec<&str> = domain.split('.').collect();
        !local.is_empty()
            && local.chars().all(|c| is_word_char(c) || c == '.')
            && labels.len() >= 2
            && labels
                .iter()
                .all(|l| !l.is_empty() && l.chars().all(is_word_char))
            && labels.last().is_some_and(|tld| tld.len() >= 2)
    });
    if valid {
        Ok(())
    } else {
        Err(SessionError::validation(format!("invalid email address: {email}")))
    }
}

/// Require a one-time code of at least [`MIN_CODE_LENGTH`] characters
///
/// # Errors
/// Returns `Validation` for a missing or short code
pub fn validate_code(code: &str) -> Result<()> {
    let code = code.trim();
    if code.is_empty() {
        return Err(SessionError::validation("verification code is required"));
    }
    if code.chars().count() < MIN_CODE_LENGTH {
        return Err(SessionError::validation(format!(
            "verification code must have at least {MIN_CODE_LENGTH} characters"
        )));
    }
    Ok(())
}

/// Password policy: at least [`MIN_PASSWORD_LENGTH`] characters with a
/// lowercase letter, an uppercase letter, a digit and a symbol
///
/// # Errors
/// Returns `Validation` when the password is empty or too weak
pub fn validate_new_password(password: &str) -> Result<()> {
    if password.trim().is_empty() {
        return Err(SessionError::validation("password is required"));
    }

    let strong = password.chars().count() >= MIN_PASSWORD_LENGTH
        && password.chars().any(|c| c.is_lowercase())
        && password.chars().any(|c| c.is_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| c.is_ascii_punctuation());
    if strong {
        Ok(())
    } else {
        Err(SessionError::validation(format!(
            "password must have at least {MIN_PASSWORD_LENGTH} characters and mix upper and lower case letters, digits and symbols"
        )))
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_email_validation() {
        assert!(validate_email("alice@example.com").is_ok());
        assert!(validate_email("a.b-c@mail.example.co").is_ok());

        for bad in ["", "  ", "alice", "alice@", "@example.com", "alice@example", "a@b.c"] {
            assert!(
                matches!(validate_email(bad), Err(SessionError::Validation(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn test_code_validation() {
        assert!(validate_code("1234").is_ok());
        assert!(validate_code(" 123 ").is_err());
        assert!(validate_code("").is_err());
    }

    #[test]
    fn test_password_policy() {
        assert!(validate_new_password("Secr3t!").is_ok());

        assert!(validate_new_password("").is_err());
        assert!(validate_new_password("S3t!").is_err());
        assert!(validate_new_password("secr3t!").is_err());
        assert!(validate_new_password("SECR3T!").is_err());
        assert!(validate_new_password("Secret!").is_err());
        assert!(validate_new_password("Secr3ts").is_err());
    }

    #[test]
    fn test_registration_validation() {
        let valid = Registration::new("acme")
            .field("email", "alice@example.com")
            .field("password", "Secr3t!")
            .field("confirmPassword", "Secr3t!")
            .otp("123456");
        assert!(valid.validate().is_ok());

        assert!(Registration::new(" ").validate().is_err());
        assert!(
            valid
                .clone()
                .field("confirmPassword", "Other1!")
                .validate()
                .is_err()
        );
        assert!(valid.clone().field("email", "nope").validate().is_err());
        assert!(valid.clone().otp("12").validate().is_err());
    }

    #[test]
    fn test_registration_body() {
        let registration = Registration::new("acme")
            .field("name", "Alice")
            .tags(["retail"])
            .otp("123456");

        let body = serde_json::to_value(&registration).unwrap();
        assert_eq!(
            body,
            json!({
                "companyId": "acme",
                "name": "Alice",
                "tags": ["retail"],
                "otp": "123456"
            })
        );

        let rendered = format!("{registration:?}");
        assert!(rendered.contains("name"));
        assert!(!rendered.contains("123456"));
    }

    #[test]
    fn test_registration_outcomes() {
        let parse = |value: Value| -> Result<RegistrationOutcome> {
            serde_json::from_value::<WireRegistration>(value)
                .map_err(|e| SessionError::invalid_response(e.to_string()))?
                .try_into()
        };

        assert_eq!(
            parse(json!({ "responseType": "member" })).unwrap(),
            RegistrationOutcome::Member
        );

        let RegistrationOutcome::Token(token) = parse(json!({
            "responseType": "token",
            "authData": { "authToken": "t", "noId": "N1", "securityCode": "s" }
        }))
        .unwrap() else {
            panic!("expected token outcome");
        };
        assert_eq!(token.auth_token, "t");
        assert_eq!(token.no_id.as_deref(), Some("N1"));

        assert_eq!(
            parse(json!({ "responseType": "paid_membership_checkout", "link": "pay.example.com/x" }))
                .unwrap(),
            RegistrationOutcome::Checkout {
                link: "https://pay.example.com/x".to_string()
            }
        );

        assert!(parse(json!({ "responseType": "token" })).is_err());
        assert!(parse(json!({ "responseType": "paid_membership_checkout" })).is_err());
        assert!(parse(json!({ "responseType": "mystery" })).is_err());
    }

    #[test]
    fn test_password_reset_body_and_debug() {
        let reset = PasswordReset::new("alice@example.com", "1234", "N3w!pass");
        assert!(reset.validate().is_ok());

        let body = serde_json::to_value(&reset).unwrap();
        assert_eq!(
            body,
            json!({ "email": "alice@example.com", "otp": "1234", "newPassword": "N3w!pass" })
        );

        let rendered = format!("{reset:?}");
        assert!(!rendered.contains("N3w!pass"));
        assert!(!rendered.contains("1234"));
    }
}
