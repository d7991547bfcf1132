//! Error types for session management

use thiserror::Error;

/// Main error type for session operations
///
/// Every variant carries owned strings so the error can be cloned and shared
/// between callers waiting on the same refresh attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Input rejected before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    /// The identity provider explicitly rejected the credential
    #[error("Credential rejected by identity provider{}: {message}", status_suffix(.status))]
    AuthRejected {
        /// HTTP status, if the rejection came from a response
        status: Option<u16>,
        /// Provider message
        message: String,
    },

    /// Network failure, timeout, or endpoint not implemented
    #[error("Identity provider unavailable{}: {message}", status_suffix(.status))]
    Unavailable {
        /// HTTP status, if a response was received
        status: Option<u16>,
        /// Error detail
        message: String,
    },

    /// The provider refused the request for a non-credential reason
    #[error("Request rejected by identity provider{}: {message}", status_suffix(.status))]
    Rejected {
        /// HTTP status
        status: Option<u16>,
        /// Provider message
        message: String,
    },

    /// No refresh token is stored
    #[error("No refresh token available")]
    NoRefreshToken,

    /// Credentials were replaced or cleared while a refresh was running;
    /// its result was discarded
    #[error("Credentials changed during refresh")]
    Superseded,

    /// The provider returned a body that could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Credential storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

/// Coarse classification used to decide whether credentials are cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed input
    Validation,
    /// Server-confirmed invalid credential; clears local credentials
    AuthRejected,
    /// Anything the server did not authoritatively decide; never clears credentials
    NetworkOrUnimplemented,
    /// Local failure (storage, configuration, missing refresh token)
    Local,
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Messages that mark a provider error as a credential rejection
const AUTH_REJECTION_MARKERS: [&str; 2] = ["unauthorized", "not authenticated"];

impl SessionError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an auth rejection
    pub fn auth_rejected(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::AuthRejected {
            status,
            message: msg.into(),
        }
    }

    /// Create an unavailable error
    pub fn unavailable(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::Unavailable {
            status,
            message: msg.into(),
        }
    }

    /// Create an invalid response error
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Map a non-success HTTP status and provider message to an error.
    ///
    /// 401/403, or any message mentioning "unauthorized" / "not authenticated",
    /// is a credential rejection. 404, 408, 429, 501 and 5xx are treated as the
    /// endpoint being unavailable. Other 4xx are plain rejections.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if matches!(status, 401 | 403) || mentions_auth_rejection(&message) {
            return Self::AuthRejected {
                status: Some(status),
                message,
            };
        }
        match status {
            404 | 408 | 429 | 500..=599 => Self::Unavailable {
                status: Some(status),
                message,
            },
            _ => Self::Rejected {
                status: Some(status),
                message,
            },
        }
    }

    /// Classify this error
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) => ErrorClass::Validation,
            Self::AuthRejected { .. } => ErrorClass::AuthRejected,
            Self::Unavailable { .. } | Self::Rejected { .. } | Self::InvalidResponse(_) => {
                ErrorClass::NetworkOrUnimplemented
            }
            Self::NoRefreshToken
            | Self::Superseded
            | Self::Storage(_)
            | Self::InvalidConfig(_) => ErrorClass::Local,
        }
    }

    /// Whether the provider confirmed the credential is invalid
    #[must_use]
    pub fn is_auth_rejected(&self) -> bool {
        self.class() == ErrorClass::AuthRejected
    }

    /// HTTP status attached to this error, if any
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::AuthRejected { status, .. }
            | Self::Unavailable { status, .. }
            | Self::Rejected { status, .. } => *status,
            _ => None,
        }
    }
}

fn mentions_auth_rejection(message: &str) -> bool {
    let lower = message.to_lowercase();
    AUTH_REJECTION_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        if let Some(code) = status {
            return Self::from_status(code, err.to_string());
        }
        if err.is_decode() {
            return Self::InvalidResponse(err.to_string());
        }
        if err.is_builder() {
            return Self::InvalidConfig(err.to_string());
        }
        // Timeouts, connect failures and body errors never count as rejections
        Self::Unavailable {
            status: None,
            message: err.to_string(),
        }
    }
}
