//! In-memory session snapshot

use super::account::{Tenant, User};
use super::credential::CredentialPair;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionStatus {
    /// No session
    #[default]
    Unauthenticated,
    /// Login or restore in progress
    Authenticating,
    /// Session alive
    Authenticated,
    /// Access token being exchanged
    Refreshing,
    /// The credential store could not be read
    Failed,
}

impl SessionStatus {
    /// Whether an operation is in flight
    #[must_use]
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Authenticating | Self::Refreshing)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Refreshing => "refreshing",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Snapshot of the session owned by [`SessionManager`](crate::SessionManager)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Lifecycle state
    pub status: SessionStatus,
    /// Signed-in user
    pub user: Option<User>,
    /// Tenant of the signed-in user
    pub tenant: Option<Tenant>,
    /// Current credentials
    pub credential: Option<CredentialPair>,
    /// Last user-visible error
    pub last_error: Option<String>,
}

impl Session {
    /// Whether a session is alive (including while a refresh is running)
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Authenticated | SessionStatus::Refreshing
        )
    }
}
