//! Type definitions for session management
//!
//! Identifiers, user/tenant records, the credential pair, and the session
//! snapshot exposed to the application.

pub mod account;
pub mod credential;
pub mod identifiers;
pub mod session;

pub use account::{Tenant, User};
pub use credential::CredentialPair;
pub use identifiers::{TenantId, UserId};
pub use session::{Session, SessionStatus};
