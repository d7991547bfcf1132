//! # session-auth
//!
//! Authenticated session lifecycle for Rust API clients.
//! Credential storage, token claims, refresh coordination, tokio-based.
//!
//! ## Quick Start
//!
//! Restore a stored session at startup, or log in:
//!
//! ```no_run
//! use session_auth::store::{CredentialStore, FileStore};
//! use session_auth::{ProviderConfig, SessionConfig, SessionManager, SessionStatus};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::builder()
//!         .provider(
//!             ProviderConfig::builder()
//!                 .base_url("https://id.example.com/api")
//!                 .build(),
//!         )
//!         .build();
//!     let store = Arc::new(CredentialStore::new(
//!         FileStore::named("tokens"),
//!         FileStore::named("settings"),
//!     ));
//!     let session = SessionManager::from_config(&config, store)?;
//!
//!     match session.restore_on_launch().await {
//!         SessionStatus::Authenticated => println!("Welcome back"),
//!         _ => session.login("alice@example.com", "correct horse").await?,
//!     }
//!
//!     let client = session.authorized_client(reqwest::Client::new())
//!         .with_base_url("https://api.example.com");
//!     let response = client.send(client.get("/orders")).await?;
//!     println!("{}", response.status());
//!
//!     session.logout().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Components
//!
//! - [`store`]: Credential persistence over pluggable [`SecretStore`] backends,
//!   with transparent migration of legacy plaintext entries
//! - [`jwt`]: Claim decoding (expiry, subject, scopes) without verification
//! - [`session`]: The [`SessionManager`] state machine
//! - [`refresh`]: Single-flight token refresh via [`RefreshCoordinator`]
//! - [`interceptor`]: [`AuthorizedClient`], a `reqwest` wrapper that injects the
//!   bearer token and retries once after a 401
//! - [`scheduler`]: [`RefreshScheduler`], proactive refresh before expiry
//! - [`provider`]: The [`IdentityProvider`] seam and its HTTP implementation,
//!   including sign-up and password reset requests
//! - [`config`]: Typed builders and environment loading
//! - [`error`]: Error types and classification
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, SessionError>`](Result). Only an
//! explicit rejection from the identity provider clears stored credentials:
//!
//! ```no_run
//! # use session_auth::{ErrorClass, SessionManager};
//! # async fn example(session: &SessionManager) {
//! if let Err(e) = session.login("alice", "wrong").await {
//!     match e.class() {
//!         ErrorClass::Validation => eprintln!("Check your input: {e}"),
//!         ErrorClass::AuthRejected => eprintln!("Wrong credentials: {e}"),
//!         ErrorClass::NetworkOrUnimplemented => eprintln!("Try again later: {e}"),
//!         ErrorClass::Local => eprintln!("Local failure: {e}"),
//!     }
//! }
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `keyring` - Enables `store::KeyringStore`, backed by the OS keychain
//!
//! ## Logging
//!
//! This crate uses [`tracing`](https://crates.io/crates/tracing) for structured logging.
//! Tracing events are always emitted but are zero-cost when no subscriber is attached.
//! Tokens are never logged. To see logs, attach a tracing subscriber in your application:
//!
//! ```rust,ignore
//! tracing_subscriber::fmt::init();
//! ```
//!
//! ## Security
//!
//! - **Claims are unverified** - [`jwt`] decodes tokens for scheduling and display
//!   only; signature checks belong to the identity provider
//! - **Fail-open restore** - an unreachable provider keeps the stored session
//!   alive on local claims (see [`session`])
//! - **Owner-only files** - [`store::FileStore`] writes with mode 600 on Unix
//! - **Redacted debug output** - token-carrying types never print their tokens
//!
//! ## Demo
//!
//! `demos/session-cli` is a small CLI around [`SessionManager`]:
//! ```bash
//! SESSION_AUTH_BASE_URL=https://id.example.com cargo run -p session-cli -- login alice
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod interceptor;
pub mod jwt;
pub mod provider;
pub mod refresh;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod types;
pub mod utils;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use config::{ProviderConfig, SessionConfig};
pub use error::{ErrorClass, Result, SessionError};
pub use interceptor::AuthorizedClient;
pub use provider::{
    HttpIdentityProvider, IdentityProvider, LoginRequest, PasswordReset, Profile, Registration,
    RegistrationOutcome, RegistrationToken, TokenGrant,
};
pub use refresh::{
    CredentialEvent, CredentialListener, RefreshAttempt, RefreshCoordinator, RefreshOutcome,
};
pub use scheduler::{RefreshScheduler, TickOutcome};
pub use session::SessionManager;
pub use store::{CredentialStore, SecretStore};
pub use types::{CredentialPair, Session, SessionStatus, Tenant, TenantId, User, UserId};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
