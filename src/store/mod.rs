//! Credential persistence
//!
//! [`CredentialStore`] keeps the access token, refresh token and expiry
//! timestamp across process restarts. It sits on two [`SecretStore`]
//! backends:
//!
//! - a *secure* backend for the tokens (e.g. `KeyringStore` with the
//!   `keyring` feature, or an owner-only [`FileStore`])
//! - a *plain* backend for the non-sensitive expiry timestamp, which is also
//!   where older releases kept tokens in plaintext
//!
//! Tokens found only in the plain backend are moved into the secure backend
//! the first time they are read.
//!
//! # Example
//!
//! ```
//! use session_auth::store::{CredentialStore, MemoryStore};
//! use session_auth::CredentialPair;
//!
//! # async fn example() -> session_auth::Result<()> {
//! let store = CredentialStore::new(MemoryStore::new(), MemoryStore::new());
//! store.set(&CredentialPair::new("access", Some("refresh".into()))).await?;
//! assert_eq!(store.access_token().await?.as_deref(), Some("access"));
//!
//! store.clear().await;
//! assert!(store.get().await?.is_none());
//! # Ok(())
//! # }
//! ```

mod credentials;
mod file;
#[cfg(feature = "keyring")]
mod keychain;
mod memory;

pub use credentials::CredentialStore;
pub use file::FileStore;
#[cfg(feature = "keyring")]
pub use keychain::KeyringStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::SessionError;

/// Logical key of the access token
pub const ACCESS_TOKEN_KEY: &str = "auth.accessToken";
/// Logical key of the refresh token
pub const REFRESH_TOKEN_KEY: &str = "auth.refreshToken";
/// Logical key of the expiry timestamp (Unix milliseconds)
pub const TOKEN_EXPIRY_KEY: &str = "auth.tokenExpiry";

/// Errors raised by storage backends
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error during storage operations
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// OS keychain error
    #[error("Keychain error: {0}")]
    Keychain(String),

    /// Background storage task failed
    #[error("Storage task failed: {0}")]
    Task(String),
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        SessionError::Storage(err.to_string())
    }
}

/// Key/value backend for credential storage
///
/// Implementations must be safe to share between tasks. `remove` of an
/// absent key succeeds.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read a value
    ///
    /// # Errors
    /// Returns an error if the backend cannot be read
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value, replacing any existing one
    ///
    /// # Errors
    /// Returns an error if the backend cannot be written
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete a value
    ///
    /// # Errors
    /// Returns an error if the backend cannot be written
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: SecretStore + ?Sized> SecretStore for std::sync::Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key).await
    }
}
