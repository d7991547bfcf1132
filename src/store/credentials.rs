//! Token persistence with legacy migration and expiry tracking

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;

use super::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SecretStore, TOKEN_EXPIRY_KEY};
use crate::error::Result;
use crate::jwt;
use crate::types::CredentialPair;
use crate::utils::{from_unix_millis, remaining_until, to_unix_millis};

/// Persistent home of the credential pair
///
/// This is the single source of truth for tokens; only the session and the
/// refresh coordinator write to it. Compound operations (migration, pair
/// writes, clearing) run under one internal lock so readers never observe a
/// half-written pair.
///
/// Every credential write or clear advances a generation counter. A writer
/// that started from an older generation (a refresh racing a logout, say)
/// can commit with [`set_if_generation`](Self::set_if_generation) and is
/// turned away instead of resurrecting replaced credentials.
pub struct CredentialStore {
    secure: Arc<dyn SecretStore>,
    plain: Arc<dyn SecretStore>,
    lock: Mutex<()>,
    generation: AtomicU64,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Create a store from a secure backend (tokens) and a plain backend
    /// (expiry timestamp, legacy plaintext tokens)
    pub fn new(secure: impl SecretStore + 'static, plain: impl SecretStore + 'static) -> Self {
        Self::from_arcs(Arc::new(secure), Arc::new(plain))
    }

    /// Create a store from shared backends
    #[must_use]
    pub fn from_arcs(secure: Arc<dyn SecretStore>, plain: Arc<dyn SecretStore>) -> Self {
        Self {
            secure,
            plain,
            lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Current credential generation
    ///
    /// Advanced by [`set`](Self::set), [`set_access_token`](Self::set_access_token),
    /// [`set_refresh_token`](Self::set_refresh_token) and [`clear`](Self::clear).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Read the access token, migrating a legacy plaintext copy if needed
    ///
    /// # Errors
    /// Returns a storage error if a backend cannot be read or written
    pub async fn access_token(&self) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        self.read_token(ACCESS_TOKEN_KEY).await
    }

    /// Read the refresh token, migrating a legacy plaintext copy if needed
    ///
    /// # Errors
    /// Returns a storage error if a backend cannot be read or written
    pub async fn refresh_token(&self) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        self.read_token(REFRESH_TOKEN_KEY).await
    }

    /// Read the whole pair; `None` when no access token is stored
    ///
    /// # Errors
    /// Returns a storage error if a backend cannot be read
    pub async fn get(&self) -> Result<Option<CredentialPair>> {
        let _guard = self.lock.lock().await;
        let Some(access_token) = self.read_token(ACCESS_TOKEN_KEY).await? else {
            return Ok(None);
        };
        let refresh_token = self.read_token(REFRESH_TOKEN_KEY).await?;
        let expires_at = self.read_expiry().await?;
        Ok(Some(CredentialPair {
            access_token,
            refresh_token,
            expires_at,
        }))
    }

    /// Overwrite the stored pair.
    ///
    /// A pair without a refresh token removes the stored one. The expiry is
    /// taken from the access token's `exp` claim when present, otherwise from
    /// `pair.expires_at`; if neither is known the stored expiry is removed.
    ///
    /// # Errors
    /// Returns a storage error if a backend cannot be written
    pub async fn set(&self, pair: &CredentialPair) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write_pair(pair).await
    }

    /// Overwrite the stored pair only if no credential write or clear
    /// happened since `generation` was read.
    ///
    /// Returns `false`, without writing, when the credentials moved on.
    ///
    /// # Errors
    /// Returns a storage error if a backend cannot be written
    pub async fn set_if_generation(&self, pair: &CredentialPair, generation: u64) -> Result<bool> {
        let _guard = self.lock.lock().await;
        if self.generation() != generation {
            tracing::debug!(
                expected = generation,
                current = self.generation(),
                "Credentials changed, discarding write"
            );
            return Ok(false);
        }
        self.write_pair(pair).await?;
        Ok(true)
    }

    /// Caller must hold `self.lock`
    async fn write_pair(&self, pair: &CredentialPair) -> Result<()> {
        self.advance();
        self.secure
            .set(ACCESS_TOKEN_KEY, &pair.access_token)
            .await?;
        match &pair.refresh_token {
            Some(refresh) => self.secure.set(REFRESH_TOKEN_KEY, refresh).await?,
            None => self.secure.remove(REFRESH_TOKEN_KEY).await?,
        }
        match pair.effective_expiry() {
            Some(expiry) => self.write_expiry(expiry).await?,
            None => self.plain.remove(TOKEN_EXPIRY_KEY).await?,
        }
        tracing::debug!(
            has_refresh_token = pair.refresh_token.is_some(),
            "Credential pair stored"
        );
        Ok(())
    }

    /// Store a new access token, deriving the expiry from its `exp` claim.
    ///
    /// The claim takes precedence over any previously stored expiry; tokens
    /// without one leave the stored expiry untouched.
    ///
    /// # Errors
    /// Returns a storage error if a backend cannot be written
    pub async fn set_access_token(&self, token: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.advance();
        self.secure.set(ACCESS_TOKEN_KEY, token).await?;
        if let Some(expiry) = jwt::expiry(token) {
            self.write_expiry(expiry).await?;
            tracing::debug!(
                expires_at_ms = to_unix_millis(expiry),
                "Token expiry extracted from claims"
            );
        }
        Ok(())
    }

    /// Store a new refresh token
    ///
    /// # Errors
    /// Returns a storage error if the backend cannot be written
    pub async fn set_refresh_token(&self, token: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.advance();
        self.secure.set(REFRESH_TOKEN_KEY, token).await?;
        Ok(())
    }

    /// Stored expiry timestamp
    ///
    /// # Errors
    /// Returns a storage error if the backend cannot be read
    pub async fn expiry(&self) -> Result<Option<SystemTime>> {
        self.read_expiry().await
    }

    /// Store an expiry `seconds` from now
    ///
    /// # Errors
    /// Returns a storage error if the backend cannot be written
    pub async fn set_expiry(&self, seconds: u64) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write_expiry(SystemTime::now() + Duration::from_secs(seconds))
            .await
    }

    /// Whether the stored access token is expired.
    ///
    /// The token's own `exp` claim is preferred over the stored expiry; both
    /// are checked with a one-minute skew buffer. A missing token, an unknown
    /// expiry, or a storage failure all count as expired.
    pub async fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now()).await
    }

    /// [`is_expired`](Self::is_expired) evaluated at `now`
    pub async fn is_expired_at(&self, now: SystemTime) -> bool {
        match self.current_expiry().await {
            Ok(Some(expiry)) => jwt::expired_with_buffer(expiry, now),
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Could not determine token expiry");
                true
            }
        }
    }

    /// Time until the stored access token expires, zero-floored
    pub async fn time_until_expiry(&self) -> Duration {
        match self.current_expiry().await {
            Ok(Some(expiry)) => remaining_until(expiry, SystemTime::now()),
            Ok(None) => Duration::ZERO,
            Err(e) => {
                tracing::warn!(error = %e, "Could not determine token expiry");
                Duration::ZERO
            }
        }
    }

    /// Whether a non-expired access token is stored
    pub async fn has_valid_session(&self) -> bool {
        matches!(self.access_token().await, Ok(Some(_))) && !self.is_expired().await
    }

    /// Remove all credential entries from both backends.
    ///
    /// Never fails: missing entries are fine and backend errors are logged.
    pub async fn clear(&self) {
        let _guard = self.lock.lock().await;
        self.clear_entries().await;
    }

    /// Clear only if no credential write or clear happened since
    /// `generation` was read; returns whether anything was cleared
    pub async fn clear_if_generation(&self, generation: u64) -> bool {
        let _guard = self.lock.lock().await;
        if self.generation() != generation {
            tracing::debug!("Credentials changed, not clearing");
            return false;
        }
        self.clear_entries().await;
        true
    }

    /// Caller must hold `self.lock`
    async fn clear_entries(&self) {
        self.advance();
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, TOKEN_EXPIRY_KEY] {
            for backend in [&self.secure, &self.plain] {
                if let Err(e) = backend.remove(key).await {
                    tracing::warn!(key, error = %e, "Failed to remove credential entry");
                }
            }
        }
        tracing::debug!("All credentials cleared");
    }

    /// Caller must hold `self.lock`
    fn advance(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Expiry of the current token: claim first, stored value second
    async fn current_expiry(&self) -> Result<Option<SystemTime>> {
        let token = {
            let _guard = self.lock.lock().await;
            self.read_token(ACCESS_TOKEN_KEY).await?
        };
        let Some(token) = token else {
            return Ok(None);
        };
        if let Some(expiry) = jwt::expiry(&token) {
            return Ok(Some(expiry));
        }
        self.read_expiry().await
    }

    /// Caller must hold `self.lock`
    async fn read_token(&self, key: &str) -> Result<Option<String>> {
        if let Some(value) = self.secure.get(key).await? {
            return Ok(Some(value));
        }

        let Some(legacy) = self.plain.get(key).await? else {
            return Ok(None);
        };
        self.secure.set(key, &legacy).await?;
        self.plain.remove(key).await?;
        tracing::info!(key, "Migrated legacy plaintext credential to secure storage");
        Ok(Some(legacy))
    }

    async fn read_expiry(&self) -> Result<Option<SystemTime>> {
        let Some(raw) = self.plain.get(TOKEN_EXPIRY_KEY).await? else {
            return Ok(None);
        };
        match raw.trim().parse::<u64>() {
            Ok(millis) => Ok(Some(from_unix_millis(millis))),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unparseable stored token expiry");
                Ok(None)
            }
        }
    }

    async fn write_expiry(&self, expiry: SystemTime) -> Result<()> {
        self.plain
            .set(TOKEN_EXPIRY_KEY, &to_unix_millis(expiry).to_string())
            .await?;
        Ok(())
    }
}
