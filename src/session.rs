//! Session state machine
//!
//! [`SessionManager`] owns the one [`Session`] of the application and drives
//! it through login, silent restore, refresh and logout:
//!
//! ```text
//! Unauthenticated -> Authenticating -> Authenticated <-> Refreshing
//!        ^                                  |
//!        +------------ logout / revoked ----+
//! ```
//!
//! Mutating operations are serialized; readers take a short lock and never
//! wait on the network.
//!
//! # Fail-open restore
//!
//! When the identity provider cannot be reached (or answers with anything
//! other than an explicit 401/403), a stored token is kept and the session is
//! restored from the token's locally decoded claims. Those claims are **not
//! verified**. The session relies on the backend rejecting revoked tokens on
//! the next request, at which point the [`AuthorizedClient`] refreshes or
//! revokes. Only an explicit rejection clears credentials.
//!
//! # Example
//!
//! ```no_run
//! use session_auth::{SessionConfig, SessionManager, SessionStatus};
//! use session_auth::store::{CredentialStore, FileStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> session_auth::Result<()> {
//! let store = Arc::new(CredentialStore::new(
//!     FileStore::named("tokens"),
//!     FileStore::named("settings"),
//! ));
//! let session = SessionManager::from_config(&SessionConfig::from_env()?, store)?;
//!
//! if session.restore_on_launch().await != SessionStatus::Authenticated {
//!     session.login("alice@example.com", "correct horse").await?;
//! }
//! println!("signed in as {:?}", session.user().map(|u| u.username));
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::{DEFAULT_REFRESH_INTERVAL, DEFAULT_REFRESH_LEAD_TIME, SessionConfig};
use crate::error::{Result, SessionError};
use crate::interceptor::AuthorizedClient;
use crate::jwt;
use crate::provider::{
    HttpIdentityProvider, IdentityProvider, LoginRequest, PasswordReset, Profile, Registration,
    RegistrationOutcome,
};
use crate::refresh::{CredentialEvent, RefreshCoordinator, RefreshOutcome};
use crate::scheduler::RefreshScheduler;
use crate::store::CredentialStore;
use crate::types::{CredentialPair, Session, SessionStatus, Tenant, User};

/// `last_error` after credentials were revoked
pub const SESSION_EXPIRED: &str = "session expired";

/// Owner of the application's authenticated session
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    state: RwLock<Session>,
    op_lock: Mutex<()>,
    store: Arc<CredentialStore>,
    provider: Arc<dyn IdentityProvider>,
    coordinator: RefreshCoordinator,
    scheduler: RefreshScheduler,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("status", &self.status())
            .field("scheduler", &self.inner.scheduler)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager with the default refresh schedule
    #[must_use]
    pub fn new(store: Arc<CredentialStore>, provider: Arc<dyn IdentityProvider>) -> Self {
        Self::with_timing(
            store,
            provider,
            DEFAULT_REFRESH_INTERVAL,
            DEFAULT_REFRESH_LEAD_TIME,
        )
    }

    /// Create a manager with a custom refresh schedule
    #[must_use]
    pub fn with_timing(
        store: Arc<CredentialStore>,
        provider: Arc<dyn IdentityProvider>,
        refresh_interval: Duration,
        refresh_lead_time: Duration,
    ) -> Self {
        let coordinator = RefreshCoordinator::new(Arc::clone(&store), Arc::clone(&provider));
        let scheduler =
            RefreshScheduler::with_timing(coordinator.clone(), refresh_interval, refresh_lead_time);

        let inner = Arc::new(Inner {
            state: RwLock::new(Session::default()),
            op_lock: Mutex::new(()),
            store,
            provider,
            coordinator: coordinator.clone(),
            scheduler,
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        coordinator.subscribe(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_credential_event(event);
            }
        });

        Self { inner }
    }

    /// Create a manager talking to an HTTP identity provider
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the provider configuration is invalid
    pub fn from_config(config: &SessionConfig, store: Arc<CredentialStore>) -> Result<Self> {
        let provider = HttpIdentityProvider::new(config.provider.clone())?;
        Ok(Self::with_timing(
            store,
            Arc::new(provider),
            config.refresh_interval,
            config.refresh_lead_time,
        ))
    }

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    /// Log in with an identifier and secret.
    ///
    /// Empty fields fail with `Validation` before any network call.
    ///
    /// # Errors
    /// Returns the validation, provider, or storage error; the session is
    /// left `Unauthenticated` with `last_error` set
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<()> {
        let _op = self.inner.op_lock.lock().await;

        let request = LoginRequest::new(identifier, secret);
        if let Err(e) = request.validate() {
            self.inner.update(|s| s.last_error = Some(e.to_string()));
            return Err(e);
        }

        self.inner.update(|s| {
            s.status = SessionStatus::Authenticating;
            s.last_error = None;
        });

        match self.inner.authenticate(&request).await {
            Ok((pair, profile)) => {
                tracing::info!(user_id = %profile.user.id, "Logged in");
                self.inner.establish(pair, profile);
                self.inner.scheduler.start();
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Login failed");
                self.inner.update(|s| {
                    s.status = SessionStatus::Unauthenticated;
                    s.last_error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    /// Restore a stored session at startup.
    ///
    /// Never fails: an unreadable store yields `Failed`, an absent or
    /// rejected credential yields `Unauthenticated`, and an unreachable
    /// provider keeps the stored token (see the module docs).
    pub async fn restore_on_launch(&self) -> SessionStatus {
        let _op = self.inner.op_lock.lock().await;

        self.inner.update(|s| {
            s.status = SessionStatus::Authenticating;
            s.last_error = None;
        });

        let status = self.inner.restore().await;
        if status == SessionStatus::Authenticated {
            self.inner.scheduler.start();
        } else {
            self.inner.scheduler.stop();
        }
        tracing::info!(%status, "Session restore finished");
        status
    }

    /// End the session.
    ///
    /// The provider is notified on a best-effort basis; local credentials
    /// are always cleared.
    pub async fn logout(&self) {
        let _op = self.inner.op_lock.lock().await;
        self.inner.scheduler.stop();

        match self.inner.store.access_token().await {
            Ok(Some(token)) => {
                if let Err(e) = self.inner.provider.logout(&token).await {
                    tracing::warn!(error = %e, "Provider logout failed, clearing locally");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Could not read token for provider logout"),
        }

        self.inner.store.clear().await;
        self.inner.update(|s| *s = Session::default());
        tracing::info!("Logged out");
    }

    /// Install an externally obtained access token and mark the session
    /// authenticated without contacting the provider.
    ///
    /// # Errors
    /// Returns `Validation` for an empty token or a storage error
    pub async fn set_credential(&self, access_token: &str) -> Result<()> {
        if access_token.trim().is_empty() {
            return Err(SessionError::validation("access token is required"));
        }

        let _op = self.inner.op_lock.lock().await;
        self.inner.store.set_access_token(access_token).await?;
        let pair = self
            .inner
            .store
            .get()
            .await?
            .unwrap_or_else(|| CredentialPair::new(access_token, None));

        let claims = jwt::decode(access_token);
        self.inner.update(|s| {
            if s.user.is_none() {
                s.user = Some(User::from_claims(claims.as_ref(), None));
            }
            s.credential = Some(pair);
            s.status = SessionStatus::Authenticated;
            s.last_error = None;
        });
        self.inner.scheduler.start();
        tracing::debug!("Credential installed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Account requests
    // ------------------------------------------------------------------
    //
    // None of these touch stored credentials or the session status; they
    // only record the outcome in `last_error`.

    /// Create an account. A `Token` outcome is returned to the caller and
    /// does not sign the session in.
    ///
    /// # Errors
    /// Returns `Validation` for a malformed submission, otherwise the
    /// provider error
    pub async fn register(&self, registration: &Registration) -> Result<RegistrationOutcome> {
        let result = self.inner.provider.register(registration).await;
        if let Ok(outcome) = &result {
            tracing::info!(company_id = %registration.company_id, ?outcome, "Account registered");
        }
        self.record(result)
    }

    /// Ask the provider to send a password-reset code to `email`
    ///
    /// # Errors
    /// Returns `Validation` for a malformed address, otherwise the provider error
    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let result = self.inner.provider.request_password_reset(email).await;
        self.record(result)
    }

    /// Check a password-reset code
    ///
    /// # Errors
    /// Returns `Validation` for a malformed address or code, otherwise the
    /// provider error
    pub async fn verify_password_reset(&self, email: &str, code: &str) -> Result<()> {
        let result = self.inner.provider.verify_password_reset(email, code).await;
        self.record(result)
    }

    /// Set a new password with a verified code
    ///
    /// # Errors
    /// Returns `Validation` when the request or new password is invalid,
    /// otherwise the provider error
    pub async fn reset_password(&self, reset: &PasswordReset) -> Result<()> {
        let result = self.inner.provider.reset_password(reset).await;
        if result.is_ok() {
            tracing::info!("Password reset");
        }
        self.record(result)
    }

    fn record<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.inner.update(|s| s.last_error = None),
            Err(e) => {
                tracing::warn!(error = %e, "Account request failed");
                self.inner.update(|s| s.last_error = Some(e.to_string()));
            }
        }
        result
    }

    /// Clear the last error
    pub fn clear_error(&self) {
        self.inner.update(|s| s.last_error = None);
    }

    /// Replace the signed-in user
    pub fn set_user(&self, user: User) {
        self.inner.update(|s| s.user = Some(user));
    }

    /// Replace the tenant
    pub fn set_tenant(&self, tenant: Tenant) {
        self.inner.update(|s| s.tenant = Some(tenant));
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Signed-in user
    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.inner.read(|s| s.user.clone())
    }

    /// Tenant of the signed-in user
    #[must_use]
    pub fn tenant(&self) -> Option<Tenant> {
        self.inner.read(|s| s.tenant.clone())
    }

    /// Whether a session is alive
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.read(Session::is_authenticated)
    }

    /// Whether a login, restore or refresh is running
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.read(|s| s.status.is_in_flight())
    }

    /// Current state
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.inner.read(|s| s.status)
    }

    /// Last user-visible error
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.inner.read(|s| s.last_error.clone())
    }

    /// Current credentials
    #[must_use]
    pub fn credential(&self) -> Option<CredentialPair> {
        self.inner.read(|s| s.credential.clone())
    }

    /// Copy of the whole session
    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.inner.read(Session::clone)
    }

    /// The credential store backing this session
    #[must_use]
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.inner.store
    }

    /// The refresh coordinator shared by this session's clients
    #[must_use]
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.inner.coordinator
    }

    /// The background refresh scheduler
    #[must_use]
    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.inner.scheduler
    }

    /// HTTP client that authenticates with this session's credentials
    #[must_use]
    pub fn authorized_client(&self, http_client: reqwest::Client) -> AuthorizedClient {
        AuthorizedClient::new(http_client, self.inner.coordinator.clone())
    }
}

impl Inner {
    fn read<T>(&self, f: impl FnOnce(&Session) -> T) -> T {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&*guard)
    }

    fn update(&self, f: impl FnOnce(&mut Session)) {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut *guard);
    }

    fn on_credential_event(&self, event: &CredentialEvent) {
        match event {
            CredentialEvent::RefreshStarted => self.update(|s| {
                if s.status == SessionStatus::Authenticated {
                    s.status = SessionStatus::Refreshing;
                }
            }),
            CredentialEvent::Refreshed(pair) => self.update(|s| {
                // A signed-out session never takes credentials from a refresh
                if matches!(
                    s.status,
                    SessionStatus::Authenticated | SessionStatus::Refreshing
                ) {
                    s.credential = Some(pair.clone());
                    s.status = SessionStatus::Authenticated;
                }
            }),
            CredentialEvent::RefreshFailed(_) => self.update(|s| {
                if s.status == SessionStatus::Refreshing {
                    s.status = SessionStatus::Authenticated;
                }
            }),
            CredentialEvent::Revoked => {
                self.scheduler.stop();
                self.update(|s| {
                    *s = Session {
                        last_error: Some(SESSION_EXPIRED.to_string()),
                        ..Session::default()
                    };
                });
                tracing::info!("Session ended after credential revocation");
            }
        }
    }

    async fn authenticate(&self, request: &LoginRequest) -> Result<(CredentialPair, Profile)> {
        let grant = self.provider.login(request).await?;
        let pair = grant.credential()?;
        self.store.set(&pair).await?;

        let user = grant.user.unwrap_or_else(|| {
            User::from_claims(
                jwt::decode(&pair.access_token).as_ref(),
                Some(&request.identifier),
            )
        });
        Ok((
            pair,
            Profile {
                user,
                tenant: grant.tenant,
            },
        ))
    }

    async fn restore(&self) -> SessionStatus {
        let pair = match self.store.get().await {
            Ok(Some(pair)) => pair,
            Ok(None) => {
                tracing::debug!("No stored credentials");
                self.update(|s| *s = Session::default());
                return SessionStatus::Unauthenticated;
            }
            Err(e) => {
                tracing::error!(error = %e, "Credential store unreadable");
                self.update(|s| {
                    s.status = SessionStatus::Failed;
                    s.last_error = Some(e.to_string());
                });
                return SessionStatus::Failed;
            }
        };

        if !self.store.is_expired().await {
            return self.validate(pair, false).await;
        }

        tracing::debug!("Stored token expired, refreshing");
        self.update(|s| s.status = SessionStatus::Refreshing);
        match self.coordinator.refresh_attempt().await.outcome {
            RefreshOutcome::Success(refreshed) => self.validate(refreshed, true).await,
            RefreshOutcome::AuthRejected(e) => self.expire(&e).await,
            RefreshOutcome::NoRefreshToken => {
                tracing::warn!("Token expired and no refresh token stored, keeping session");
                self.establish_from_claims(pair)
            }
            RefreshOutcome::Failed(e) => {
                tracing::warn!(error = %e, "Refresh failed, keeping session on stored token");
                self.establish_from_claims(pair)
            }
            RefreshOutcome::Superseded => self.adopt_stored().await,
        }
    }

    /// Confirm `pair` against the profile endpoint, refreshing once on an
    /// explicit rejection unless a refresh already happened
    async fn validate(&self, mut pair: CredentialPair, mut refreshed: bool) -> SessionStatus {
        loop {
            match self.provider.profile(&pair.access_token).await {
                Ok(profile) => {
                    self.establish(pair, profile);
                    return SessionStatus::Authenticated;
                }
                Err(e) if !e.is_auth_rejected() => {
                    tracing::warn!(error = %e, "Profile unavailable, using token claims");
                    return self.establish_from_claims(pair);
                }
                Err(e) if refreshed => return self.expire(&e).await,
                Err(_) => {}
            }

            refreshed = true;
            tracing::debug!("Profile rejected the token, refreshing");
            match self.coordinator.refresh_attempt().await.outcome {
                RefreshOutcome::Success(new_pair) => pair = new_pair,
                RefreshOutcome::AuthRejected(e) => return self.expire(&e).await,
                RefreshOutcome::NoRefreshToken => {
                    return self.expire(&SessionError::NoRefreshToken).await;
                }
                RefreshOutcome::Failed(e) => {
                    tracing::warn!(error = %e, "Refresh failed, keeping session on stored token");
                    return self.establish_from_claims(pair);
                }
                RefreshOutcome::Superseded => return self.adopt_stored().await,
            }
        }
    }

    fn establish(&self, pair: CredentialPair, profile: Profile) {
        self.update(|s| {
            s.status = SessionStatus::Authenticated;
            s.user = Some(profile.user);
            if profile.tenant.is_some() {
                s.tenant = profile.tenant;
            }
            s.credential = Some(pair);
            s.last_error = None;
        });
    }

    fn establish_from_claims(&self, pair: CredentialPair) -> SessionStatus {
        let user = User::from_claims(jwt::decode(&pair.access_token).as_ref(), None);
        self.establish(pair, user.into());
        SessionStatus::Authenticated
    }

    /// Credentials were replaced underneath a refresh; take whatever is
    /// stored now without another round trip
    async fn adopt_stored(&self) -> SessionStatus {
        match self.store.get().await {
            Ok(Some(pair)) => self.establish_from_claims(pair),
            Ok(None) => {
                self.update(|s| *s = Session::default());
                SessionStatus::Unauthenticated
            }
            Err(e) => {
                tracing::error!(error = %e, "Credential store unreadable");
                self.update(|s| {
                    s.status = SessionStatus::Failed;
                    s.last_error = Some(e.to_string());
                });
                SessionStatus::Failed
            }
        }
    }

    async fn expire(&self, reason: &SessionError) -> SessionStatus {
        tracing::info!(error = %reason, "Stored session rejected, clearing credentials");
        self.store.clear().await;
        self.update(|s| {
            *s = Session {
                last_error: Some(SESSION_EXPIRED.to_string()),
                ..Session::default()
            };
        });
        SessionStatus::Unauthenticated
    }
}
