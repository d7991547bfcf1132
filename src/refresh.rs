//! Single-flight token refresh
//!
//! [`RefreshCoordinator`] is the only component that exchanges the refresh
//! token. Reactive callers ([`AuthorizedClient`](crate::AuthorizedClient) on a
//! 401) and proactive ones ([`RefreshScheduler`](crate::RefreshScheduler)) share
//! whichever attempt is already running, so the provider sees one request no
//! matter how many callers race.
//!
//! A refresh the provider explicitly rejects (401/403) revokes the stored
//! credentials before the attempt completes. Every other failure leaves them
//! untouched.
//!
//! Each attempt is bound to the store [generation](CredentialStore::generation)
//! it started from. If a logout, login or revocation replaces the credentials
//! while the provider call is running, the attempt ends as
//! [`RefreshOutcome::Superseded`]: nothing is written, nothing is revoked.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::error::{Result, SessionError};
use crate::provider::IdentityProvider;
use crate::store::CredentialStore;
use crate::types::CredentialPair;

/// Change in stored credentials published by the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialEvent {
    /// An attempt began
    RefreshStarted,
    /// New credentials were persisted
    Refreshed(CredentialPair),
    /// The attempt failed; credentials were not changed unless a
    /// [`Revoked`](Self::Revoked) event follows
    RefreshFailed(SessionError),
    /// Stored credentials were cleared
    Revoked,
}

/// Listener notified of every [`CredentialEvent`]
///
/// Listeners run synchronously on the refreshing task and must not block.
pub type CredentialListener = Arc<dyn Fn(&CredentialEvent) + Send + Sync>;

/// Result of one refresh attempt
#[derive(Debug, Clone)]
pub struct RefreshAttempt {
    /// When the attempt began
    pub started_at: Instant,
    /// How it ended
    pub outcome: RefreshOutcome,
}

/// How a refresh attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New credentials were stored
    Success(CredentialPair),
    /// The provider rejected the refresh token; credentials were revoked
    AuthRejected(SessionError),
    /// No refresh token is stored
    NoRefreshToken,
    /// Network, provider or storage failure; credentials untouched
    Failed(SessionError),
    /// Credentials changed while the attempt ran; its result was discarded
    Superseded,
}

impl RefreshOutcome {
    fn from_result(result: Result<CredentialPair>) -> Self {
        match result {
            Ok(pair) => Self::Success(pair),
            Err(SessionError::NoRefreshToken) => Self::NoRefreshToken,
            Err(SessionError::Superseded) => Self::Superseded,
            Err(e) if e.is_auth_rejected() => Self::AuthRejected(e),
            Err(e) => Self::Failed(e),
        }
    }

    /// Convert into a `Result`
    ///
    /// # Errors
    /// Returns the failure carried by a non-success outcome
    pub fn into_result(self) -> Result<CredentialPair> {
        match self {
            Self::Success(pair) => Ok(pair),
            Self::AuthRejected(e) | Self::Failed(e) => Err(e),
            Self::NoRefreshToken => Err(SessionError::NoRefreshToken),
            Self::Superseded => Err(SessionError::Superseded),
        }
    }
}

type SharedAttempt = Shared<BoxFuture<'static, RefreshAttempt>>;

/// Exchanges the refresh token, at most once at a time
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<CredentialStore>,
    provider: Arc<dyn IdentityProvider>,
    in_flight: Mutex<Option<SharedAttempt>>,
    listeners: RwLock<Vec<CredentialListener>>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("in_flight", &self.is_refreshing())
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    /// Create a coordinator writing to `store`
    #[must_use]
    pub fn new(store: Arc<CredentialStore>, provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                provider,
                in_flight: Mutex::new(None),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// The store this coordinator writes to
    #[must_use]
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.inner.store
    }

    /// Whether an attempt is currently running
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|attempt| attempt.peek().is_none())
    }

    /// Register a listener for credential events
    pub fn subscribe(&self, listener: impl Fn(&CredentialEvent) + Send + Sync + 'static) {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Exchange the refresh token for new credentials.
    ///
    /// Joins the running attempt if there is one.
    ///
    /// # Errors
    /// Returns `NoRefreshToken`, `AuthRejected` (credentials have been
    /// revoked), `Superseded` (credentials changed underneath the attempt),
    /// or the non-authoritative failure of the attempt
    pub async fn refresh(&self) -> Result<CredentialPair> {
        self.refresh_attempt().await.outcome.into_result()
    }

    /// Like [`refresh`](Self::refresh) but returns the full attempt record
    pub async fn refresh_attempt(&self) -> RefreshAttempt {
        let attempt = self.join_or_start();
        let result = attempt.await;

        // The first caller to observe completion frees the slot
        let mut slot = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|a| a.peek().is_some()) {
            *slot = None;
        }
        drop(slot);

        result
    }

    /// Refresh only when the token is still valid but expires within `lead_time`.
    ///
    /// Returns `Ok(None)` when no refresh was needed.
    ///
    /// # Errors
    /// Same as [`refresh`](Self::refresh)
    pub async fn refresh_if_expiring(&self, lead_time: Duration) -> Result<Option<CredentialPair>> {
        let remaining = self.inner.store.time_until_expiry().await;
        if remaining.is_zero() || remaining >= lead_time {
            tracing::trace!(
                remaining_secs = remaining.as_secs(),
                "Token outside refresh window"
            );
            return Ok(None);
        }

        tracing::debug!(
            remaining_secs = remaining.as_secs(),
            "Token expiring soon, refreshing proactively"
        );
        self.refresh().await.map(Some)
    }

    /// Clear stored credentials and notify listeners
    pub async fn revoke(&self) {
        self.inner.revoke().await;
    }

    fn join_or_start(&self) -> SharedAttempt {
        let mut slot = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(attempt) = slot.as_ref().filter(|a| a.peek().is_none()) {
            tracing::debug!("Joining in-flight refresh");
            return attempt.clone();
        }

        let inner = Arc::clone(&self.inner);
        let attempt = async move { inner.run_attempt().await }.boxed().shared();
        *slot = Some(attempt.clone());
        attempt
    }
}

impl Inner {
    async fn run_attempt(self: Arc<Self>) -> RefreshAttempt {
        let started_at = Instant::now();
        let generation = self.store.generation();
        self.emit(&CredentialEvent::RefreshStarted);

        let mut outcome = RefreshOutcome::from_result(self.exchange(generation).await);
        if matches!(outcome, RefreshOutcome::AuthRejected(_))
            && !self.store.clear_if_generation(generation).await
        {
            tracing::debug!("Stale refresh token rejected after credentials changed");
            outcome = RefreshOutcome::Superseded;
        }

        match &outcome {
            RefreshOutcome::Success(pair) => {
                tracing::info!(
                    elapsed_ms = started_at.elapsed().as_millis(),
                    rotated = pair.refresh_token.is_some(),
                    "Access token refreshed"
                );
                self.emit(&CredentialEvent::Refreshed(pair.clone()));
            }
            RefreshOutcome::AuthRejected(e) => {
                tracing::warn!(error = %e, "Refresh token rejected, credentials revoked");
                self.emit(&CredentialEvent::RefreshFailed(e.clone()));
                self.emit(&CredentialEvent::Revoked);
            }
            RefreshOutcome::NoRefreshToken => {
                tracing::debug!("No refresh token stored");
                self.emit(&CredentialEvent::RefreshFailed(SessionError::NoRefreshToken));
            }
            RefreshOutcome::Failed(e) => {
                tracing::warn!(error = %e, "Token refresh failed, keeping credentials");
                self.emit(&CredentialEvent::RefreshFailed(e.clone()));
            }
            RefreshOutcome::Superseded => {
                tracing::info!("Credentials changed during refresh, result discarded");
                self.emit(&CredentialEvent::RefreshFailed(SessionError::Superseded));
            }
        }

        RefreshAttempt {
            started_at,
            outcome,
        }
    }

    async fn exchange(&self, generation: u64) -> Result<CredentialPair> {
        let refresh_token = self
            .store
            .refresh_token()
            .await?
            .ok_or(SessionError::NoRefreshToken)?;

        let grant = self.provider.refresh(&refresh_token).await?;
        let mut pair = grant.credential()?;
        if pair.refresh_token.is_none() {
            pair.refresh_token = Some(refresh_token);
        }

        if !self.store.set_if_generation(&pair, generation).await? {
            return Err(SessionError::Superseded);
        }
        Ok(pair)
    }

    async fn revoke(&self) {
        self.store.clear().await;
        tracing::info!("Credentials revoked");
        self.emit(&CredentialEvent::Revoked);
    }

    fn emit(&self, event: &CredentialEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            listener(event);
        }
    }
}
