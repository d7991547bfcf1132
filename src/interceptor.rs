//! Bearer-token HTTP client
//!
//! [`AuthorizedClient`] wraps [`reqwest::Client`] for calls to protected APIs.
//! Each request picks up the current access token from the
//! [`CredentialStore`], and a `401 Unauthorized` triggers at most one
//! refresh-and-replay per request.
//!
//! # Example
//!
//! ```no_run
//! # async fn example(session: &session_auth::SessionManager) -> session_auth::Result<()> {
//! let client = session.authorized_client(reqwest::Client::new());
//! let response = client.send(client.get("/orders")).await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Method, Request, RequestBuilder, Response, StatusCode};
use std::sync::Arc;

use crate::config::join_url;
use crate::error::{Result, SessionError};
use crate::refresh::RefreshCoordinator;
use crate::store::CredentialStore;
use crate::types::CredentialPair;

/// Per-request replay guard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RetryState {
    attempted: bool,
}

/// HTTP client that authenticates requests and recovers from one 401
///
/// Concurrent requests that hit a 401 together share a single refresh.
/// When the provider rejects the refresh token, the stored credentials are
/// revoked and the request fails with `AuthRejected`; any other refresh
/// failure is returned without touching the credentials.
#[derive(Clone)]
pub struct AuthorizedClient {
    http_client: reqwest::Client,
    base_url: Option<String>,
    store: Arc<CredentialStore>,
    coordinator: RefreshCoordinator,
}

impl std::fmt::Debug for AuthorizedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizedClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl AuthorizedClient {
    /// Wrap `http_client`, refreshing through `coordinator`
    #[must_use]
    pub fn new(http_client: reqwest::Client, coordinator: RefreshCoordinator) -> Self {
        Self {
            http_client,
            base_url: None,
            store: Arc::clone(coordinator.store()),
            coordinator,
        }
    }

    /// Resolve relative paths against `base_url`
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Resolve `path` against the base URL, if one is set
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        match &self.base_url {
            Some(base) => join_url(base, path),
            None => path.to_string(),
        }
    }

    /// Start a request; send it with [`send`](Self::send)
    #[must_use]
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http_client.request(method, self.url(path))
    }

    /// Start a GET request
    #[must_use]
    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    /// Start a POST request
    #[must_use]
    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    /// Start a PUT request
    #[must_use]
    pub fn put(&self, path: &str) -> RequestBuilder {
        self.request(Method::PUT, path)
    }

    /// Start a PATCH request
    #[must_use]
    pub fn patch(&self, path: &str) -> RequestBuilder {
        self.request(Method::PATCH, path)
    }

    /// Start a DELETE request
    #[must_use]
    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }

    /// Build and execute a request
    ///
    /// # Errors
    /// See [`execute`](Self::execute)
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        self.execute(builder.build()?).await
    }

    /// Execute a request with the current bearer token.
    ///
    /// Non-401 responses are returned as-is. On a 401 the token is refreshed
    /// once and the request replayed; the replay's response is returned
    /// whatever its status. Requests whose body cannot be cloned (streams)
    /// are never replayed, so their 401 is returned.
    ///
    /// # Errors
    /// Returns transport errors, storage errors, or the refresh failure when
    /// a 401 could not be recovered (`Superseded` after a logout raced the
    /// refresh)
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let mut retry = RetryState::default();
        let mut request = request;
        let mut refreshed: Option<CredentialPair> = None;

        loop {
            let replay = request.try_clone();
            let response = self.dispatch(request, refreshed.take()).await?;
            if response.status() != StatusCode::UNAUTHORIZED || retry.attempted {
                return Ok(response);
            }

            let Some(replay) = replay else {
                tracing::debug!("Request body cannot be replayed, returning 401");
                return Ok(response);
            };

            retry.attempted = true;
            tracing::debug!(url = %replay.url(), "Received 401, refreshing token");
            refreshed = match self.coordinator.refresh().await {
                Ok(pair) => Some(pair),
                Err(SessionError::Superseded) => {
                    // Replaced by a new login: replay with whatever is stored now
                    let Some(current) = self.store.get().await? else {
                        return Err(SessionError::Superseded);
                    };
                    Some(current)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Could not recover from 401");
                    return Err(e);
                }
            };
            request = replay;
        }
    }

    /// Attach a bearer token (the stored one unless given) and send
    async fn dispatch(
        &self,
        mut request: Request,
        credential: Option<CredentialPair>,
    ) -> Result<Response> {
        let credential = match credential {
            Some(pair) => Some(pair),
            None => self.store.get().await?,
        };

        if let Some(pair) = credential {
            let mut value = HeaderValue::from_str(&pair.authorization_header()).map_err(|_| {
                SessionError::storage("stored access token is not a valid header value")
            })?;
            value.set_sensitive(true);
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        Ok(self.http_client.execute(request).await?)
    }
}
