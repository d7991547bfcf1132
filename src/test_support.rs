//! Shared helpers for unit tests

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Result, SessionError};
use crate::provider::{IdentityProvider, LoginRequest, Profile, TokenGrant};

/// Current Unix time in seconds
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Unsigned three-part token carrying `claims`
pub fn make_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
    format!("{header}.{payload}.signature")
}

/// Token for subject `user-1` expiring at `exp` (Unix seconds)
pub fn make_token_with_exp(exp: i64) -> String {
    make_token(&json!({ "sub": "user-1", "exp": exp, "iat": exp - 3600 }))
}

/// Scripted [`IdentityProvider`]
///
/// Each endpoint pops its next scripted response; an empty script answers
/// with an `Unavailable` error (logout answers `Ok`).
#[derive(Default)]
pub struct FakeProvider {
    logins: Mutex<VecDeque<Result<TokenGrant>>>,
    refreshes: Mutex<VecDeque<Result<TokenGrant>>>,
    profiles: Mutex<VecDeque<Result<Profile>>>,
    logouts: Mutex<VecDeque<Result<()>>>,
    delay: Mutex<Duration>,
    login_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    profile_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    refresh_tokens: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_login(&self, response: Result<TokenGrant>) {
        self.logins.lock().unwrap().push_back(response);
    }

    pub fn push_refresh(&self, response: Result<TokenGrant>) {
        self.refreshes.lock().unwrap().push_back(response);
    }

    pub fn push_profile(&self, response: Result<Profile>) {
        self.profiles.lock().unwrap().push_back(response);
    }

    pub fn push_logout(&self, response: Result<()>) {
        self.logouts.lock().unwrap().push_back(response);
    }

    /// Delay every response, to widen race windows
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.refresh_tokens.lock().unwrap().clone()
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

fn unscripted<T>(endpoint: &str) -> Result<T> {
    Err(SessionError::unavailable(
        None,
        format!("no scripted {endpoint} response"),
    ))
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn login(&self, request: &LoginRequest) -> Result<TokenGrant> {
        request.validate()?;
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let next = self.logins.lock().unwrap().pop_front();
        next.unwrap_or_else(|| unscripted("login"))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_tokens
            .lock()
            .unwrap()
            .push(refresh_token.to_string());
        self.pause().await;
        let next = self.refreshes.lock().unwrap().pop_front();
        next.unwrap_or_else(|| unscripted("refresh"))
    }

    async fn profile(&self, _access_token: &str) -> Result<Profile> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let next = self.profiles.lock().unwrap().pop_front();
        next.unwrap_or_else(|| unscripted("profile"))
    }

    async fn logout(&self, _access_token: &str) -> Result<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let next = self.logouts.lock().unwrap().pop_front();
        next.unwrap_or(Ok(()))
    }
}
