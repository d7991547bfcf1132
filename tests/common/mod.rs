//! Mock identity provider and API server for integration tests

#![allow(dead_code)]

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;

use session_auth::store::{CredentialStore, MemoryStore};
use session_auth::{ProviderConfig, SessionConfig, SessionManager};

pub const USERNAME: &str = "alice";
pub const PASSWORD: &str = "correct horse";
pub const REFRESH_TOKEN: &str = "refresh-1";
/// Code the reset endpoints send and accept
pub const RESET_CODE: &str = "4321";
/// Email the register endpoint reports as taken
pub const TAKEN_EMAIL: &str = "taken@example.com";

/// How the refresh endpoint answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshBehavior {
    /// Issue a token the API accepts
    Issue,
    /// Issue a token the API still rejects
    IssueUnaccepted,
    /// 401 with a message
    Reject,
    /// 503
    Fail,
}

pub struct MockState {
    accepted: Mutex<HashSet<String>>,
    refresh_behavior: Mutex<RefreshBehavior>,
    refresh_delay: Mutex<Duration>,
    issued: AtomicUsize,
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub profile_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub api_calls: AtomicUsize,
    pub last_nonce: Mutex<Option<String>>,
    pub last_refresh_token: Mutex<Option<String>>,
    pub account_calls: AtomicUsize,
    pub last_registration: Mutex<Option<(Value, Option<String>)>>,
    pub reset_codes: Mutex<HashMap<String, String>>,
    pub passwords: Mutex<HashMap<String, String>>,
}

impl MockState {
    fn new() -> Self {
        Self {
            accepted: Mutex::new(HashSet::new()),
            refresh_behavior: Mutex::new(RefreshBehavior::Issue),
            refresh_delay: Mutex::new(Duration::ZERO),
            issued: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            api_calls: AtomicUsize::new(0),
            last_nonce: Mutex::new(None),
            last_refresh_token: Mutex::new(None),
            account_calls: AtomicUsize::new(0),
            last_registration: Mutex::new(None),
            reset_codes: Mutex::new(HashMap::new()),
            passwords: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a token expiring in `expires_in` seconds; `accept` controls
    /// whether protected endpoints honor it
    pub fn issue(&self, expires_in: i64, accept: bool) -> String {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let token = make_token(&json!({
            "sub": "user-1",
            "exp": unix_now() + expires_in,
            "jti": format!("t-{n}"),
            "scope": "orders:read orders:write"
        }));
        if accept {
            self.accepted.lock().unwrap().insert(token.clone());
        }
        token
    }

    pub fn set_refresh_behavior(&self, behavior: RefreshBehavior) {
        *self.refresh_behavior.lock().unwrap() = behavior;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn account_count(&self) -> usize {
        self.account_calls.load(Ordering::SeqCst)
    }

    fn accepts(&self, headers: &HeaderMap) -> bool {
        bearer(headers).is_some_and(|t| self.accepted.lock().unwrap().contains(&t))
    }
}

pub struct MockServer {
    pub base_url: String,
    pub state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> anyhow::Result<Self> {
        init_tracing();
        let state = Arc::new(MockState::new());
        let app = Router::new()
            .route("/login", post(login))
            .route("/auth/refresh", post(refresh))
            .route("/profile", get(profile))
            .route("/logout", post(logout))
            .route("/register", post(register))
            .route("/forgot-password/send-otp", post(send_reset_code))
            .route("/forgot-password/verify-otp", post(verify_reset_code))
            .route("/forgot-password/reset", post(reset_password))
            .route("/api/orders", get(orders).post(create_order))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            base_url: format!("http://{addr}"),
            state,
            handle,
        })
    }

    pub fn config(&self) -> SessionConfig {
        SessionConfig::builder()
            .provider(
                ProviderConfig::builder()
                    .base_url(self.base_url.clone())
                    .timeout(Duration::from_secs(5))
                    .build(),
            )
            .build()
    }

    pub fn memory_store() -> Arc<CredentialStore> {
        Arc::new(CredentialStore::new(MemoryStore::new(), MemoryStore::new()))
    }

    pub fn session(&self, store: Arc<CredentialStore>) -> anyhow::Result<SessionManager> {
        Ok(SessionManager::from_config(&self.config(), store)?)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

pub fn make_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
    format!("{header}.{payload}.signature")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded).ok()?).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "message": message }))).into_response()
}

async fn login(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.login_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_nonce.lock().unwrap() = body["nonce"].as_str().map(str::to_string);

    match basic_credentials(&headers) {
        Some((user, pass)) if user == USERNAME && pass == PASSWORD => {
            let token = state.issue(3600, true);
            Json(json!({
                "data": {
                    "token_type": "Bearer",
                    "access_token": token,
                    "refresh_token": REFRESH_TOKEN,
                    "expires_in": 3600,
                    "user": { "id": "user-1", "username": USERNAME, "name": "Alice" },
                    "company": { "id": 10, "name": "Acme", "segmentId": "retail" }
                }
            }))
            .into_response()
        }
        _ => unauthorized("Invalid credentials"),
    }
}

async fn refresh(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_refresh_token.lock().unwrap() = body["refreshToken"].as_str().map(str::to_string);

    let delay = *state.refresh_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let behavior = *state.refresh_behavior.lock().unwrap();
    match behavior {
        RefreshBehavior::Issue | RefreshBehavior::IssueUnaccepted => {
            let token = state.issue(3600, behavior == RefreshBehavior::Issue);
            Json(json!({ "accessToken": token, "expiresIn": 3600 })).into_response()
        }
        RefreshBehavior::Reject => unauthorized("refresh token revoked"),
        RefreshBehavior::Fail => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "maintenance" })),
        )
            .into_response(),
    }
}

async fn profile(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.profile_calls.fetch_add(1, Ordering::SeqCst);
    if !state.accepts(&headers) {
        return unauthorized("not authenticated");
    }
    Json(json!({
        "user": { "id": "user-1", "username": USERNAME, "email": "alice@example.com" },
        "tenant": { "id": "10", "name": "Acme" }
    }))
    .into_response()
}

async fn logout(State(state): State<Arc<MockState>>) -> StatusCode {
    state.logout_calls.fetch_add(1, Ordering::SeqCst);
    StatusCode::NO_CONTENT
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
}

async fn register(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.account_calls.fetch_add(1, Ordering::SeqCst);
    let otp = headers
        .get("Otp-Security-Code")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    *state.last_registration.lock().unwrap() = Some((body.clone(), otp));

    if body["email"] == TAKEN_EMAIL {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "message": "Email already registered" })),
        )
            .into_response();
    }

    let data = match body["plan"].as_str() {
        Some("paid") => json!({
            "responseType": "paid_membership_checkout",
            "link": "pay.example.com/checkout/1"
        }),
        Some("instant") => json!({
            "responseType": "token",
            "authData": { "authToken": "first-login", "noId": "N-1", "securityCode": "sc" }
        }),
        _ => json!({ "responseType": "member" }),
    };
    Json(json!({ "data": data })).into_response()
}

async fn send_reset_code(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.account_calls.fetch_add(1, Ordering::SeqCst);
    let Some(email) = body["email"].as_str() else {
        return bad_request("email is required");
    };
    state
        .reset_codes
        .lock()
        .unwrap()
        .insert(email.to_string(), RESET_CODE.to_string());
    Json(json!({ "data": { "sent": true } })).into_response()
}

fn code_matches(state: &MockState, body: &Value) -> bool {
    let (Some(email), Some(code)) = (body["email"].as_str(), body["otp"].as_str()) else {
        return false;
    };
    state.reset_codes.lock().unwrap().get(email).map(String::as_str) == Some(code)
}

async fn verify_reset_code(
    State(state): State<Arc<MockState>>,
    Json(body): Json<Value>,
) -> Response {
    state.account_calls.fetch_add(1, Ordering::SeqCst);
    if !code_matches(&state, &body) {
        return bad_request("Invalid or expired code");
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn reset_password(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.account_calls.fetch_add(1, Ordering::SeqCst);
    if !code_matches(&state, &body) {
        return bad_request("Invalid or expired code");
    }
    let email = body["email"].as_str().unwrap_or_default().to_string();
    let password = body["newPassword"].as_str().unwrap_or_default().to_string();
    state.reset_codes.lock().unwrap().remove(&email);
    state.passwords.lock().unwrap().insert(email, password);
    Json(json!({ "data": { "reset": true } })).into_response()
}

async fn orders(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.api_calls.fetch_add(1, Ordering::SeqCst);
    if !state.accepts(&headers) {
        return unauthorized("token expired");
    }
    Json(json!([{ "id": 1 }, { "id": 2 }])).into_response()
}

async fn create_order(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.api_calls.fetch_add(1, Ordering::SeqCst);
    if !state.accepts(&headers) {
        return unauthorized("token expired");
    }
    (StatusCode::CREATED, Json(body)).into_response()
}
