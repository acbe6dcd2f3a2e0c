//! Integration tests for Marketsync.
//!
//! Tests drive a real `SessionCoordinator` over HTTP against [`StubBackend`],
//! an in-process axum server that issues opaque tokens, keeps one
//! server-side cart, and records every request it receives.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p marketsync-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `session_flow` - Login, restore, logout and guest merge
//! - `unauthorized` - 401 demotion by scope and request origin
//! - `gateway_headers` - Identity headers and display currency

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use marketsync_core::{LineItem, ResourceSet, WalletAddress, Wishlist};
use marketsync_session::{ProviderProfile, RetryPolicy, SessionConfig, StaticTokenProvider};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

/// Path prefix the stub serves under, to exercise base-URL joining.
pub const API_PREFIX: &str = "/api";

/// Password the stub accepts for admin sign-in.
pub const ADMIN_PASSWORD: &str = "correct horse";

/// Wallet reported by [`signed_in_provider`].
pub const PROVIDER_WALLET: &str = "0x00000000000000000000000000000000000000aa";

/// One request as the stub received it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    /// Path with [`API_PREFIX`] stripped.
    pub path: String,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

impl RecordedRequest {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

#[derive(Debug)]
struct StubInner {
    requests: Vec<RecordedRequest>,
    user: Value,
    admin: Value,
    cart: ResourceSet,
    wishlist: Wishlist,
    issued: HashSet<String>,
    revoked: HashSet<String>,
    currency: Option<String>,
    exchange_delay: Duration,
    next_token: u32,
}

impl Default for StubInner {
    fn default() -> Self {
        Self {
            requests: Vec::new(),
            user: json!({
                "_id": "u-1",
                "name": "Ada Lovelace",
                "email": "ada@example.com",
                "role": "user"
            }),
            admin: json!({
                "_id": "a-1",
                "name": "Ops",
                "email": "ops@example.com",
                "role": "admin"
            }),
            cart: ResourceSet::new(),
            wishlist: Wishlist::new(),
            issued: HashSet::new(),
            revoked: HashSet::new(),
            currency: None,
            exchange_delay: Duration::ZERO,
            next_token: 0,
        }
    }
}

#[derive(Deserialize)]
struct Items {
    items: ResourceSet,
}

impl StubInner {
    fn issue(&mut self, prefix: &str) -> String {
        self.next_token += 1;
        let token = format!("{prefix}-token-{}", self.next_token);
        self.issued.insert(token.clone());
        token
    }

    fn authorized(&self, path: &str, headers: &HeaderMap) -> bool {
        let Some(token) = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
        else {
            return false;
        };

        let admin_path = path.starts_with("/admin/");
        self.issued.contains(token)
            && !self.revoked.contains(token)
            && token.starts_with("admin-") == admin_path
    }

    fn route(&mut self, method: &Method, path: &str, headers: &HeaderMap, body: Option<Value>) -> (StatusCode, Option<Value>) {
        let provider_token = body
            .as_ref()
            .and_then(|b| b.get("providerToken"))
            .and_then(Value::as_str);
        let password = body
            .as_ref()
            .and_then(|b| b.get("password"))
            .and_then(Value::as_str);

        match (method.as_str(), path) {
            ("POST", "/auth/exchange") => {
                if provider_token.is_none_or(str::is_empty) {
                    return bad_request("providerToken required");
                }
                let token = self.issue("user");
                (StatusCode::OK, Some(json!({"token": token, "user": self.user})))
            }
            ("POST", "/admin/auth/login") => {
                if password != Some(ADMIN_PASSWORD) {
                    return (
                        StatusCode::UNAUTHORIZED,
                        Some(json!({"message": "Invalid credentials"})),
                    );
                }
                let token = self.issue("admin");
                (StatusCode::OK, Some(json!({"token": token, "user": self.admin})))
            }
            ("GET", "/catalog") => (StatusCode::OK, Some(json!({"products": []}))),
            _ if !self.authorized(path, headers) => (
                StatusCode::UNAUTHORIZED,
                Some(json!({"message": "Token expired"})),
            ),
            ("GET", "/cart") => (StatusCode::OK, Some(json!({"items": self.cart}))),
            ("POST", "/cart") => {
                let Some(line) = body.and_then(|b| serde_json::from_value::<LineItem>(b).ok()) else {
                    return bad_request("productId and quantity required");
                };
                self.cart.add(line.resource_id, line.quantity);
                (StatusCode::OK, Some(json!({"items": self.cart})))
            }
            ("POST", "/cart/merge-guest") => {
                let Some(guest) = body.and_then(|b| serde_json::from_value::<Items>(b).ok()) else {
                    return bad_request("items required");
                };
                self.cart.merge_sum(&guest.items);
                (StatusCode::OK, Some(json!({"items": self.cart})))
            }
            ("GET", "/wishlist") => (StatusCode::OK, Some(json!({"items": self.wishlist}))),
            ("POST", "/checkout") => (StatusCode::NO_CONTENT, None),
            ("GET", "/admin/orders") => (StatusCode::OK, Some(json!({"orders": []}))),
            _ => (StatusCode::NOT_FOUND, Some(json!({"message": "Not found"}))),
        }
    }
}

fn bad_request(message: &str) -> (StatusCode, Option<Value>) {
    (StatusCode::BAD_REQUEST, Some(json!({"message": message})))
}

type SharedStub = Arc<Mutex<StubInner>>;

fn lock(state: &SharedStub) -> MutexGuard<'_, StubInner> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn handle(
    State(state): State<SharedStub>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri
        .path()
        .strip_prefix(API_PREFIX)
        .unwrap_or_else(|| uri.path())
        .to_string();
    let body: Option<Value> = serde_json::from_slice(&body).ok();

    let delay = {
        let mut inner = lock(&state);
        inner.requests.push(RecordedRequest {
            method: method.clone(),
            path: path.clone(),
            headers: headers
                .iter()
                .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
                .collect(),
            body: body.clone(),
        });
        inner.exchange_delay
    };
    if path == "/auth/exchange" && !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mut inner = lock(&state);
    let (status, payload) = inner.route(&method, &path, &headers, body);
    let mut response = match payload {
        Some(payload) => (status, axum::Json(payload)).into_response(),
        None => status.into_response(),
    };

    if status.is_success()
        && let Some(currency) = inner.currency.as_deref()
        && let Ok(value) = HeaderValue::from_str(currency)
    {
        response.headers_mut().insert("x-user-currency", value);
    }
    response
}

/// In-process backend bound to an ephemeral localhost port.
#[derive(Clone)]
pub struct StubBackend {
    addr: SocketAddr,
    state: SharedStub,
}

impl StubBackend {
    /// Bind and serve in the background for the rest of the test.
    ///
    /// # Panics
    ///
    /// Panics if no local port can be bound.
    pub async fn start() -> Self {
        let state: SharedStub = Arc::new(Mutex::new(StubInner::default()));
        let app = Router::new().fallback(handle).with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub backend");
        let addr = listener.local_addr().expect("stub backend address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self { addr, state }
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}{API_PREFIX}", self.addr)
    }

    /// Engine configuration for this backend with a short token poll.
    ///
    /// # Panics
    ///
    /// Panics if the base URL is rejected.
    #[must_use]
    pub fn config(&self) -> SessionConfig {
        let mut config = SessionConfig::for_base_url(&self.base_url()).expect("stub base url");
        config.token_poll = RetryPolicy::new(3, Duration::from_millis(10));
        config
    }

    pub fn set_user_profile(&self, profile: Value) {
        lock(&self.state).user = profile;
    }

    pub fn set_admin_profile(&self, profile: Value) {
        lock(&self.state).admin = profile;
    }

    pub fn set_cart(&self, cart: ResourceSet) {
        lock(&self.state).cart = cart;
    }

    pub fn set_wishlist(&self, wishlist: Wishlist) {
        lock(&self.state).wishlist = wishlist;
    }

    /// Attach `X-User-Currency` to every successful response.
    pub fn set_currency(&self, currency: &str) {
        lock(&self.state).currency = Some(currency.to_string());
    }

    /// Hold token exchange responses for `delay`.
    pub fn set_exchange_delay(&self, delay: Duration) {
        lock(&self.state).exchange_delay = delay;
    }

    /// Reject every token issued so far whose value starts with `prefix`
    /// (`"user"` or `"admin"`).
    pub fn revoke(&self, prefix: &str) {
        let mut inner = lock(&self.state);
        let revoked: Vec<String> = inner
            .issued
            .iter()
            .filter(|t| t.starts_with(prefix))
            .cloned()
            .collect();
        inner.revoked.extend(revoked);
    }

    #[must_use]
    pub fn cart(&self) -> ResourceSet {
        lock(&self.state).cart.clone()
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state).requests.clone()
    }

    /// Requests received for `method` and `path`, oldest first.
    #[must_use]
    pub fn requests_to(&self, method: &Method, path: &str) -> Vec<RecordedRequest> {
        lock(&self.state)
            .requests
            .iter()
            .filter(|r| r.method == *method && r.path == path)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn exchange_count(&self) -> usize {
        self.requests_to(&Method::POST, "/auth/exchange").len()
    }
}

/// Provider holding a token for a user with [`PROVIDER_WALLET`].
///
/// # Panics
///
/// Panics if [`PROVIDER_WALLET`] does not parse.
#[must_use]
pub fn signed_in_provider() -> StaticTokenProvider {
    let profile = ProviderProfile {
        email: None,
        name: None,
        wallet_address: Some(WalletAddress::parse(PROVIDER_WALLET).expect("provider wallet")),
    };
    StaticTokenProvider::new(Some("provider-token".to_string().into()), profile)
}

/// Fresh store file location under the system temp dir.
#[must_use]
pub fn temp_store_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("marketsync-it-{}", Uuid::new_v4()))
        .join("session.json")
}
