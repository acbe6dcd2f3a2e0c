//! Outbound backend calls.
//!
//! # Architecture
//!
//! - Every call carries a [`RequestContext`] naming the token scope and the
//!   request's origin
//! - Auth and identity headers are taken from the in-memory session table,
//!   which mirrors the persisted record after every transition
//! - A `401` emits one [`UnauthorizedEvent`] to subscribed handlers, then the
//!   rejection is returned to the caller unchanged
//! - `X-User-Currency` on a successful response updates the published display
//!   currency

mod api;
mod context;

pub use api::{Exchanged, SessionBackend};
pub use context::{BackgroundFetch, RequestContext, RequestOrigin, UnauthorizedEvent};

use std::sync::{Arc, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use marketsync_core::Scope;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::session::Session;
use crate::state::SharedState;

/// Header carrying the raw backend token alongside `Authorization`.
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";
/// Header carrying the user's wallet address.
pub const WALLET_ADDRESS_HEADER: &str = "x-wallet-address";
/// Header carrying the profile email.
pub const USER_EMAIL_HEADER: &str = "x-user-email";
/// Header carrying the profile display name.
pub const USER_NAME_HEADER: &str = "x-user-name";
/// Header carrying the profile id.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Response header suggesting a display currency.
pub const USER_CURRENCY_HEADER: &str = "x-user-currency";
/// Per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Errors returned by backend calls.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend rejected the scope's token.
    #[error("unauthorized ({scope} session)")]
    Unauthorized { scope: Scope },

    /// Any other non-success status.
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body did not match the expected shape.
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// A body was required but the response was empty.
    #[error("empty response body")]
    EmptyBody,

    /// The endpoint path could not be joined onto the base URL.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Receives demotion events from the gateway.
#[async_trait]
pub trait UnauthorizedHandler: Send + Sync {
    /// Called once for every request rejected with `401`.
    async fn on_unauthorized(&self, event: UnauthorizedEvent);
}

/// Backend HTTP client shared by the whole engine.
#[derive(Clone)]
pub struct HttpGateway {
    inner: Arc<HttpGatewayInner>,
}

struct HttpGatewayInner {
    client: reqwest::Client,
    base_url: Url,
    shared: SharedState,
    handlers: RwLock<Vec<Weak<dyn UnauthorizedHandler>>>,
}

impl HttpGateway {
    /// Create a gateway against `config.api_base_url`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Http` if the HTTP client cannot be built.
    pub fn new(config: &SessionConfig, shared: SharedState) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(HttpGatewayInner {
                client,
                base_url: config.api_base_url.clone(),
                shared,
                handlers: RwLock::new(Vec::new()),
            }),
        })
    }

    /// Base URL requests are resolved against.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// State handle this gateway reads sessions from.
    #[must_use]
    pub fn shared(&self) -> &SharedState {
        &self.inner.shared
    }

    /// Register a demotion handler. Dropped handlers are pruned lazily.
    pub fn subscribe(&self, handler: Weak<dyn UnauthorizedHandler>) {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Send a request and decode a JSON body if one is returned.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Unauthorized` on `401` (after notifying
    /// handlers), `GatewayError::Status` on other failures, and transport or
    /// decode errors otherwise.
    pub async fn send_json<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        ctx: RequestContext,
    ) -> Result<Option<T>, GatewayError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let request_id = Uuid::new_v4();
        self.dispatch(method, path, body, ctx, request_id).await
    }

    #[instrument(
        skip_all,
        fields(method = %method, path = %path, scope = %ctx.scope, origin = ?ctx.origin, request_id = %request_id)
    )]
    async fn dispatch<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        ctx: RequestContext,
        request_id: Uuid,
    ) -> Result<Option<T>, GatewayError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.inner.base_url.join(path.trim_start_matches('/'))?;

        // Snapshot under the read lock: a concurrent demotion either happened
        // before (we send nothing stale) or bumps the generation after.
        let (session, generation) = self.inner.shared.session(ctx.scope).await;

        let mut request = self
            .inner
            .client
            .request(method, url)
            .header(REQUEST_ID_HEADER, request_id.to_string());
        if ctx.demotes_on_unauthorized() {
            request = request.headers(identity_headers(&session, ctx.scope));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            warn!(generation, "Backend rejected session token");
            if ctx.demotes_on_unauthorized() {
                self.emit(UnauthorizedEvent {
                    scope: ctx.scope,
                    origin: ctx.origin,
                    generation,
                    request_id,
                })
                .await;
            }
            return Err(GatewayError::Unauthorized { scope: ctx.scope });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GatewayError::Status {
                status: status.as_u16(),
                message,
            });
        }

        if let Some(currency) = response
            .headers()
            .get(USER_CURRENCY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            self.inner.shared.set_display_currency(currency);
        }

        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            debug!(status = status.as_u16(), "Empty response body");
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn emit(&self, event: UnauthorizedEvent) {
        let handlers: Vec<Arc<dyn UnauthorizedHandler>> = {
            let mut list = self
                .inner
                .handlers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            list.retain(|h| h.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };

        for handler in handlers {
            handler.on_unauthorized(event.clone()).await;
        }
    }
}

/// Auth and identity headers for `session` in `scope`.
///
/// Anonymous sessions produce no headers. Values that are not valid header
/// text (e.g. a name with a newline) are skipped rather than failing the call.
#[must_use]
pub fn identity_headers(session: &Session, scope: Scope) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let Some(credentials) = session.credentials.as_ref() else {
        return headers;
    };

    let token = credentials.backend_token.expose_secret();
    if let Ok(mut value) = HeaderValue::from_str(&format!("Bearer {token}")) {
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }
    insert_header(&mut headers, AUTH_TOKEN_HEADER, Some(token), true);

    let profile = &credentials.profile;
    insert_header(
        &mut headers,
        USER_EMAIL_HEADER,
        profile.email.as_ref().map(|e| e.as_str()),
        false,
    );
    insert_header(&mut headers, USER_NAME_HEADER, profile.name.as_deref(), false);
    insert_header(&mut headers, USER_ID_HEADER, Some(profile.id.as_str()), false);

    if scope == Scope::User {
        let wallet = session
            .wallet_address
            .as_ref()
            .or(profile.wallet_address.as_ref());
        insert_header(
            &mut headers,
            WALLET_ADDRESS_HEADER,
            wallet.map(|w| w.as_str()),
            false,
        );
    }

    headers
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: Option<&str>, sensitive: bool) {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return;
    };
    match HeaderValue::from_str(value) {
        Ok(mut value) => {
            value.set_sensitive(sensitive);
            headers.insert(HeaderName::from_static(name), value);
        }
        Err(_) => debug!(header = name, "Skipping header with invalid value"),
    }
}
