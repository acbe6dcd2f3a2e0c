//! The external identity provider seam.
//!
//! The provider (wallet connector or social login) authenticates the end user
//! independently of the backend. Every call is asynchronous and may be slow;
//! the engine never assumes otherwise.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use marketsync_core::{Email, WalletAddress};
use secrecy::SecretString;
use thiserror::Error;

/// Errors reported by an [`IdentityProvider`].
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider could not be reached.
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the request.
    #[error("identity provider rejected request: {0}")]
    Rejected(String),
}

/// Profile-like data the provider knows about the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderProfile {
    /// Email, for social logins.
    pub email: Option<Email>,
    /// Display name.
    pub name: Option<String>,
    /// Connected wallet, for wallet logins.
    pub wallet_address: Option<WalletAddress>,
}

/// Provider state change delivered to the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderSignal {
    /// Whether the provider considers the user authenticated.
    pub authenticated: bool,
    /// Provider-side profile, when authenticated.
    pub profile: Option<ProviderProfile>,
}

impl ProviderSignal {
    /// Signal for an authenticated user.
    #[must_use]
    pub const fn authenticated(profile: ProviderProfile) -> Self {
        Self {
            authenticated: true,
            profile: Some(profile),
        }
    }

    /// Signal for a signed-out provider.
    #[must_use]
    pub const fn signed_out() -> Self {
        Self {
            authenticated: false,
            profile: None,
        }
    }
}

/// Third-party identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Whether the provider currently considers the user authenticated.
    async fn is_authenticated(&self) -> bool;

    /// Provider-side profile of the current user.
    async fn profile(&self) -> Option<ProviderProfile>;

    /// Access token to exchange with the backend.
    ///
    /// `Ok(None)` means "not ready yet"; callers poll.
    async fn access_token(&self) -> Result<Option<SecretString>, ProviderError>;

    /// Start the provider's login flow.
    async fn login(&self) -> Result<(), ProviderError>;

    /// End the provider session.
    async fn logout(&self) -> Result<(), ProviderError>;
}

/// Provider that hands out a pre-obtained access token.
///
/// Used by the CLI, where the provider login happened elsewhere and the user
/// pastes the resulting token.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    inner: Arc<Mutex<StaticTokenState>>,
}

#[derive(Debug)]
struct StaticTokenState {
    token: Option<SecretString>,
    profile: ProviderProfile,
}

impl StaticTokenProvider {
    /// Provider holding `token` for the user described by `profile`.
    #[must_use]
    pub fn new(token: Option<SecretString>, profile: ProviderProfile) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StaticTokenState { token, profile })),
        }
    }

    /// Provider with no token (signed out).
    #[must_use]
    pub fn signed_out() -> Self {
        Self::new(None, ProviderProfile::default())
    }

    /// Signal describing the provider's current state.
    #[must_use]
    pub fn signal(&self) -> ProviderSignal {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if state.token.is_some() {
            ProviderSignal::authenticated(state.profile.clone())
        } else {
            ProviderSignal::signed_out()
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenProvider {
    async fn is_authenticated(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .token
            .is_some()
    }

    async fn profile(&self) -> Option<ProviderProfile> {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.token.is_some().then(|| state.profile.clone())
    }

    async fn access_token(&self) -> Result<Option<SecretString>, ProviderError> {
        Ok(self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .token
            .clone())
    }

    async fn login(&self) -> Result<(), ProviderError> {
        if self.is_authenticated().await {
            Ok(())
        } else {
            Err(ProviderError::Rejected(
                "no provider token configured".to_string(),
            ))
        }
    }

    async fn logout(&self) -> Result<(), ProviderError> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .token = None;
        Ok(())
    }
}
