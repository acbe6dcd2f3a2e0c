//! The session state machine.
//!
//! [`SessionCoordinator`] is the only component that changes sessions. It
//! drives boot-time validation, provider-driven authentication, logout, admin
//! sign-in and 401 demotion, and keeps the in-memory session table, the
//! persisted record and the published [`ApplicationState`] in step.
//!
//! # Concurrency
//!
//! - Boot validation runs once per coordinator (`OnceCell`); concurrent
//!   callers await the same pass.
//! - Authentication is single-flight: a second provider signal waits for the
//!   first, then short-circuits on the persisted record.
//! - Every session write is conditioned on the scope's generation, so an
//!   attempt that finishes after a logout or demotion writes nothing.
//! - Logout and demotion hold the session table's write lock while clearing
//!   both the store and memory; readers see both before or both after.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, Weak};

use async_trait::async_trait;
use marketsync_core::{Profile, ResourceId, ResourceSet, Scope, Wishlist};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, OnceCell, watch};
use tracing::{debug, info, instrument, warn};

use crate::config::SessionConfig;
use crate::error::{AuthError, SessionError};
use crate::gateway::{
    BackgroundFetch, GatewayError, HttpGateway, RequestContext, SessionBackend, UnauthorizedEvent,
    UnauthorizedHandler,
};
use crate::merger::ResourceMerger;
use crate::provider::{IdentityProvider, ProviderProfile, ProviderSignal};
use crate::retry::{RetryPolicy, poll_until_some};
use crate::session::{Credentials, Session, SessionStatus};
use crate::state::{ApplicationState, SharedState};
use crate::store::{PersistedRecord, PersistedStore, StoreError};
use crate::token;

/// Collaborators injected into a [`SessionCoordinator`].
pub struct CoordinatorDeps {
    /// Durable storage for session records and the guest cart.
    pub store: Arc<dyn PersistedStore>,
    /// External identity provider.
    pub provider: Arc<dyn IdentityProvider>,
    /// Backend API.
    pub backend: Arc<dyn SessionBackend>,
    /// Polling policy for provider access tokens.
    pub token_poll: RetryPolicy,
}

/// Single-flight session state machine.
///
/// Constructed once per process and shared as `Arc<SessionCoordinator>`.
pub struct SessionCoordinator {
    store: Arc<dyn PersistedStore>,
    provider: Arc<dyn IdentityProvider>,
    backend: Arc<dyn SessionBackend>,
    token_poll: RetryPolicy,
    shared: SharedState,
    merger: ResourceMerger,
    gateway: Option<HttpGateway>,
    /// One-shot boot validation latch.
    validation: OnceCell<bool>,
    /// Held for the duration of a provider authentication.
    auth_flight: Mutex<()>,
    /// Set by `logout()`, cleared by `login()`.
    logged_out: AtomicBool,
    /// User-scope generation whose resources were last loaded.
    bootstrapped: Mutex<Option<u64>>,
    /// Tokens rejected with a 401 whose persisted record could not be
    /// cleared. Never restored.
    revoked: std::sync::Mutex<HashMap<Scope, SecretString>>,
}

impl SessionCoordinator {
    /// Coordinator over explicit collaborators.
    #[must_use]
    pub fn new(deps: CoordinatorDeps, shared: SharedState) -> Arc<Self> {
        Arc::new(Self::build(deps, shared, None))
    }

    /// Coordinator talking to the backend in `config` through an
    /// [`HttpGateway`], subscribed to the gateway's 401 events.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` if the HTTP client cannot be built.
    pub fn connect(
        config: &SessionConfig,
        store: Arc<dyn PersistedStore>,
        provider: Arc<dyn IdentityProvider>,
    ) -> Result<Arc<Self>, GatewayError> {
        let shared = SharedState::new();
        let gateway = HttpGateway::new(config, shared.clone())?;
        let deps = CoordinatorDeps {
            store,
            provider,
            backend: Arc::new(gateway.clone()),
            token_poll: config.token_poll,
        };

        let coordinator = Arc::new(Self::build(deps, shared, Some(gateway.clone())));
        let weak = Arc::downgrade(&coordinator);
        let handler: Weak<dyn UnauthorizedHandler> = weak;
        gateway.subscribe(handler);
        Ok(coordinator)
    }

    fn build(deps: CoordinatorDeps, shared: SharedState, gateway: Option<HttpGateway>) -> Self {
        let merger = ResourceMerger::new(Arc::clone(&deps.store), Arc::clone(&deps.backend));
        Self {
            store: deps.store,
            provider: deps.provider,
            backend: deps.backend,
            token_poll: deps.token_poll,
            shared,
            merger,
            gateway,
            validation: OnceCell::new(),
            auth_flight: Mutex::new(()),
            logged_out: AtomicBool::new(false),
            bootstrapped: Mutex::new(None),
            revoked: std::sync::Mutex::new(HashMap::new()),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Gateway for arbitrary backend calls, when built with [`connect`](Self::connect).
    #[must_use]
    pub const fn gateway(&self) -> Option<&HttpGateway> {
        self.gateway.as_ref()
    }

    /// Guest cart owner.
    #[must_use]
    pub const fn merger(&self) -> &ResourceMerger {
        &self.merger
    }

    /// Receive every published state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ApplicationState> {
        self.shared.subscribe()
    }

    /// Current published state.
    #[must_use]
    pub fn state(&self) -> ApplicationState {
        self.shared.snapshot()
    }

    /// User session lifecycle status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.shared.snapshot().status
    }

    /// Whether a provider token exchange is running.
    #[must_use]
    pub fn is_authenticating(&self) -> bool {
        self.shared.snapshot().is_authenticating
    }

    /// Clone of `scope`'s in-memory session.
    pub async fn session(&self, scope: Scope) -> Session {
        self.shared.session(scope).await.0
    }

    /// Acknowledge a reconnect prompt.
    pub fn dismiss_reconnect_prompt(&self) {
        self.shared.update(|state| state.reconnect_prompt = None);
    }

    // =========================================================================
    // Boot validation
    // =========================================================================

    /// Restore sessions from the store, at most once per coordinator.
    ///
    /// Returns whether a user session is valid. Concurrent callers share the
    /// same pass and result. A restored session triggers the resource
    /// bootstrap just like a fresh login.
    pub async fn validate(&self) -> bool {
        *self.validation.get_or_init(|| self.run_validation()).await
    }

    #[instrument(skip(self))]
    async fn run_validation(&self) -> bool {
        self.set_status(SessionStatus::Validating);

        if let Err(e) = self.restore(Scope::Admin).await {
            warn!(error = %e, "Failed to restore admin session");
        }

        let restored = match self.restore(Scope::User).await {
            Ok(restored) => restored,
            Err(e) => {
                warn!(error = %e, "Failed to restore user session");
                self.record_error(&e);
                false
            }
        };

        if !restored {
            debug!("No stored user session");
            self.set_status(SessionStatus::NoSession);
            return false;
        }

        info!("User session restored from storage");
        self.set_status(SessionStatus::ValidFromStorage);
        self.bootstrap().await;

        // A background 401 during the bootstrap demotes the restored session.
        self.shared.session(Scope::User).await.0.is_authenticated()
    }

    /// Load `scope`'s persisted record into memory. Expired JWTs are cleared.
    async fn restore(&self, scope: Scope) -> Result<bool, StoreError> {
        // Lock before reading so a concurrent logout cannot slip in between.
        let mut table = self.shared.write_sessions().await;
        let Some(record) = PersistedRecord::load(&*self.store, scope).await? else {
            return Ok(false);
        };

        if self.is_revoked(scope, &record.credentials.backend_token) {
            warn!(%scope, "Stored token was rejected earlier; clearing instead of restoring");
            PersistedRecord::clear(&*self.store, scope).await?;
            self.forget_revoked(scope);
            return Ok(false);
        }

        if token::is_expired(record.credentials.backend_token.expose_secret()) {
            info!(%scope, "Stored token expired; clearing");
            PersistedRecord::clear(&*self.store, scope).await?;
            return Ok(false);
        }

        if !table.slot(scope).session.is_authenticated() {
            table.slot_mut(scope).replace(record.into_session());
            self.shared.publish_sessions(&table);
        }
        Ok(true)
    }

    // =========================================================================
    // Provider authentication
    // =========================================================================

    /// React to a provider state change.
    ///
    /// Signals that are not authenticated, or that arrive after `logout()`,
    /// are ignored. Otherwise a persisted session is restored if one exists;
    /// only when none does is the provider polled for a token and the token
    /// exchanged with the backend.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::TokenUnavailable` or `AuthError::ExchangeFailed`
    /// (session unchanged, retryable), `AuthError::Superseded` if a logout or
    /// demotion happened meanwhile, or `AuthError::Storage`.
    #[instrument(skip(self, signal), fields(authenticated = signal.authenticated))]
    pub async fn authenticate(&self, signal: ProviderSignal) -> Result<(), AuthError> {
        if !signal.authenticated {
            debug!("Provider not authenticated; nothing to do");
            return Ok(());
        }
        if self.logged_out.load(Ordering::SeqCst) {
            debug!("Ignoring provider signal after logout");
            return Ok(());
        }

        self.validate().await;
        let _flight = self.auth_flight.lock().await;

        if self.logged_out.load(Ordering::SeqCst) {
            debug!("Logged out while waiting; ignoring provider signal");
            return Ok(());
        }

        if self.restore(Scope::User).await? {
            debug!("Session already present; skipping token exchange");
            if !self.status().is_valid() {
                self.set_status(SessionStatus::ValidFromStorage);
            }
            self.bootstrap().await;
            return Ok(());
        }

        let generation = self.shared.session(Scope::User).await.1;
        let result = {
            let _busy = AuthenticatingGuard::start(&self.shared);
            self.exchange(signal.profile.as_ref(), generation).await
        };

        match result {
            Ok(()) => {
                info!("User session established");
                self.shared.update(|state| {
                    state.status = SessionStatus::Valid;
                    state.last_error = None;
                    state.reconnect_prompt = None;
                });
                self.bootstrap().await;
                Ok(())
            }
            Err(AuthError::Superseded) => {
                info!("Authentication superseded; discarding result");
                Err(AuthError::Superseded)
            }
            Err(e) => {
                warn!(error = %e, "Authentication failed");
                self.shared.update(|state| {
                    state.status = SessionStatus::AuthFailed;
                    state.last_error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    async fn exchange(
        &self,
        hints: Option<&ProviderProfile>,
        generation: u64,
    ) -> Result<(), AuthError> {
        let provider = &self.provider;
        let provider_token: SecretString = poll_until_some(&self.token_poll, |attempt| async move {
            match provider.access_token().await {
                Ok(token) => token,
                Err(e) => {
                    debug!(attempt, error = %e, "Provider token request failed");
                    None
                }
            }
        })
        .await
        .map_err(|e| AuthError::TokenUnavailable {
            attempts: e.attempts,
        })?;

        let exchanged = self
            .backend
            .exchange_token(&provider_token, hints)
            .await
            .map_err(AuthError::ExchangeFailed)?;

        // Provider wallet wins over the one on the backend profile.
        let wallet_address = hints
            .and_then(|h| h.wallet_address.clone())
            .or_else(|| exchanged.profile.wallet_address.clone());
        let session = Session::established(
            Credentials::new(exchanged.token, exchanged.profile),
            wallet_address,
        );

        self.commit(Scope::User, session, generation).await
    }

    /// Persist then install `session`, unless `scope` changed since
    /// `expected_generation` was read.
    async fn commit(
        &self,
        scope: Scope,
        session: Session,
        expected_generation: u64,
    ) -> Result<(), AuthError> {
        let mut table = self.shared.write_sessions().await;
        let stale = table.slot(scope).generation != expected_generation
            || (scope == Scope::User && self.logged_out.load(Ordering::SeqCst));
        if stale {
            return Err(AuthError::Superseded);
        }

        if let Some(record) = PersistedRecord::from_session(&session) {
            record.save(&*self.store, scope).await?;
        }
        self.forget_revoked(scope);
        table.slot_mut(scope).replace(session);
        self.shared.publish_sessions(&table);
        Ok(())
    }

    // =========================================================================
    // Resource bootstrap
    // =========================================================================

    /// Load cart and wishlist for the current user session and merge the
    /// guest cart, once per session generation.
    async fn bootstrap(&self) {
        let mut done = self.bootstrapped.lock().await;
        let (session, generation) = self.shared.session(Scope::User).await;
        if !session.is_authenticated() || *done == Some(generation) {
            return;
        }
        *done = Some(generation);

        let (cart, wishlist) = tokio::join!(
            self.backend
                .fetch_cart(RequestContext::background(Scope::User, BackgroundFetch::Cart)),
            self.backend.fetch_wishlist(RequestContext::background(
                Scope::User,
                BackgroundFetch::Wishlist
            )),
        );

        let wishlist = wishlist
            .inspect_err(|e| warn!(error = %e, "Failed to load wishlist"))
            .ok();

        // Merging needs the server cart; without it the guest cart waits.
        let cart = match cart {
            Ok(cart) => match self.merger.merge_guest(&cart).await {
                Ok(outcome) => Some(outcome.into_cart()),
                Err(e) => {
                    self.record_error(&e);
                    Some(cart)
                }
            },
            Err(e) => {
                warn!(error = %e, "Failed to load cart");
                None
            }
        };

        let table = self.shared.read_sessions().await;
        if table.slot(Scope::User).generation != generation {
            debug!("Session changed during bootstrap; discarding resources");
            return;
        }
        self.shared.update(|state| {
            if let Some(cart) = cart {
                state.cart = cart;
            }
            if let Some(wishlist) = wishlist {
                state.wishlist = wishlist;
            }
        });
    }

    // =========================================================================
    // Logout / login
    // =========================================================================

    /// End the user session: store, memory and provider.
    ///
    /// The store and memory are cleared under the session write lock so no
    /// request observes one without the other. Provider signals are ignored
    /// afterwards until [`login`](Self::login).
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the record cannot be cleared; the
    /// session is then left intact.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<(), AuthError> {
        {
            let mut table = self.shared.write_sessions().await;
            PersistedRecord::clear(&*self.store, Scope::User).await?;
            table.slot_mut(Scope::User).clear();
            self.logged_out.store(true, Ordering::SeqCst);
            self.shared.publish_sessions(&table);
            self.shared.update(|state| {
                state.status = SessionStatus::LoggedOut;
                state.cart = ResourceSet::new();
                state.wishlist = Wishlist::new();
                if state.reconnect_prompt == Some(Scope::User) {
                    state.reconnect_prompt = None;
                }
            });
        }

        if let Err(e) = self.provider.logout().await {
            warn!(error = %e, "Identity provider logout failed");
        }
        info!("User logged out");
        Ok(())
    }

    /// Start a login: clear the logout latch, run the provider's login flow,
    /// and authenticate if the provider reports success.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Provider` if the provider login fails, or any
    /// error from [`authenticate`](Self::authenticate).
    #[instrument(skip(self))]
    pub async fn login(&self) -> Result<(), AuthError> {
        self.logged_out.store(false, Ordering::SeqCst);
        self.shared.update(|state| {
            if state.status == SessionStatus::LoggedOut {
                state.status = SessionStatus::NoSession;
            }
        });

        self.provider.login().await?;

        if self.provider.is_authenticated().await {
            let profile = self.provider.profile().await;
            self.authenticate(ProviderSignal {
                authenticated: true,
                profile,
            })
            .await?;
        }
        Ok(())
    }

    /// Drive [`authenticate`](Self::authenticate) from provider state changes
    /// until the sender is dropped.
    pub async fn listen(self: Arc<Self>, mut signals: watch::Receiver<ProviderSignal>) {
        loop {
            let signal = signals.borrow_and_update().clone();
            if let Err(e) = self.authenticate(signal).await {
                debug!(error = %e, "Provider-driven authentication did not complete");
            }
            if signals.changed().await.is_err() {
                debug!("Provider signal channel closed");
                break;
            }
        }
    }

    // =========================================================================
    // Admin session
    // =========================================================================

    /// Sign in to the admin panel. Stored under the admin namespace only.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::ExchangeFailed` if the backend rejects the
    /// credentials, `AuthError::Forbidden` if the account is not an admin
    /// (nothing is stored), or `AuthError::Storage`.
    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn login_admin(&self, email: &str, password: &SecretString) -> Result<Profile, AuthError> {
        let generation = self.shared.session(Scope::Admin).await.1;
        let exchanged = self
            .backend
            .admin_login(email, password)
            .await
            .map_err(AuthError::ExchangeFailed)?;

        if !exchanged.profile.is_admin() {
            warn!(role = %exchanged.profile.role, "Admin sign-in refused for non-admin account");
            return Err(AuthError::Forbidden(exchanged.profile.role));
        }

        let profile = exchanged.profile.clone();
        let session = Session::established(Credentials::new(exchanged.token, exchanged.profile), None);
        self.commit(Scope::Admin, session, generation).await?;
        self.shared.update(|state| {
            if state.reconnect_prompt == Some(Scope::Admin) {
                state.reconnect_prompt = None;
            }
        });

        info!(admin_id = %profile.id, "Admin session established");
        Ok(profile)
    }

    /// End the admin session; the user session is untouched.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the record cannot be cleared.
    #[instrument(skip(self))]
    pub async fn logout_admin(&self) -> Result<(), AuthError> {
        let mut table = self.shared.write_sessions().await;
        PersistedRecord::clear(&*self.store, Scope::Admin).await?;
        table.slot_mut(Scope::Admin).clear();
        self.shared.publish_sessions(&table);
        info!("Admin logged out");
        Ok(())
    }

    // =========================================================================
    // Demotion
    // =========================================================================

    /// Clear the session named by a 401 event.
    ///
    /// Events from requests sent under an older generation are ignored. Only
    /// user-initiated requests raise the reconnect prompt; background loads
    /// demote silently. Returns whether a session was cleared.
    #[instrument(skip(self), fields(scope = %event.scope, request_id = %event.request_id))]
    pub async fn demote(&self, event: &UnauthorizedEvent) -> bool {
        let mut table = self.shared.write_sessions().await;
        let slot = table.slot(event.scope);
        if slot.generation != event.generation {
            debug!(
                current = slot.generation,
                event = event.generation,
                "Ignoring 401 from a superseded session"
            );
            return false;
        }

        let cleared = slot.session.is_authenticated();
        if cleared {
            let rejected = slot.session.backend_token().cloned();
            if let Err(e) = PersistedRecord::clear(&*self.store, event.scope).await {
                warn!(error = %e, "Failed to clear persisted session during demotion");
                if let Some(token) = rejected {
                    self.mark_revoked(event.scope, token);
                }
            }
            table.slot_mut(event.scope).clear();
            self.shared.publish_sessions(&table);
            warn!("Session demoted after 401");
        }

        let prompt = event.wants_prompt();
        self.shared.update(|state| {
            if prompt {
                state.reconnect_prompt = Some(event.scope);
            }
            if cleared && event.scope == Scope::User {
                state.status = SessionStatus::NoSession;
                state.cart = ResourceSet::new();
                state.wishlist = Wishlist::new();
            }
        });
        cleared
    }

    // =========================================================================
    // Cart
    // =========================================================================

    /// Add to the user cart when signed in, otherwise to the guest cart.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Gateway` for backend failures (a 401 also
    /// demotes and prompts) or `SessionError::Store` for guest storage.
    pub async fn add_to_cart(
        &self,
        resource_id: ResourceId,
        quantity: u32,
    ) -> Result<ResourceSet, SessionError> {
        if !self.session(Scope::User).await.is_authenticated() {
            return Ok(self.merger.add_guest_item(resource_id, quantity).await?);
        }

        let ctx = RequestContext::user_initiated(Scope::User);
        let cart = match self.backend.add_to_cart(ctx, &resource_id, quantity).await? {
            Some(cart) => cart,
            None => self.backend.fetch_cart(ctx).await?,
        };
        let published = cart.clone();
        self.shared.update(|state| state.cart = published);
        Ok(cart)
    }

    /// Current cart: the user's from the backend when signed in, the guest
    /// cart otherwise.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Gateway` or `SessionError::Store`.
    pub async fn cart(&self) -> Result<ResourceSet, SessionError> {
        if !self.session(Scope::User).await.is_authenticated() {
            return Ok(self.merger.guest_cart().await?);
        }

        let cart = self
            .backend
            .fetch_cart(RequestContext::user_initiated(Scope::User))
            .await?;
        let published = cart.clone();
        self.shared.update(|state| state.cart = published);
        Ok(cart)
    }

    /// The user's wishlist; empty when signed out.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Gateway` if the fetch fails.
    pub async fn wishlist(&self) -> Result<Wishlist, SessionError> {
        if !self.session(Scope::User).await.is_authenticated() {
            return Ok(Wishlist::new());
        }

        let wishlist = self
            .backend
            .fetch_wishlist(RequestContext::user_initiated(Scope::User))
            .await?;
        let published = wishlist.clone();
        self.shared.update(|state| state.wishlist = published);
        Ok(wishlist)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn mark_revoked(&self, scope: Scope, token: SecretString) {
        self.revoked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(scope, token);
    }

    fn forget_revoked(&self, scope: Scope) {
        self.revoked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&scope);
    }

    fn is_revoked(&self, scope: Scope, token: &SecretString) -> bool {
        self.revoked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&scope)
            .is_some_and(|r| r.expose_secret() == token.expose_secret())
    }

    fn set_status(&self, status: SessionStatus) {
        self.shared.update(|state| state.status = status);
    }

    fn record_error(&self, error: &dyn std::error::Error) {
        let message = error.to_string();
        self.shared.update(|state| state.last_error = Some(message));
    }
}

#[async_trait]
impl UnauthorizedHandler for SessionCoordinator {
    async fn on_unauthorized(&self, event: UnauthorizedEvent) {
        self.demote(&event).await;
    }
}

/// Publishes `is_authenticating` for the lifetime of an exchange.
struct AuthenticatingGuard<'a> {
    shared: &'a SharedState,
}

impl<'a> AuthenticatingGuard<'a> {
    fn start(shared: &'a SharedState) -> Self {
        shared.update(|state| {
            state.is_authenticating = true;
            state.status = SessionStatus::Authenticating;
        });
        Self { shared }
    }
}

impl Drop for AuthenticatingGuard<'_> {
    fn drop(&mut self) {
        self.shared.update(|state| state.is_authenticating = false);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use marketsync_core::Role;
    use uuid::Uuid;

    use super::*;
    use crate::gateway::RequestOrigin;
    use crate::store::{
        ADMIN_TOKEN_KEY, GUEST_CART_KEY, MemoryStore, USER_TOKEN_KEY, WALLET_ADDRESS_KEY,
        WriteBatch,
    };
    use crate::testing::{FakeBackend, FakeProvider, WriteFailingStore, cart, profile};

    struct Harness {
        coordinator: Arc<SessionCoordinator>,
        store: MemoryStore,
        backend: Arc<FakeBackend>,
        provider: Arc<FakeProvider>,
    }

    fn harness_with(store: MemoryStore, backend: FakeBackend, provider: FakeProvider) -> Harness {
        let backend = Arc::new(backend);
        let provider = Arc::new(provider);
        let coordinator = SessionCoordinator::new(
            CoordinatorDeps {
                store: Arc::new(store.clone()),
                provider: Arc::clone(&provider) as Arc<dyn IdentityProvider>,
                backend: Arc::clone(&backend) as Arc<dyn SessionBackend>,
                token_poll: RetryPolicy::new(15, Duration::from_millis(300)),
            },
            SharedState::new(),
        );
        Harness {
            coordinator,
            store,
            backend,
            provider,
        }
    }

    fn harness() -> Harness {
        harness_with(MemoryStore::new(), FakeBackend::default(), FakeProvider::ready())
    }

    async fn seed_user(store: &MemoryStore, token: &str) {
        PersistedRecord {
            credentials: Credentials::new(token.to_string(), profile("u1", Role::User)),
            wallet_address: None,
        }
        .save(store, Scope::User)
        .await
        .unwrap();
    }

    fn signal() -> ProviderSignal {
        ProviderSignal::authenticated(ProviderProfile::default())
    }

    async fn event(h: &Harness, scope: Scope, origin: RequestOrigin) -> UnauthorizedEvent {
        UnauthorizedEvent {
            scope,
            origin,
            generation: h.coordinator.shared.session(scope).await.1,
            request_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_concurrent_validate_restores_once() {
        let store = MemoryStore::new();
        seed_user(&store, "stored-token").await;
        let h = harness_with(store, FakeBackend::default(), FakeProvider::ready());

        let (a, b) = tokio::join!(h.coordinator.validate(), h.coordinator.validate());

        assert!(a && b);
        assert_eq!(h.backend.bootstraps(), 1);
        assert_eq!(h.backend.wishlist_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(h.coordinator.status(), SessionStatus::ValidFromStorage);
        assert_eq!(h.provider.polls.load(Ordering::SeqCst), 0);
        assert!(h.coordinator.validate().await);
        assert_eq!(h.backend.bootstraps(), 1);
    }

    #[tokio::test]
    async fn test_validate_without_record() {
        let h = harness();
        assert!(!h.coordinator.validate().await);
        assert_eq!(h.coordinator.status(), SessionStatus::NoSession);
        assert_eq!(h.backend.bootstraps(), 0);
    }

    #[tokio::test]
    async fn test_expired_jwt_is_not_restored() {
        let store = MemoryStore::new();
        let expired = format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#),
            URL_SAFE_NO_PAD.encode(r#"{"exp":1000}"#)
        );
        seed_user(&store, &expired).await;
        let h = harness_with(store, FakeBackend::default(), FakeProvider::ready());

        assert!(!h.coordinator.validate().await);
        assert!(!h.store.contains(USER_TOKEN_KEY));
        assert!(!h.coordinator.session(Scope::User).await.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_signal_exchanges_once() {
        let h = harness_with(
            MemoryStore::new(),
            FakeBackend::with_exchange_delay(Duration::from_millis(50)),
            FakeProvider::ready(),
        );

        let (a, b) = tokio::join!(
            h.coordinator.authenticate(signal()),
            h.coordinator.authenticate(signal())
        );

        a.unwrap();
        b.unwrap();
        assert_eq!(h.backend.exchange_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.backend.bootstraps(), 1);
        assert_eq!(h.coordinator.status(), SessionStatus::Valid);
        assert!(h.store.contains(USER_TOKEN_KEY));
        assert!(!h.coordinator.is_authenticating());
    }

    #[tokio::test]
    async fn test_authenticate_short_circuits_on_persisted_record() {
        let store = MemoryStore::new();
        seed_user(&store, "stored-token").await;
        let h = harness_with(store, FakeBackend::default(), FakeProvider::ready());

        h.coordinator.authenticate(signal()).await.unwrap();

        assert_eq!(h.provider.polls.load(Ordering::SeqCst), 0);
        assert_eq!(h.backend.exchange_calls.load(Ordering::SeqCst), 0);
        assert!(h.coordinator.session(Scope::User).await.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_polling_is_bounded() {
        let h = harness_with(MemoryStore::new(), FakeBackend::default(), FakeProvider::never_ready());
        let started = tokio::time::Instant::now();

        let err = h.coordinator.authenticate(signal()).await.unwrap_err();

        assert!(matches!(err, AuthError::TokenUnavailable { attempts: 15 }));
        assert!(started.elapsed() <= RetryPolicy::new(15, Duration::from_millis(300)).budget());
        assert_eq!(h.provider.polls.load(Ordering::SeqCst), 15);
        assert_eq!(h.provider.logouts.load(Ordering::SeqCst), 0);
        assert_eq!(h.coordinator.status(), SessionStatus::AuthFailed);
        assert!(!h.coordinator.is_authenticating());
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_arrives_after_a_few_polls() {
        let h = harness_with(
            MemoryStore::new(),
            FakeBackend::default(),
            FakeProvider::token_from(Some(4)),
        );
        h.coordinator.authenticate(signal()).await.unwrap();
        assert_eq!(h.provider.polls.load(Ordering::SeqCst), 4);
        assert_eq!(h.coordinator.status(), SessionStatus::Valid);
    }

    #[tokio::test]
    async fn test_exchange_failure_leaves_session_and_allows_retry() {
        let h = harness();
        h.backend.fail_exchange.store(true, Ordering::SeqCst);

        let err = h.coordinator.authenticate(signal()).await.unwrap_err();
        assert!(matches!(err, AuthError::ExchangeFailed(_)));
        assert!(!h.store.contains(USER_TOKEN_KEY));
        assert_eq!(h.provider.logouts.load(Ordering::SeqCst), 0);
        assert!(h.coordinator.state().last_error.is_some());

        h.backend.fail_exchange.store(false, Ordering::SeqCst);
        h.coordinator.authenticate(signal()).await.unwrap();
        assert_eq!(h.coordinator.status(), SessionStatus::Valid);
        assert!(h.coordinator.state().last_error.is_none());
    }

    #[tokio::test]
    async fn test_provider_wallet_wins() {
        let h = harness();
        h.backend.user_profile.lock().unwrap().wallet_address = Some(
            marketsync_core::WalletAddress::parse("0x00000000000000000000000000000000000000bb")
                .unwrap(),
        );
        let provider_wallet =
            marketsync_core::WalletAddress::parse("0x00000000000000000000000000000000000000aa")
                .unwrap();

        h.coordinator
            .authenticate(ProviderSignal::authenticated(ProviderProfile {
                wallet_address: Some(provider_wallet.clone()),
                ..ProviderProfile::default()
            }))
            .await
            .unwrap();

        assert_eq!(
            h.coordinator.session(Scope::User).await.wallet_address,
            Some(provider_wallet.clone())
        );
        assert_eq!(
            h.store.get(WALLET_ADDRESS_KEY).as_deref(),
            Some(provider_wallet.as_str())
        );
    }

    #[tokio::test]
    async fn test_login_merges_guest_cart() {
        let h = harness();
        *h.backend.cart.lock().unwrap() = cart(&[("A", 1), ("C", 3)]);
        h.coordinator
            .add_to_cart(ResourceId::from("A"), 2)
            .await
            .unwrap();
        h.coordinator
            .add_to_cart(ResourceId::from("B"), 1)
            .await
            .unwrap();

        h.coordinator.authenticate(signal()).await.unwrap();

        assert_eq!(
            h.coordinator.state().cart,
            cart(&[("A", 3), ("B", 1), ("C", 3)])
        );
        assert!(!h.store.contains(GUEST_CART_KEY));
        assert_eq!(h.backend.merge_requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_merge_is_retried_on_next_login() {
        let h = harness();
        h.coordinator
            .add_to_cart(ResourceId::from("A"), 2)
            .await
            .unwrap();
        h.backend.fail_merge.store(true, Ordering::SeqCst);

        h.coordinator.authenticate(signal()).await.unwrap();
        assert!(h.store.contains(GUEST_CART_KEY));
        assert!(h.coordinator.state().last_error.is_some());

        h.coordinator.logout().await.unwrap();
        h.backend.fail_merge.store(false, Ordering::SeqCst);
        h.coordinator.login().await.unwrap();
        assert_eq!(h.provider.logins.load(Ordering::SeqCst), 1);

        let requests = h.backend.merge_requests.lock().unwrap().clone();
        assert_eq!(requests, vec![cart(&[("A", 2)]), cart(&[("A", 2)])]);
        assert!(!h.store.contains(GUEST_CART_KEY));
        assert_eq!(h.coordinator.state().cart, cart(&[("A", 2)]));
    }

    #[tokio::test]
    async fn test_logout_clears_everything_and_latches() {
        let h = harness();
        h.coordinator.authenticate(signal()).await.unwrap();

        h.coordinator.logout().await.unwrap();

        assert!(!h.store.contains(USER_TOKEN_KEY));
        assert!(!h.coordinator.session(Scope::User).await.is_authenticated());
        assert_eq!(h.provider.logouts.load(Ordering::SeqCst), 1);
        assert_eq!(h.coordinator.status(), SessionStatus::LoggedOut);
        assert!(h.coordinator.state().user.is_none());

        // A late provider event must not resurrect the session.
        h.coordinator.authenticate(signal()).await.unwrap();
        assert_eq!(h.backend.exchange_calls.load(Ordering::SeqCst), 1);
        assert!(!h.coordinator.session(Scope::User).await.is_authenticated());
    }

    #[tokio::test]
    async fn test_logout_is_atomic_to_concurrent_readers() {
        let h = harness();
        h.coordinator.authenticate(signal()).await.unwrap();

        let shared = h.coordinator.shared.clone();
        let store = h.store.clone();
        let reader = tokio::spawn(async move {
            for _ in 0..50 {
                let table = shared.read_sessions().await;
                let in_memory = table.slot(Scope::User).session.is_authenticated();
                let persisted = PersistedRecord::load(&store, Scope::User)
                    .await
                    .unwrap()
                    .is_some();
                drop(table);
                assert_eq!(in_memory, persisted);
                tokio::task::yield_now().await;
            }
        });

        tokio::task::yield_now().await;
        h.coordinator.logout().await.unwrap();
        reader.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_during_exchange_supersedes() {
        let h = harness_with(
            MemoryStore::new(),
            FakeBackend::with_exchange_delay(Duration::from_millis(100)),
            FakeProvider::ready(),
        );

        let coordinator = Arc::clone(&h.coordinator);
        let auth = tokio::spawn(async move { coordinator.authenticate(signal()).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.coordinator.logout().await.unwrap();

        let result = auth.await.unwrap();
        assert!(matches!(result, Err(AuthError::Superseded)));
        assert!(!h.store.contains(USER_TOKEN_KEY));
        assert_eq!(h.coordinator.status(), SessionStatus::LoggedOut);
    }

    #[tokio::test]
    async fn test_admin_demotion_leaves_user_session() {
        let h = harness();
        h.coordinator.authenticate(signal()).await.unwrap();
        h.coordinator
            .login_admin("ops@example.com", &SecretString::from("pw"))
            .await
            .unwrap();

        let ev = event(&h, Scope::Admin, RequestOrigin::UserInitiated).await;
        assert!(h.coordinator.demote(&ev).await);

        assert!(!h.store.contains(ADMIN_TOKEN_KEY));
        assert!(h.store.contains(USER_TOKEN_KEY));
        assert!(h.coordinator.session(Scope::User).await.is_authenticated());
        assert!(!h.coordinator.session(Scope::Admin).await.is_authenticated());
        assert_eq!(h.coordinator.state().reconnect_prompt, Some(Scope::Admin));
        assert_eq!(h.coordinator.status(), SessionStatus::Valid);
    }

    #[tokio::test]
    async fn test_rejected_token_is_not_restored_when_clear_fails() {
        let store = WriteFailingStore::default();
        let backend = Arc::new(FakeBackend::default());
        let coordinator = SessionCoordinator::new(
            CoordinatorDeps {
                store: Arc::new(store.clone()),
                provider: Arc::new(FakeProvider::ready()),
                backend: Arc::clone(&backend) as Arc<dyn SessionBackend>,
                token_poll: RetryPolicy::new(15, Duration::from_millis(300)),
            },
            SharedState::new(),
        );
        coordinator.authenticate(signal()).await.unwrap();
        assert_eq!(backend.exchange_calls.load(Ordering::SeqCst), 1);

        store.fail_writes.store(true, Ordering::SeqCst);
        let ev = UnauthorizedEvent {
            scope: Scope::User,
            origin: RequestOrigin::UserInitiated,
            generation: coordinator.shared.session(Scope::User).await.1,
            request_id: Uuid::new_v4(),
        };
        assert!(coordinator.demote(&ev).await);
        assert!(store.inner.contains(USER_TOKEN_KEY));
        assert!(!coordinator.session(Scope::User).await.is_authenticated());

        // Still unwritable: the stale record is neither trusted nor exchanged over.
        let err = coordinator.authenticate(signal()).await.unwrap_err();
        assert!(matches!(err, AuthError::Storage(_)));
        assert!(!coordinator.session(Scope::User).await.is_authenticated());
        assert_eq!(backend.exchange_calls.load(Ordering::SeqCst), 1);

        store.fail_writes.store(false, Ordering::SeqCst);
        coordinator.authenticate(signal()).await.unwrap();

        assert_eq!(backend.exchange_calls.load(Ordering::SeqCst), 2);
        assert!(coordinator.session(Scope::User).await.is_authenticated());
        assert!(store.inner.contains(USER_TOKEN_KEY));
        assert_eq!(coordinator.status(), SessionStatus::Valid);
    }

    #[tokio::test]
    async fn test_background_401_demotes_silently() {
        let h = harness();
        h.coordinator.authenticate(signal()).await.unwrap();

        let ev = event(
            &h,
            Scope::User,
            RequestOrigin::Background(BackgroundFetch::Wishlist),
        )
        .await;
        assert!(h.coordinator.demote(&ev).await);

        assert!(!h.store.contains(USER_TOKEN_KEY));
        assert!(h.coordinator.state().reconnect_prompt.is_none());
        assert_eq!(h.coordinator.status(), SessionStatus::NoSession);
    }

    #[tokio::test]
    async fn test_user_initiated_401_prompts() {
        let h = harness();
        h.coordinator.authenticate(signal()).await.unwrap();

        let ev = event(&h, Scope::User, RequestOrigin::UserInitiated).await;
        assert!(h.coordinator.demote(&ev).await);
        assert_eq!(h.coordinator.state().reconnect_prompt, Some(Scope::User));

        h.coordinator.dismiss_reconnect_prompt();
        assert!(h.coordinator.state().reconnect_prompt.is_none());
    }

    #[tokio::test]
    async fn test_stale_401_does_not_clear_newer_session() {
        let h = harness();
        h.coordinator.authenticate(signal()).await.unwrap();
        let stale = event(&h, Scope::User, RequestOrigin::UserInitiated).await;

        // Session replaced: logout and log back in.
        h.coordinator.logout().await.unwrap();
        h.coordinator.login().await.unwrap();

        assert!(!h.coordinator.demote(&stale).await);
        assert!(h.coordinator.session(Scope::User).await.is_authenticated());
        assert!(h.coordinator.state().reconnect_prompt.is_none());
    }

    #[tokio::test]
    async fn test_repeated_event_is_handled_once() {
        let h = harness();
        h.coordinator.authenticate(signal()).await.unwrap();

        let ev = event(&h, Scope::User, RequestOrigin::UserInitiated).await;
        assert!(h.coordinator.demote(&ev).await);
        assert!(!h.coordinator.demote(&ev).await);
    }

    #[tokio::test]
    async fn test_admin_login_requires_admin_role() {
        let h = harness();
        *h.backend.admin_profile.lock().unwrap() = profile("v1", Role::Vendor);

        let err = h
            .coordinator
            .login_admin("vendor@example.com", &SecretString::from("pw"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Forbidden(Role::Vendor)));
        assert!(!h.store.contains(ADMIN_TOKEN_KEY));
        assert!(h.coordinator.state().admin.is_none());
    }

    #[tokio::test]
    async fn test_admin_logout_keeps_user() {
        let h = harness();
        h.coordinator.authenticate(signal()).await.unwrap();
        h.coordinator
            .login_admin("ops@example.com", &SecretString::from("pw"))
            .await
            .unwrap();

        h.coordinator.logout_admin().await.unwrap();

        assert!(!h.store.contains(ADMIN_TOKEN_KEY));
        assert!(h.store.contains(USER_TOKEN_KEY));
        assert!(h.coordinator.state().user.is_some());
    }

    #[tokio::test]
    async fn test_validate_restores_admin_independently() {
        let store = MemoryStore::new();
        PersistedRecord {
            credentials: Credentials::new("admin-token".to_string(), profile("a1", Role::Admin)),
            wallet_address: None,
        }
        .save(&store, Scope::Admin)
        .await
        .unwrap();
        let h = harness_with(store, FakeBackend::default(), FakeProvider::ready());

        assert!(!h.coordinator.validate().await);
        assert!(h.coordinator.session(Scope::Admin).await.is_authenticated());
        assert!(h.coordinator.state().admin.is_some());
    }

    #[tokio::test]
    async fn test_signed_in_cart_goes_to_backend() {
        let h = harness();
        h.coordinator.authenticate(signal()).await.unwrap();

        let cart_after = h
            .coordinator
            .add_to_cart(ResourceId::from("A"), 1)
            .await
            .unwrap();

        assert_eq!(cart_after, cart(&[("A", 1)]));
        assert_eq!(h.backend.cart_adds.lock().unwrap().len(), 1);
        assert!(!h.store.contains(GUEST_CART_KEY));
        assert_eq!(h.coordinator.state().cart, cart(&[("A", 1)]));
    }

    #[tokio::test]
    async fn test_listen_drives_authentication() {
        let h = harness();
        let (tx, rx) = watch::channel(ProviderSignal::signed_out());
        let listener = tokio::spawn(Arc::clone(&h.coordinator).listen(rx));

        let mut states = h.coordinator.subscribe();
        tx.send(signal()).unwrap();
        states
            .wait_for(|state| state.status == SessionStatus::Valid)
            .await
            .unwrap();

        drop(tx);
        listener.await.unwrap();
        assert_eq!(h.backend.exchange_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unrelated_store_keys_survive_logout() {
        let h = harness();
        h.store
            .write(WriteBatch::new().set("theme", "dark"))
            .await
            .unwrap();
        h.coordinator.authenticate(signal()).await.unwrap();
        h.coordinator.logout().await.unwrap();
        assert!(h.store.contains("theme"));
    }
}
