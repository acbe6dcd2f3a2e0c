//! In-process fakes for unit tests.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use marketsync_core::{Profile, ProfileId, ResourceId, ResourceSet, Role, Wishlist};
use secrecy::SecretString;

use crate::gateway::{Exchanged, GatewayError, RequestContext, SessionBackend};
use crate::provider::{IdentityProvider, ProviderError, ProviderProfile};
use crate::store::{MemoryStore, PersistedStore, StoreError, WriteBatch};

pub fn profile(id: &str, role: Role) -> Profile {
    Profile {
        id: ProfileId::new(id),
        name: Some("Ada".into()),
        email: None,
        wallet_address: None,
        role,
    }
}

pub fn cart(pairs: &[(&str, u32)]) -> ResourceSet {
    pairs
        .iter()
        .map(|(id, q)| (ResourceId::from(*id), *q))
        .collect()
}

// =============================================================================
// Store
// =============================================================================

/// [`MemoryStore`] whose writes fail while `fail_writes` is set.
#[derive(Clone, Default)]
pub struct WriteFailingStore {
    pub inner: MemoryStore,
    pub fail_writes: Arc<AtomicBool>,
}

#[async_trait]
impl PersistedStore for WriteFailingStore {
    async fn read(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        self.inner.read(keys).await
    }

    async fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk full".into()));
        }
        self.inner.write(batch).await
    }
}

// =============================================================================
// Backend
// =============================================================================

/// Scriptable backend that records every call.
pub struct FakeBackend {
    pub exchange_delay: Duration,
    pub exchange_calls: AtomicUsize,
    pub fail_exchange: AtomicBool,
    pub user_profile: Mutex<Profile>,
    pub admin_profile: Mutex<Profile>,
    pub token: Mutex<String>,
    pub cart: Mutex<ResourceSet>,
    pub wishlist: Mutex<Wishlist>,
    pub cart_fetches: AtomicUsize,
    pub wishlist_fetches: AtomicUsize,
    pub fail_merge: AtomicBool,
    pub merge_requests: Mutex<Vec<ResourceSet>>,
    pub cart_adds: Mutex<Vec<(ResourceId, u32)>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            exchange_delay: Duration::ZERO,
            exchange_calls: AtomicUsize::new(0),
            fail_exchange: AtomicBool::new(false),
            user_profile: Mutex::new(profile("u1", Role::User)),
            admin_profile: Mutex::new(profile("a1", Role::Admin)),
            token: Mutex::new("backend-token".to_string()),
            cart: Mutex::new(ResourceSet::new()),
            wishlist: Mutex::new(Wishlist::new()),
            cart_fetches: AtomicUsize::new(0),
            wishlist_fetches: AtomicUsize::new(0),
            fail_merge: AtomicBool::new(false),
            merge_requests: Mutex::new(Vec::new()),
            cart_adds: Mutex::new(Vec::new()),
        }
    }
}

impl FakeBackend {
    pub fn with_exchange_delay(delay: Duration) -> Self {
        Self {
            exchange_delay: delay,
            ..Self::default()
        }
    }

    pub fn bootstraps(&self) -> usize {
        self.cart_fetches.load(Ordering::SeqCst)
    }

    fn issue(&self, profile: Profile) -> Exchanged {
        Exchanged {
            token: SecretString::from(self.token.lock().unwrap().clone()),
            profile,
        }
    }
}

#[async_trait]
impl SessionBackend for FakeBackend {
    async fn exchange_token(
        &self,
        _provider_token: &SecretString,
        _hints: Option<&ProviderProfile>,
    ) -> Result<Exchanged, GatewayError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        if !self.exchange_delay.is_zero() {
            tokio::time::sleep(self.exchange_delay).await;
        }
        if self.fail_exchange.load(Ordering::SeqCst) {
            return Err(GatewayError::Status {
                status: 400,
                message: "invalid provider token".to_string(),
            });
        }
        Ok(self.issue(self.user_profile.lock().unwrap().clone()))
    }

    async fn admin_login(
        &self,
        _email: &str,
        _password: &SecretString,
    ) -> Result<Exchanged, GatewayError> {
        Ok(self.issue(self.admin_profile.lock().unwrap().clone()))
    }

    async fn fetch_cart(&self, _ctx: RequestContext) -> Result<ResourceSet, GatewayError> {
        self.cart_fetches.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(self.cart.lock().unwrap().clone())
    }

    async fn fetch_wishlist(&self, _ctx: RequestContext) -> Result<Wishlist, GatewayError> {
        self.wishlist_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.wishlist.lock().unwrap().clone())
    }

    async fn merge_guest_cart(
        &self,
        _ctx: RequestContext,
        guest: &ResourceSet,
    ) -> Result<Option<ResourceSet>, GatewayError> {
        self.merge_requests.lock().unwrap().push(guest.clone());
        if self.fail_merge.load(Ordering::SeqCst) {
            return Err(GatewayError::Status {
                status: 503,
                message: "merge unavailable".to_string(),
            });
        }
        let mut cart = self.cart.lock().unwrap();
        cart.merge_sum(guest);
        Ok(Some(cart.clone()))
    }

    async fn add_to_cart(
        &self,
        _ctx: RequestContext,
        resource_id: &ResourceId,
        quantity: u32,
    ) -> Result<Option<ResourceSet>, GatewayError> {
        self.cart_adds
            .lock()
            .unwrap()
            .push((resource_id.clone(), quantity));
        let mut cart = self.cart.lock().unwrap();
        cart.add(resource_id.clone(), quantity);
        Ok(Some(cart.clone()))
    }
}

// =============================================================================
// Provider
// =============================================================================

/// Provider whose token becomes available after a number of polls.
pub struct FakeProvider {
    /// Poll number (1-based) from which a token is returned; `None` never.
    pub token_from_poll: Option<u32>,
    pub polls: AtomicU32,
    pub logins: AtomicUsize,
    pub logouts: AtomicUsize,
    pub authenticated: AtomicBool,
}

impl FakeProvider {
    pub fn ready() -> Self {
        Self::token_from(Some(1))
    }

    pub fn never_ready() -> Self {
        Self::token_from(None)
    }

    pub fn token_from(poll: Option<u32>) -> Self {
        Self {
            token_from_poll: poll,
            polls: AtomicU32::new(0),
            logins: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
            authenticated: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn profile(&self) -> Option<ProviderProfile> {
        Some(ProviderProfile::default())
    }

    async fn access_token(&self) -> Result<Option<SecretString>, ProviderError> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(self
            .token_from_poll
            .filter(|&from| n >= from)
            .map(|_| SecretString::from("provider-token")))
    }

    async fn login(&self) -> Result<(), ProviderError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        self.authenticated.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn logout(&self) -> Result<(), ProviderError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        self.authenticated.store(false, Ordering::SeqCst);
        Ok(())
    }
}
