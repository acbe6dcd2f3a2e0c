//! Typed records stored on top of a [`PersistedStore`].

use marketsync_core::{Profile, ResourceSet, Scope, WalletAddress};
use secrecy::ExposeSecret;
use tracing::warn;

use super::{
    GUEST_CART_KEY, PersistedStore, StoreError, WALLET_ADDRESS_KEY, WriteBatch, scope_keys,
};
use crate::session::{Credentials, Session};

/// Durable mirror of a scope's [`Session`].
///
/// The token, profile and (for the user scope) wallet address are read,
/// written and cleared as one batch.
#[derive(Debug, Clone)]
pub struct PersistedRecord {
    /// Token/profile pair.
    pub credentials: Credentials,
    /// Wallet address recorded at login.
    pub wallet_address: Option<WalletAddress>,
}

impl PersistedRecord {
    /// Record mirroring an authenticated session, `None` for an anonymous one.
    #[must_use]
    pub fn from_session(session: &Session) -> Option<Self> {
        session.credentials.as_ref().map(|credentials| Self {
            credentials: credentials.clone(),
            wallet_address: session.wallet_address.clone(),
        })
    }

    /// Session restored from this record.
    #[must_use]
    pub fn into_session(self) -> Session {
        Session::established(self.credentials, self.wallet_address)
    }

    /// Load the record for `scope`.
    ///
    /// A half-written pair (token without profile or the reverse) or a profile
    /// that no longer deserializes is reported as absent.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store itself cannot be read.
    pub async fn load(store: &dyn PersistedStore, scope: Scope) -> Result<Option<Self>, StoreError> {
        let (token_key, profile_key) = scope_keys(scope);
        let mut values = store
            .read(&[token_key, profile_key, WALLET_ADDRESS_KEY])
            .await?
            .into_iter();
        let token = values.next().flatten();
        let profile = values.next().flatten();
        let wallet = values.next().flatten();

        let (token, profile_json) = match (token, profile) {
            (Some(token), Some(profile)) if !token.is_empty() => (token, profile),
            (None, None) => return Ok(None),
            _ => {
                warn!(%scope, "Ignoring incomplete persisted session");
                return Ok(None);
            }
        };

        let profile: Profile = match serde_json::from_str(&profile_json) {
            Ok(profile) => profile,
            Err(e) => {
                warn!(%scope, error = %e, "Ignoring persisted session with unreadable profile");
                return Ok(None);
            }
        };

        let wallet_address = match scope {
            Scope::User => wallet.and_then(|w| WalletAddress::parse(&w).ok()),
            Scope::Admin => None,
        };

        Ok(Some(Self {
            credentials: Credentials::new(token, profile),
            wallet_address,
        }))
    }

    /// Write this record under `scope` as one batch.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the profile cannot be serialized or the store
    /// rejects the write.
    pub async fn save(&self, store: &dyn PersistedStore, scope: Scope) -> Result<(), StoreError> {
        let (token_key, profile_key) = scope_keys(scope);
        let profile_json = serde_json::to_string(&self.credentials.profile)?;

        let mut batch = WriteBatch::new()
            .set(token_key, self.credentials.backend_token.expose_secret())
            .set(profile_key, profile_json);
        if scope == Scope::User {
            batch = batch.set_or_remove(
                WALLET_ADDRESS_KEY,
                self.wallet_address.as_ref().map(WalletAddress::as_str),
            );
        }
        store.write(batch).await
    }

    /// Remove every key of `scope`'s record in one batch.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store rejects the write.
    pub async fn clear(store: &dyn PersistedStore, scope: Scope) -> Result<(), StoreError> {
        let (token_key, profile_key) = scope_keys(scope);
        let mut batch = WriteBatch::new().remove(token_key).remove(profile_key);
        if scope == Scope::User {
            batch = batch.remove(WALLET_ADDRESS_KEY);
        }
        store.write(batch).await
    }
}

// =============================================================================
// Guest cart
// =============================================================================

/// Load the guest cart; absent or unreadable contents read as empty.
///
/// # Errors
///
/// Returns `StoreError` if the store itself cannot be read.
pub async fn load_guest_cart(store: &dyn PersistedStore) -> Result<ResourceSet, StoreError> {
    let raw = store.read(&[GUEST_CART_KEY]).await?.into_iter().next().flatten();
    let Some(raw) = raw else {
        return Ok(ResourceSet::new());
    };

    Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!(error = %e, "Ignoring unreadable guest cart");
        ResourceSet::new()
    }))
}

/// Persist the guest cart; an empty cart removes the key.
///
/// # Errors
///
/// Returns `StoreError` if serialization or the write fails.
pub async fn save_guest_cart(
    store: &dyn PersistedStore,
    cart: &ResourceSet,
) -> Result<(), StoreError> {
    let batch = if cart.is_empty() {
        WriteBatch::new().remove(GUEST_CART_KEY)
    } else {
        WriteBatch::new().set(GUEST_CART_KEY, serde_json::to_string(cart)?)
    };
    store.write(batch).await
}

/// Drop the guest cart.
///
/// # Errors
///
/// Returns `StoreError` if the write fails.
pub async fn clear_guest_cart(store: &dyn PersistedStore) -> Result<(), StoreError> {
    store.write(WriteBatch::new().remove(GUEST_CART_KEY)).await
}
