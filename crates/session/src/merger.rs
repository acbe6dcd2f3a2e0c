//! Guest cart accumulation and the one-time merge at login.

use std::sync::Arc;

use marketsync_core::{ResourceId, ResourceSet, Scope};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::error::MergeError;
use crate::gateway::{BackgroundFetch, RequestContext, SessionBackend};
use crate::store::record::{clear_guest_cart, load_guest_cart, save_guest_cart};
use crate::store::{PersistedStore, StoreError};

/// Result of [`ResourceMerger::merge_guest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The guest cart was empty; the user cart is unchanged.
    NothingToMerge(ResourceSet),
    /// Guest lines were merged and the guest cart discarded.
    Merged {
        /// The user cart after the merge.
        cart: ResourceSet,
        /// Number of guest lines merged.
        merged_lines: usize,
    },
}

impl MergeOutcome {
    /// The resulting user cart.
    #[must_use]
    pub const fn cart(&self) -> &ResourceSet {
        match self {
            Self::NothingToMerge(cart) | Self::Merged { cart, .. } => cart,
        }
    }

    /// Consume the outcome, returning the user cart.
    #[must_use]
    pub fn into_cart(self) -> ResourceSet {
        match self {
            Self::NothingToMerge(cart) | Self::Merged { cart, .. } => cart,
        }
    }
}

/// Owns the guest cart and reconciles it with the user cart at login.
///
/// A single lock covers both guest mutations and the merge, so an item added
/// while the merge call is in flight is not lost when the guest cart is
/// discarded.
pub struct ResourceMerger {
    store: Arc<dyn PersistedStore>,
    backend: Arc<dyn SessionBackend>,
    lock: Mutex<()>,
}

impl ResourceMerger {
    #[must_use]
    pub fn new(store: Arc<dyn PersistedStore>, backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            store,
            backend,
            lock: Mutex::new(()),
        }
    }

    /// Current guest cart.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read.
    pub async fn guest_cart(&self) -> Result<ResourceSet, StoreError> {
        let _guard = self.lock.lock().await;
        load_guest_cart(&*self.store).await
    }

    /// Add units to the guest cart, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the cart cannot be read or written.
    pub async fn add_guest_item(
        &self,
        resource_id: ResourceId,
        quantity: u32,
    ) -> Result<ResourceSet, StoreError> {
        let _guard = self.lock.lock().await;
        let mut cart = load_guest_cart(&*self.store).await?;
        cart.add(resource_id, quantity);
        save_guest_cart(&*self.store, &cart).await?;
        Ok(cart)
    }

    /// Remove a line from the guest cart.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the cart cannot be read or written.
    pub async fn remove_guest_item(&self, resource_id: &ResourceId) -> Result<ResourceSet, StoreError> {
        let _guard = self.lock.lock().await;
        let mut cart = load_guest_cart(&*self.store).await?;
        if cart.remove(resource_id).is_some() {
            save_guest_cart(&*self.store, &cart).await?;
        }
        Ok(cart)
    }

    /// Union the guest cart into `user_cart`, summing quantities.
    ///
    /// The backend persists the merged cart; if it does not echo the result
    /// the local union is returned. The guest cart is discarded only after the
    /// backend accepted the merge.
    ///
    /// # Errors
    ///
    /// Returns `MergeError::Failed` if the merge call fails (the guest cart is
    /// kept for the next login), or `MergeError::Storage` if local storage
    /// fails.
    #[instrument(skip_all, fields(user_lines = user_cart.len()))]
    pub async fn merge_guest(&self, user_cart: &ResourceSet) -> Result<MergeOutcome, MergeError> {
        let _guard = self.lock.lock().await;

        let guest = load_guest_cart(&*self.store).await?;
        if guest.is_empty() {
            return Ok(MergeOutcome::NothingToMerge(user_cart.clone()));
        }

        let ctx = RequestContext::background(Scope::User, BackgroundFetch::Cart);
        let remote = match self.backend.merge_guest_cart(ctx, &guest).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(error = %e, guest_lines = guest.len(), "Guest cart merge failed; keeping guest cart");
                return Err(MergeError::Failed(e));
            }
        };

        let cart = remote.unwrap_or_else(|| user_cart.merged(&guest));
        clear_guest_cart(&*self.store).await?;

        info!(merged_lines = guest.len(), "Guest cart merged");
        Ok(MergeOutcome::Merged {
            cart,
            merged_lines: guest.len(),
        })
    }
}
