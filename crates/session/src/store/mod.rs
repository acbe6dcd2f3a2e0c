//! Durable key/value storage for session records.
//!
//! The store itself has no business logic: it reads and writes string values
//! under string keys. Typed records ([`PersistedRecord`], the guest cart) are
//! layered on top in [`record`].
//!
//! Every mutation goes through a [`WriteBatch`] so that the members of a
//! record (token, profile, wallet) are written or cleared together.

mod file;
mod memory;
pub mod record;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use record::PersistedRecord;

use async_trait::async_trait;
use marketsync_core::Scope;
use thiserror::Error;

// =============================================================================
// Keys
// =============================================================================

/// User-scope backend token.
pub const USER_TOKEN_KEY: &str = "token";
/// User-scope serialized profile.
pub const USER_PROFILE_KEY: &str = "userInfo";
/// Wallet address reported at user login.
pub const WALLET_ADDRESS_KEY: &str = "walletAddress";
/// Admin-scope backend token.
pub const ADMIN_TOKEN_KEY: &str = "adminToken";
/// Admin-scope serialized profile.
pub const ADMIN_PROFILE_KEY: &str = "adminInfo";
/// Guest (anonymous) cart lines.
pub const GUEST_CART_KEY: &str = "guestCart";

/// Token and profile keys for a scope's namespace.
#[must_use]
pub const fn scope_keys(scope: Scope) -> (&'static str, &'static str) {
    match scope {
        Scope::User => (USER_TOKEN_KEY, USER_PROFILE_KEY),
        Scope::Admin => (ADMIN_TOKEN_KEY, ADMIN_PROFILE_KEY),
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors raised by a [`PersistedStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be (de)serialized.
    #[error("corrupt store contents: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// The backing store refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

// =============================================================================
// Batches
// =============================================================================

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Set `key` to `value`.
    Set { key: String, value: String },
    /// Remove `key` if present.
    Remove { key: String },
}

/// Group of mutations applied atomically by [`PersistedStore::write`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<StoreOp>,
}

impl WriteBatch {
    /// Empty batch.
    #[must_use]
    pub const fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Queue a set.
    #[must_use]
    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.ops.push(StoreOp::Set {
            key: key.to_string(),
            value: value.into(),
        });
        self
    }

    /// Queue a removal.
    #[must_use]
    pub fn remove(mut self, key: &str) -> Self {
        self.ops.push(StoreOp::Remove {
            key: key.to_string(),
        });
        self
    }

    /// Queue a set when `value` is present, a removal otherwise.
    #[must_use]
    pub fn set_or_remove(self, key: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.set(key, value),
            None => self.remove(key),
        }
    }

    /// Queued operations in order.
    #[must_use]
    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Consume the batch.
    #[must_use]
    pub fn into_ops(self) -> Vec<StoreOp> {
        self.ops
    }
}

// =============================================================================
// Trait
// =============================================================================

/// Durable string key/value storage that survives process restarts.
///
/// Implementations must apply a [`WriteBatch`] all-or-nothing: a concurrent
/// `read` sees either none or all of the batch.
#[async_trait]
pub trait PersistedStore: Send + Sync {
    /// Read several keys at once, returning values in the same order.
    async fn read(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError>;

    /// Apply a batch of mutations atomically.
    async fn write(&self, batch: WriteBatch) -> Result<(), StoreError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_builder_preserves_order() {
        let batch = WriteBatch::new()
            .set("a", "1")
            .remove("b")
            .set_or_remove("c", None::<String>)
            .set_or_remove("d", Some("4"));

        assert_eq!(
            batch.ops(),
            &[
                StoreOp::Set {
                    key: "a".into(),
                    value: "1".into()
                },
                StoreOp::Remove { key: "b".into() },
                StoreOp::Remove { key: "c".into() },
                StoreOp::Set {
                    key: "d".into(),
                    value: "4".into()
                },
            ]
        );
    }

    #[test]
    fn test_scope_keys_are_disjoint() {
        let (user_token, user_profile) = scope_keys(Scope::User);
        let (admin_token, admin_profile) = scope_keys(Scope::Admin);
        assert_ne!(user_token, admin_token);
        assert_ne!(user_profile, admin_profile);
    }
}
