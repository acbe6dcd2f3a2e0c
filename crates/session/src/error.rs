//! Engine error taxonomy.
//!
//! Every error here is recoverable: the coordinator folds them into explicit
//! state (`AuthFailed`, `last_error`) and leaves the session either at its last
//! known-good value or fully advanced.

use marketsync_core::Role;
use thiserror::Error;

use crate::config::ConfigError;
use crate::gateway::GatewayError;
use crate::provider::ProviderError;
use crate::store::StoreError;

/// Failures while establishing a session.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The provider never produced an access token within the polling budget.
    #[error("identity provider did not return an access token after {attempts} attempts")]
    TokenUnavailable { attempts: u32 },

    /// The backend rejected the provider token (or the admin credentials).
    #[error("backend token exchange failed: {0}")]
    ExchangeFailed(#[source] GatewayError),

    /// A logout or demotion happened while this attempt was in flight;
    /// nothing was written.
    #[error("authentication superseded by a newer session change")]
    Superseded,

    /// Credentials were accepted but the account lacks the required role.
    #[error("account role {0} is not permitted here")]
    Forbidden(Role),

    /// The identity provider failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The session could not be persisted.
    #[error("failed to persist session: {0}")]
    Storage(#[from] StoreError),
}

impl AuthError {
    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Forbidden(_))
    }
}

/// Failures while merging the guest cart into the user cart.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The merge call failed; the guest cart is untouched.
    #[error("guest cart merge failed: {0}")]
    Failed(#[source] GatewayError),

    /// The merge succeeded remotely but local guest state could not be updated.
    #[error("guest cart storage failed: {0}")]
    Storage(#[from] StoreError),
}

/// Any engine error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
