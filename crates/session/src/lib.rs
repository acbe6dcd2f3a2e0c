//! Marketsync session engine.
//!
//! Keeps three copies of "who is logged in" consistent: the identity
//! provider's live state, the persisted backend token, and the in-memory
//! application state published to the UI.
//!
//! # Components
//!
//! - [`store`] - Durable key/value storage and the typed session records on top of it
//! - [`provider`] - The external identity provider seam
//! - [`gateway`] - Outbound backend calls, auth headers, and 401 demotion events
//! - [`merger`] - Guest cart accumulation and the one-time merge at login
//! - [`coordinator`] - The single-flight state machine tying everything together
//! - [`retry`] - Bounded polling used while waiting for provider tokens
//!
//! # Example
//!
//! ```rust,ignore
//! let config = SessionConfig::from_env()?;
//! let store = Arc::new(FileStore::new(&config.store_path));
//! let coordinator = SessionCoordinator::connect(&config, store, provider)?;
//!
//! if !coordinator.validate().await {
//!     coordinator.authenticate(provider_signal).await?;
//! }
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod merger;
pub mod provider;
pub mod retry;
pub mod session;
pub mod state;
pub mod store;
pub mod token;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, SessionConfig};
pub use coordinator::{CoordinatorDeps, SessionCoordinator};
pub use error::{AuthError, MergeError, SessionError};
pub use gateway::{
    BackgroundFetch, Exchanged, GatewayError, HttpGateway, RequestContext, RequestOrigin, SessionBackend,
    UnauthorizedEvent, UnauthorizedHandler,
};
pub use merger::{MergeOutcome, ResourceMerger};
pub use provider::{
    IdentityProvider, ProviderError, ProviderProfile, ProviderSignal, StaticTokenProvider,
};
pub use retry::RetryPolicy;
pub use session::{Credentials, Session, SessionStatus};
pub use state::{ApplicationState, SessionView, SharedState};
pub use store::{FileStore, MemoryStore, PersistedRecord, PersistedStore, StoreError, WriteBatch};
