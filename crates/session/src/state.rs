//! In-memory session table and the application state published to the UI.
//!
//! Two things live here:
//!
//! - the [`SessionTable`], the authoritative in-memory copy of both scopes'
//!   sessions, behind an async `RwLock`. The gateway reads it per request; the
//!   coordinator holds the write lock across "clear store, clear memory" so no
//!   reader can observe one cleared and the other not.
//! - the [`ApplicationState`], a UI-facing snapshot broadcast over a `watch`
//!   channel. It never carries tokens.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use marketsync_core::{Profile, ResourceSet, Scope, WalletAddress, Wishlist};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, watch};

use crate::session::{Session, SessionStatus};

// =============================================================================
// Session table
// =============================================================================

/// One scope's session plus a counter bumped on every change.
#[derive(Debug, Default)]
pub struct ScopeSlot {
    /// Current session.
    pub session: Session,
    /// Incremented whenever `session` is replaced or cleared.
    pub generation: u64,
}

impl ScopeSlot {
    /// Install a new session, returning the new generation.
    pub fn replace(&mut self, session: Session) -> u64 {
        self.session = session;
        self.generation += 1;
        self.generation
    }

    /// Drop the session, returning the new generation.
    pub fn clear(&mut self) -> u64 {
        self.replace(Session::default())
    }
}

/// Sessions of both scopes.
#[derive(Debug, Default)]
pub struct SessionTable {
    user: ScopeSlot,
    admin: ScopeSlot,
}

impl SessionTable {
    /// Slot for `scope`.
    #[must_use]
    pub const fn slot(&self, scope: Scope) -> &ScopeSlot {
        match scope {
            Scope::User => &self.user,
            Scope::Admin => &self.admin,
        }
    }

    /// Mutable slot for `scope`.
    pub const fn slot_mut(&mut self, scope: Scope) -> &mut ScopeSlot {
        match scope {
            Scope::User => &mut self.user,
            Scope::Admin => &mut self.admin,
        }
    }
}

// =============================================================================
// Published state
// =============================================================================

/// Token-free view of a session for UI consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    /// Signed-in profile.
    pub profile: Profile,
    /// Wallet bound to the session.
    pub wallet_address: Option<WalletAddress>,
    /// When the session was established.
    pub established_at: Option<DateTime<Utc>>,
}

impl SessionView {
    fn of(session: &Session) -> Option<Self> {
        session.profile().map(|profile| Self {
            profile: profile.clone(),
            wallet_address: session.wallet_address.clone(),
            established_at: session.established_at,
        })
    }
}

/// Snapshot published to UI consumers on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationState {
    /// User session lifecycle.
    pub status: SessionStatus,
    /// Storefront session.
    pub user: Option<SessionView>,
    /// Admin-panel session.
    pub admin: Option<SessionView>,
    /// A provider token exchange is running.
    pub is_authenticating: bool,
    /// User cart as last loaded from (or merged into) the backend.
    pub cart: ResourceSet,
    /// User wishlist as last loaded from the backend.
    pub wishlist: Wishlist,
    /// Set when a user-initiated request was rejected and the user should
    /// reconnect the given scope.
    pub reconnect_prompt: Option<Scope>,
    /// Display currency suggested by the backend.
    pub display_currency: Option<String>,
    /// Last recoverable error, for display.
    pub last_error: Option<String>,
}

impl ApplicationState {
    /// View of `scope`'s session.
    #[must_use]
    pub const fn view(&self, scope: Scope) -> Option<&SessionView> {
        match scope {
            Scope::User => self.user.as_ref(),
            Scope::Admin => self.admin.as_ref(),
        }
    }
}

// =============================================================================
// Shared handle
// =============================================================================

/// Handle shared by the gateway and the coordinator.
#[derive(Clone)]
pub struct SharedState {
    sessions: Arc<RwLock<SessionTable>>,
    published: Arc<watch::Sender<ApplicationState>>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    /// Fresh state: no sessions, status `Unvalidated`.
    #[must_use]
    pub fn new() -> Self {
        let (published, _) = watch::channel(ApplicationState::default());
        Self {
            sessions: Arc::new(RwLock::new(SessionTable::default())),
            published: Arc::new(published),
        }
    }

    /// Receive every published [`ApplicationState`].
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ApplicationState> {
        self.published.subscribe()
    }

    /// Current published state.
    #[must_use]
    pub fn snapshot(&self) -> ApplicationState {
        self.published.borrow().clone()
    }

    /// Modify and publish the application state.
    pub fn update(&self, f: impl FnOnce(&mut ApplicationState)) {
        self.published.send_modify(f);
    }

    /// Read access to the session table.
    pub async fn read_sessions(&self) -> RwLockReadGuard<'_, SessionTable> {
        self.sessions.read().await
    }

    /// Write access to the session table.
    pub async fn write_sessions(&self) -> RwLockWriteGuard<'_, SessionTable> {
        self.sessions.write().await
    }

    /// Clone of `scope`'s session and its generation.
    pub async fn session(&self, scope: Scope) -> (Session, u64) {
        let table = self.sessions.read().await;
        let slot = table.slot(scope);
        (slot.session.clone(), slot.generation)
    }

    /// Republish session views from `table`.
    pub fn publish_sessions(&self, table: &SessionTable) {
        let user = SessionView::of(&table.slot(Scope::User).session);
        let admin = SessionView::of(&table.slot(Scope::Admin).session);
        self.update(|state| {
            state.user = user;
            state.admin = admin;
        });
    }

    /// Record the display currency suggested by the backend.
    pub fn set_display_currency(&self, currency: &str) {
        self.published.send_if_modified(|state| {
            if state.display_currency.as_deref() == Some(currency) {
                false
            } else {
                state.display_currency = Some(currency.to_string());
                true
            }
        });
    }
}
