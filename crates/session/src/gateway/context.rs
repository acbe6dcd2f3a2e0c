//! Per-request metadata consumed by the gateway's error path.

use marketsync_core::Scope;
use uuid::Uuid;

/// Background resource loads that may run without user involvement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackgroundFetch {
    /// User cart.
    Cart,
    /// User wishlist.
    Wishlist,
}

/// Who caused a request.
///
/// Only [`RequestOrigin::UserInitiated`] rejections raise a reconnect prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestOrigin {
    /// A direct user action (checkout, add to cart, admin edit).
    UserInitiated,
    /// A load the engine runs on its own.
    Background(BackgroundFetch),
    /// Credential exchange; a 401 here is a failed login, not an expired
    /// session, and never demotes.
    Handshake,
}

/// Metadata every gateway call must carry.
///
/// There is no `Default`: callers have to say which scope's token to send and
/// whether the user is waiting on the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestContext {
    /// Token namespace to authenticate with.
    pub scope: Scope,
    /// Who caused the request.
    pub origin: RequestOrigin,
}

impl RequestContext {
    /// A request the user is waiting on.
    #[must_use]
    pub const fn user_initiated(scope: Scope) -> Self {
        Self {
            scope,
            origin: RequestOrigin::UserInitiated,
        }
    }

    /// A background load.
    #[must_use]
    pub const fn background(scope: Scope, fetch: BackgroundFetch) -> Self {
        Self {
            scope,
            origin: RequestOrigin::Background(fetch),
        }
    }

    /// A credential exchange.
    #[must_use]
    pub(crate) const fn handshake(scope: Scope) -> Self {
        Self {
            scope,
            origin: RequestOrigin::Handshake,
        }
    }

    /// Whether a rejection of this request should demote the session.
    #[must_use]
    pub const fn demotes_on_unauthorized(&self) -> bool {
        !matches!(self.origin, RequestOrigin::Handshake)
    }
}

/// Emitted once per rejected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnauthorizedEvent {
    /// Scope whose token was rejected.
    pub scope: Scope,
    /// Origin of the rejected request.
    pub origin: RequestOrigin,
    /// Session generation the request was sent under.
    pub generation: u64,
    /// Id of the rejected request.
    pub request_id: Uuid,
}

impl UnauthorizedEvent {
    /// Whether the user should be asked to reconnect.
    #[must_use]
    pub const fn wants_prompt(&self) -> bool {
        matches!(self.origin, RequestOrigin::UserInitiated)
    }
}
