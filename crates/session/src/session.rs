//! Session model and lifecycle status.

use std::fmt;

use chrono::{DateTime, Utc};
use marketsync_core::{Profile, WalletAddress};
use secrecy::SecretString;

/// Backend token paired with the profile it was issued for.
///
/// The two only ever exist together, so a token without a profile (or the
/// reverse) cannot be represented.
#[derive(Clone)]
pub struct Credentials {
    /// Token issued by the backend.
    pub backend_token: SecretString,
    /// Profile returned alongside the token.
    pub profile: Profile,
}

impl Credentials {
    /// Pair a token with its profile.
    #[must_use]
    pub fn new(backend_token: impl Into<SecretString>, profile: Profile) -> Self {
        Self {
            backend_token: backend_token.into(),
            profile,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("backend_token", &"[REDACTED]")
            .field("profile", &self.profile)
            .finish()
    }
}

/// In-memory copy of one scope's session.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Token and profile, present only while authenticated.
    pub credentials: Option<Credentials>,
    /// Wallet associated with the session (user scope only).
    pub wallet_address: Option<WalletAddress>,
    /// When the session was created or restored.
    pub established_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Session established now.
    #[must_use]
    pub fn established(credentials: Credentials, wallet_address: Option<WalletAddress>) -> Self {
        Self {
            credentials: Some(credentials),
            wallet_address,
            established_at: Some(Utc::now()),
        }
    }

    /// Whether a backend token is held.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }

    /// Profile of the signed-in account.
    #[must_use]
    pub fn profile(&self) -> Option<&Profile> {
        self.credentials.as_ref().map(|c| &c.profile)
    }

    /// Backend token of the signed-in account.
    #[must_use]
    pub fn backend_token(&self) -> Option<&SecretString> {
        self.credentials.as_ref().map(|c| &c.backend_token)
    }
}

/// Lifecycle state of the user session.
///
/// ```text
/// Unvalidated -> Validating -> ValidFromStorage | NoSession
/// NoSession | AuthFailed -> Authenticating -> Valid | AuthFailed
/// ValidFromStorage | Valid -> LoggedOut
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionStatus {
    /// Boot validation has not started.
    #[default]
    Unvalidated,
    /// Boot validation is reading the store.
    Validating,
    /// Session restored from the store without contacting the provider.
    ValidFromStorage,
    /// No session; waiting for the provider.
    NoSession,
    /// Provider token exchange in progress.
    Authenticating,
    /// Session established by a fresh exchange.
    Valid,
    /// Last authentication attempt failed; retryable.
    AuthFailed,
    /// The user logged out. Provider signals are ignored until `login()`.
    LoggedOut,
}

impl SessionStatus {
    /// Whether the user holds a usable session.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        matches!(self, Self::ValidFromStorage | Self::Valid)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unvalidated => "unvalidated",
            Self::Validating => "validating",
            Self::ValidFromStorage => "valid (restored)",
            Self::NoSession => "no session",
            Self::Authenticating => "authenticating",
            Self::Valid => "valid",
            Self::AuthFailed => "authentication failed",
            Self::LoggedOut => "logged out",
        };
        f.write_str(label)
    }
}
