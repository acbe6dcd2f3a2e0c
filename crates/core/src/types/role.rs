//! Roles and session scopes.

use serde::{Deserialize, Serialize};

/// Error returned when a role string is not one of the known roles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid role: {0}")]
pub struct RoleParseError(pub String);

/// Role attached to a backend profile.
///
/// Roles form a closed set and are ordered by privilege: an admin can do
/// everything a vendor can, and a vendor everything a user can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Storefront shopper.
    #[default]
    User,
    /// Seller managing their own listings.
    Vendor,
    /// Operator with access to the admin panel.
    Admin,
}

impl Role {
    const fn rank(self) -> u8 {
        match self {
            Self::User => 0,
            Self::Vendor => 1,
            Self::Admin => 2,
        }
    }

    /// Whether a holder of this role may access something that requires `required`.
    #[must_use]
    pub const fn permits(self, required: Self) -> bool {
        self.rank() >= required.rank()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Vendor => write!(f, "vendor"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "vendor" => Ok(Self::Vendor),
            "admin" => Ok(Self::Admin),
            other => Err(RoleParseError(other.to_string())),
        }
    }
}

/// Independent session namespace.
///
/// A storefront (user) session and an admin-panel session can coexist; a
/// failure in one never touches the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Storefront session established through the identity provider.
    User,
    /// Admin-panel session established with admin credentials.
    Admin,
}

impl Scope {
    /// Both scopes, in a stable order.
    pub const ALL: [Self; 2] = [Self::User, Self::Admin];
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Admin => write!(f, "admin"),
        }
    }
}
