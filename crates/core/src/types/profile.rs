//! Backend user profile.

use serde::{Deserialize, Deserializer, Serialize};

use super::{Email, ProfileId, Role, WalletAddress};

/// Profile returned by the backend at token exchange and persisted alongside
/// the backend token.
///
/// Field names follow the backend's camelCase wire format; the backend's
/// `_id` is accepted as an alias for `id`. Contact fields are optional because
/// wallet-only accounts may have no email or name; malformed values from the
/// wire are dropped rather than failing the whole profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Backend profile id.
    #[serde(alias = "_id")]
    pub id: ProfileId,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Contact email.
    #[serde(default, deserialize_with = "lenient")]
    pub email: Option<Email>,
    /// Wallet the backend associates with this profile.
    #[serde(default, deserialize_with = "lenient")]
    pub wallet_address: Option<WalletAddress>,
    /// Authorization role.
    #[serde(default)]
    pub role: Role,
}

impl Profile {
    /// Boolean authorization check against a required role.
    #[must_use]
    pub const fn can_access(&self, required: Role) -> bool {
        self.role.permits(required)
    }

    /// Whether this profile may use the admin panel.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}

/// Deserialize an optional validated value, mapping empty or invalid strings to `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<String>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .filter(|s| !s.trim().is_empty())
        .and_then(|s| T::try_from(s).ok()))
}
