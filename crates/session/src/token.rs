//! Backend token inspection.
//!
//! Backend tokens are treated as opaque, but when one happens to be a JWT we
//! peek at its `exp` claim so a stale stored token is dropped at boot instead
//! of being restored and immediately rejected with a 401.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Seconds before `exp` at which a token is already considered expired.
pub const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Deserialize)]
struct Claims {
    exp: Option<i64>,
}

/// Expiry timestamp of a JWT, if `token` is one and carries `exp`.
#[must_use]
pub fn jwt_expiry(token: &str) -> Option<i64> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice::<Claims>(&bytes).ok()?.exp
}

/// Whether `token` is a JWT that expired (or expires within the skew) at `now`.
///
/// Opaque tokens are never considered expired.
#[must_use]
pub fn is_expired_at(token: &str, now: DateTime<Utc>) -> bool {
    jwt_expiry(token).is_some_and(|exp| now.timestamp() >= exp.saturating_sub(EXPIRY_SKEW_SECS))
}

/// [`is_expired_at`] against the current time.
#[must_use]
pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now())
}
