//! User session commands.
//!
//! # Usage
//!
//! ```bash
//! msync status
//! msync login --provider-token "$TOKEN" --wallet 0xabc...
//! msync logout
//! ```
//!
//! # Environment Variables
//!
//! - `MARKETSYNC_PROVIDER_TOKEN` - Provider access token (instead of `--provider-token`)
//! - `MARKETSYNC_WALLET_ADDRESS` - Wallet address (instead of `--wallet`)

use marketsync_core::Scope;
use marketsync_session::{ApplicationState, SessionCoordinator};

use super::CommandError;

/// Print the session state after boot validation.
pub async fn status(coordinator: &SessionCoordinator) {
    coordinator.validate().await;
    print_state(&coordinator.state());
}

/// Sign in with the configured provider token.
///
/// # Errors
///
/// Returns `CommandError` if no provider token is configured, the provider
/// never yields a token, or the backend rejects it.
pub async fn login(coordinator: &SessionCoordinator) -> Result<(), CommandError> {
    if coordinator.validate().await {
        tracing::info!("Already signed in");
    } else {
        tracing::info!("Exchanging provider token...");
        coordinator.login().await?;
        tracing::info!("Signed in successfully!");
    }

    print_state(&coordinator.state());
    Ok(())
}

/// End the user session.
///
/// # Errors
///
/// Returns `CommandError` if the stored session cannot be cleared.
pub async fn logout(coordinator: &SessionCoordinator) -> Result<(), CommandError> {
    coordinator.validate().await;
    coordinator.logout().await?;
    tracing::info!("Signed out");
    Ok(())
}

pub(crate) fn print_state(state: &ApplicationState) {
    tracing::info!("Status: {}", state.status);

    for scope in Scope::ALL {
        match state.view(scope) {
            Some(view) => tracing::info!(
                "{} session: id={} name={} email={} role={} wallet={}",
                scope,
                view.profile.id,
                view.profile.name.as_deref().unwrap_or("-"),
                view.profile
                    .email
                    .as_ref()
                    .map_or("-", |e| e.as_str()),
                view.profile.role,
                view.wallet_address.as_ref().map_or("-", |w| w.as_str()),
            ),
            None => tracing::info!("{} session: none", scope),
        }
    }

    if !state.cart.is_empty() {
        tracing::info!(
            "Cart: {} lines, {} items",
            state.cart.len(),
            state.cart.total_quantity()
        );
    }
    if let Some(currency) = &state.display_currency {
        tracing::info!("Display currency: {currency}");
    }
    if let Some(error) = &state.last_error {
        tracing::warn!("Last error: {error}");
    }
    if let Some(scope) = state.reconnect_prompt {
        tracing::warn!("Reconnect required for the {scope} session");
    }
}
