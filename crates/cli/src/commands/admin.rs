//! Admin-panel session commands.
//!
//! # Usage
//!
//! ```bash
//! # Password from the environment
//! MARKETSYNC_ADMIN_PASSWORD=... msync admin login -e ops@example.com
//!
//! msync admin logout
//! ```
//!
//! # Environment Variables
//!
//! - `MARKETSYNC_ADMIN_PASSWORD` - Admin password (instead of `--password`)

use marketsync_core::Email;
use marketsync_session::SessionCoordinator;
use secrecy::SecretString;

use super::CommandError;

/// Sign in to the admin panel.
///
/// # Errors
///
/// Returns `CommandError` if the email is malformed, the credentials are
/// rejected, or the account is not an admin.
pub async fn login(
    coordinator: &SessionCoordinator,
    email: &str,
    password: SecretString,
) -> Result<(), CommandError> {
    let email = Email::parse(email)?;
    coordinator.validate().await;

    tracing::info!("Signing in to admin panel as {email}...");
    let profile = coordinator.login_admin(email.as_str(), &password).await?;

    tracing::info!(
        "Admin session established! ID: {}, Name: {}",
        profile.id,
        profile.name.as_deref().unwrap_or("-")
    );
    Ok(())
}

/// End the admin-panel session. The user session is kept.
///
/// # Errors
///
/// Returns `CommandError` if the stored admin session cannot be cleared.
pub async fn logout(coordinator: &SessionCoordinator) -> Result<(), CommandError> {
    coordinator.validate().await;
    coordinator.logout_admin().await?;
    tracing::info!("Admin session ended");
    Ok(())
}
