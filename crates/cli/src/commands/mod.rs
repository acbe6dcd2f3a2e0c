//! CLI command implementations.

pub mod admin;
pub mod cart;
pub mod session;

use marketsync_core::{Email, EmailError, WalletAddress, WalletAddressError};
use marketsync_session::{AuthError, ProviderProfile, SessionError};
use thiserror::Error;

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Session engine failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Invalid email argument.
    #[error("Invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    /// Invalid wallet argument.
    #[error("Invalid wallet address: {0}")]
    InvalidWallet(#[from] WalletAddressError),

    /// The operation needs a signed-out (guest) session.
    #[error("{0}")]
    Unsupported(&'static str),
}

impl From<AuthError> for CommandError {
    fn from(e: AuthError) -> Self {
        Self::Session(e.into())
    }
}

/// Build the provider-side profile from CLI arguments.
///
/// # Errors
///
/// Returns `CommandError` if the email or wallet address is malformed.
pub fn provider_profile(
    email: Option<&str>,
    wallet: Option<&str>,
) -> Result<ProviderProfile, CommandError> {
    Ok(ProviderProfile {
        email: email.map(Email::parse).transpose()?,
        name: None,
        wallet_address: wallet.map(WalletAddress::parse).transpose()?,
    })
}
