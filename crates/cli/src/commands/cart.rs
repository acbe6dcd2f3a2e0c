//! Cart and wishlist commands.
//!
//! Signed-in users talk to the backend; signed-out users work on the guest
//! cart, which is merged into their cart at the next login.

use marketsync_core::{ResourceId, ResourceSet, Scope};
use marketsync_session::SessionCoordinator;

use super::CommandError;

/// Add units of a product to the cart.
///
/// # Errors
///
/// Returns `CommandError` if the backend call or guest storage fails.
pub async fn add(
    coordinator: &SessionCoordinator,
    product_id: &str,
    quantity: u32,
) -> Result<(), CommandError> {
    coordinator.validate().await;
    let cart = coordinator
        .add_to_cart(ResourceId::from(product_id), quantity)
        .await
        .map_err(CommandError::Session)?;

    tracing::info!("Added {quantity} x {product_id}");
    print_cart(&cart);
    Ok(())
}

/// Remove a product from the guest cart.
///
/// # Errors
///
/// Returns `CommandError::Unsupported` when signed in, or a storage error.
pub async fn remove(coordinator: &SessionCoordinator, product_id: &str) -> Result<(), CommandError> {
    coordinator.validate().await;
    if coordinator.session(Scope::User).await.is_authenticated() {
        return Err(CommandError::Unsupported(
            "only the guest cart can be edited from the CLI; sign out first",
        ));
    }

    let cart = coordinator
        .merger()
        .remove_guest_item(&ResourceId::from(product_id))
        .await
        .map_err(|e| CommandError::Session(e.into()))?;
    print_cart(&cart);
    Ok(())
}

/// Print the cart.
///
/// # Errors
///
/// Returns `CommandError` if the cart cannot be loaded.
pub async fn show(coordinator: &SessionCoordinator) -> Result<(), CommandError> {
    coordinator.validate().await;
    let cart = coordinator.cart().await?;
    print_cart(&cart);
    Ok(())
}

/// Print the wishlist.
///
/// # Errors
///
/// Returns `CommandError` if the wishlist cannot be loaded.
pub async fn show_wishlist(coordinator: &SessionCoordinator) -> Result<(), CommandError> {
    if !coordinator.validate().await {
        tracing::info!("Not signed in; wishlist unavailable");
        return Ok(());
    }

    let wishlist = coordinator.wishlist().await?;
    if wishlist.is_empty() {
        tracing::info!("Wishlist is empty");
    }
    for id in wishlist.iter() {
        tracing::info!("  {id}");
    }
    Ok(())
}

fn print_cart(cart: &ResourceSet) {
    if cart.is_empty() {
        tracing::info!("Cart is empty");
        return;
    }
    for (id, quantity) in cart.iter() {
        tracing::info!("  {id} x {quantity}");
    }
    tracing::info!("Total items: {}", cart.total_quantity());
}
