//! 401 handling over HTTP: which session is cleared and when the user is
//! asked to reconnect.
//!
//! Run with: `cargo test -p marketsync-integration-tests --test unauthorized`

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::http::Method;
use marketsync_core::Scope;
use marketsync_integration_tests::{ADMIN_PASSWORD, StubBackend, signed_in_provider};
use marketsync_session::{
    GatewayError, MemoryStore, RequestContext, SessionCoordinator, SessionStatus,
    StaticTokenProvider,
};
use serde_json::Value;

async fn signed_in(stub: &StubBackend, store: &MemoryStore) -> Arc<SessionCoordinator> {
    let provider = signed_in_provider();
    let signal = provider.signal();
    let coordinator =
        SessionCoordinator::connect(&stub.config(), Arc::new(store.clone()), Arc::new(provider))
            .unwrap();
    coordinator.authenticate(signal).await.unwrap();
    coordinator
}

#[tokio::test]
async fn test_user_initiated_401_demotes_and_prompts() {
    let stub = StubBackend::start().await;
    let store = MemoryStore::new();
    let coordinator = signed_in(&stub, &store).await;
    stub.revoke("user");

    let err = coordinator
        .gateway()
        .unwrap()
        .send_json::<(), Value>(
            Method::POST,
            "checkout",
            None,
            RequestContext::user_initiated(Scope::User),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Unauthorized { scope: Scope::User }));
    assert!(!coordinator.session(Scope::User).await.is_authenticated());
    assert!(!store.contains("token"));
    assert!(!store.contains("userInfo"));

    let state = coordinator.state();
    assert_eq!(state.status, SessionStatus::NoSession);
    assert_eq!(state.reconnect_prompt, Some(Scope::User));
    assert!(state.cart.is_empty());

    coordinator.dismiss_reconnect_prompt();
    assert!(coordinator.state().reconnect_prompt.is_none());
}

#[tokio::test]
async fn test_background_401_at_boot_demotes_silently() {
    let stub = StubBackend::start().await;
    let store = MemoryStore::new();
    drop(signed_in(&stub, &store).await);
    stub.revoke("user");

    // Next process start: the stored token is restored, then rejected by the
    // cart and wishlist loads.
    let restarted = SessionCoordinator::connect(
        &stub.config(),
        Arc::new(store.clone()),
        Arc::new(StaticTokenProvider::signed_out()),
    )
    .unwrap();

    assert!(!restarted.validate().await);
    assert!(!restarted.session(Scope::User).await.is_authenticated());
    assert!(!store.contains("token"));

    let state = restarted.state();
    assert_eq!(state.status, SessionStatus::NoSession);
    assert!(state.reconnect_prompt.is_none());
}

#[tokio::test]
async fn test_admin_401_leaves_user_session_alone() {
    let stub = StubBackend::start().await;
    let store = MemoryStore::new();
    let coordinator = signed_in(&stub, &store).await;
    coordinator
        .login_admin("ops@example.com", &ADMIN_PASSWORD.to_string().into())
        .await
        .unwrap();
    stub.revoke("admin");

    let err = coordinator
        .gateway()
        .unwrap()
        .send_json::<(), Value>(
            Method::GET,
            "admin/orders",
            None,
            RequestContext::user_initiated(Scope::Admin),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Unauthorized { scope: Scope::Admin }));
    assert!(!coordinator.session(Scope::Admin).await.is_authenticated());
    assert!(!store.contains("adminToken"));
    assert!(!store.contains("adminInfo"));

    assert!(coordinator.session(Scope::User).await.is_authenticated());
    assert!(store.contains("token"));
    assert_eq!(coordinator.status(), SessionStatus::Valid);
    assert_eq!(coordinator.state().reconnect_prompt, Some(Scope::Admin));

    // The user token still works.
    coordinator.cart().await.unwrap();
}

#[tokio::test]
async fn test_rejected_user_add_to_cart_prompts() {
    let stub = StubBackend::start().await;
    let store = MemoryStore::new();
    let coordinator = signed_in(&stub, &store).await;
    stub.revoke("user");

    let result = coordinator
        .add_to_cart(marketsync_core::ResourceId::from("sku-1"), 1)
        .await;

    assert!(result.is_err());
    assert_eq!(coordinator.state().reconnect_prompt, Some(Scope::User));
    assert!(!store.contains("token"));

    // Signed out now, so the next add lands in the guest cart.
    let cart = coordinator
        .add_to_cart(marketsync_core::ResourceId::from("sku-1"), 1)
        .await
        .unwrap();
    assert_eq!(cart.total_quantity(), 1);
    assert!(store.contains("guestCart"));
}
