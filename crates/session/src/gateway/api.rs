//! Backend endpoints used by the session engine.

use async_trait::async_trait;
use marketsync_core::{LineItem, Profile, ResourceId, ResourceSet, Scope, WalletAddress, Wishlist};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{GatewayError, HttpGateway, RequestContext};
use crate::provider::ProviderProfile;

/// Token and profile returned by a successful credential exchange.
#[derive(Debug, Clone)]
pub struct Exchanged {
    /// Backend token.
    pub token: SecretString,
    /// Profile the token was issued for.
    pub profile: Profile,
}

/// Backend operations the coordinator and merger depend on.
///
/// [`HttpGateway`] is the production implementation; tests substitute fakes.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// `POST /auth/exchange`: trade a provider token for a backend token.
    async fn exchange_token(
        &self,
        provider_token: &SecretString,
        hints: Option<&ProviderProfile>,
    ) -> Result<Exchanged, GatewayError>;

    /// `POST /admin/auth/login`: sign in to the admin panel.
    async fn admin_login(&self, email: &str, password: &SecretString)
    -> Result<Exchanged, GatewayError>;

    /// `GET /cart`.
    async fn fetch_cart(&self, ctx: RequestContext) -> Result<ResourceSet, GatewayError>;

    /// `GET /wishlist`.
    async fn fetch_wishlist(&self, ctx: RequestContext) -> Result<Wishlist, GatewayError>;

    /// `POST /cart/merge-guest`: returns the merged cart if the backend echoes it.
    async fn merge_guest_cart(
        &self,
        ctx: RequestContext,
        guest: &ResourceSet,
    ) -> Result<Option<ResourceSet>, GatewayError>;

    /// `POST /cart`: returns the updated cart if the backend echoes it.
    async fn add_to_cart(
        &self,
        ctx: RequestContext,
        resource_id: &ResourceId,
        quantity: u32,
    ) -> Result<Option<ResourceSet>, GatewayError>;
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeRequest<'a> {
    provider_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    wallet_address: Option<&'a WalletAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Serialize)]
struct AdminLoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
    user: Profile,
}

impl From<AuthResponse> for Exchanged {
    fn from(response: AuthResponse) -> Self {
        Self {
            token: SecretString::from(response.token),
            profile: response.user,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ItemsEnvelope<T> {
    items: T,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddToCartRequest<'a> {
    product_id: &'a ResourceId,
    quantity: u32,
}

fn require<T>(body: Option<T>) -> Result<T, GatewayError> {
    body.ok_or(GatewayError::EmptyBody)
}

#[async_trait]
impl SessionBackend for HttpGateway {
    async fn exchange_token(
        &self,
        provider_token: &SecretString,
        hints: Option<&ProviderProfile>,
    ) -> Result<Exchanged, GatewayError> {
        let body = ExchangeRequest {
            provider_token: provider_token.expose_secret(),
            wallet_address: hints.and_then(|h| h.wallet_address.as_ref()),
            email: hints.and_then(|h| h.email.as_ref()).map(|e| e.as_str()),
            name: hints.and_then(|h| h.name.as_deref()),
        };
        let response: Option<AuthResponse> = self
            .send_json(
                Method::POST,
                "auth/exchange",
                Some(&body),
                RequestContext::handshake(Scope::User),
            )
            .await?;
        Ok(require(response)?.into())
    }

    async fn admin_login(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Exchanged, GatewayError> {
        let body = AdminLoginRequest {
            email,
            password: password.expose_secret(),
        };
        let response: Option<AuthResponse> = self
            .send_json(
                Method::POST,
                "admin/auth/login",
                Some(&body),
                RequestContext::handshake(Scope::Admin),
            )
            .await?;
        Ok(require(response)?.into())
    }

    async fn fetch_cart(&self, ctx: RequestContext) -> Result<ResourceSet, GatewayError> {
        let response: Option<ItemsEnvelope<Vec<LineItem>>> =
            self.send_json::<(), _>(Method::GET, "cart", None, ctx).await?;
        Ok(response.map(|r| r.items.into()).unwrap_or_default())
    }

    async fn fetch_wishlist(&self, ctx: RequestContext) -> Result<Wishlist, GatewayError> {
        let response: Option<ItemsEnvelope<Wishlist>> =
            self.send_json::<(), _>(Method::GET, "wishlist", None, ctx).await?;
        Ok(response.map(|r| r.items).unwrap_or_default())
    }

    async fn merge_guest_cart(
        &self,
        ctx: RequestContext,
        guest: &ResourceSet,
    ) -> Result<Option<ResourceSet>, GatewayError> {
        let body = ItemsEnvelope {
            items: guest.to_items(),
        };
        let response: Option<ItemsEnvelope<Vec<LineItem>>> = self
            .send_json(Method::POST, "cart/merge-guest", Some(&body), ctx)
            .await?;
        Ok(response.map(|r| r.items.into()))
    }

    async fn add_to_cart(
        &self,
        ctx: RequestContext,
        resource_id: &ResourceId,
        quantity: u32,
    ) -> Result<Option<ResourceSet>, GatewayError> {
        let body = AddToCartRequest {
            product_id: resource_id,
            quantity,
        };
        let response: Option<ItemsEnvelope<Vec<LineItem>>> =
            self.send_json(Method::POST, "cart", Some(&body), ctx).await?;
        Ok(response.map(|r| r.items.into()))
    }
}
