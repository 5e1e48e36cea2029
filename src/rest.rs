//! Order-placement REST collaborator.
//!
//! [`OrderApi`] wraps the backend's `/api/orders` endpoints. It is a plain
//! request/response surface, separate from the streaming core, and
//! authenticates each call with the header supplied by its
//! [`CredentialProvider`].

use std::sync::Arc;

use reqwest::header::AUTHORIZATION;
use tracing::info;

use crate::models::order::{Order, OrderCreateRequest};
use crate::session::CredentialProvider;
use crate::{BookfeedError, Result};

/// Client for the order-placement backend.
pub struct OrderApi {
    base_url: String,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl OrderApi {
    #[must_use]
    pub fn new(base_url: impl Into<String>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            credentials,
        }
    }

    /// Places an order.
    ///
    /// # Errors
    ///
    /// Returns [`BookfeedError::Unauthenticated`] with no active session,
    /// [`BookfeedError::Http`] on request failure, or
    /// [`BookfeedError::Api`] when the backend rejects the order.
    pub async fn create_order(&self, request: &OrderCreateRequest) -> Result<Order> {
        let builder = self.client.post(format!("{}/api/orders", self.base_url));
        let response = self.authorized(builder)?.json(request).send().await?;
        let response = check(response).await?;

        let order: Order = response.json().await?;
        info!(
            order_id = order.order_id.as_deref().unwrap_or("<none>"),
            pair = %order.trading_pair,
            "order created"
        );
        Ok(order)
    }

    /// Cancels an order by id.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::create_order`].
    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let builder = self
            .client
            .delete(format!("{}/api/orders/{order_id}", self.base_url));
        let response = self.authorized(builder)?.send().await?;
        check(response).await?;

        info!(order_id, "order cancelled");
        Ok(())
    }

    /// Lists the authenticated user's orders.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::create_order`].
    pub async fn list_my_orders(&self) -> Result<Vec<Order>> {
        let builder = self
            .client
            .get(format!("{}/api/orders/my-orders", self.base_url));
        let response = self.authorized(builder)?.send().await?;
        let response = check(response).await?;

        let orders: Vec<Order> = response.json().await?;
        Ok(orders)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let header = self
            .credentials
            .authorization()
            .ok_or(BookfeedError::Unauthenticated)?;
        Ok(builder.header(AUTHORIZATION, header))
    }
}

/// Maps non-success statuses to [`BookfeedError::Api`].
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(BookfeedError::Api { status, body })
}
