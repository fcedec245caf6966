use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::instrument;

use crate::api::client::ApiClient;
use crate::api::error::{ApiError, ApiResult};
use crate::api::wire::OrderListing;
use crate::engine::types::{Order, OrderBook, OrderRequest, Quote};
use crate::engine::TradingVenue;

/// Trading operations scoped to one (venue, instrument) pair.
#[derive(Debug, Clone)]
pub struct InstrumentHandle {
    client: Arc<ApiClient>,
    venue: String,
    symbol: String,
}

impl fmt::Display for InstrumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.venue, self.symbol)
    }
}

impl InstrumentHandle {
    pub fn new(client: Arc<ApiClient>, venue: impl Into<String>, symbol: impl Into<String>) -> ApiResult<Self> {
        let venue = venue.into();
        let symbol = symbol.into();
        validate_identifier("venue", &venue)?;
        validate_identifier("symbol", &symbol)?;
        Ok(Self { client, venue, symbol })
    }

    pub fn venue(&self) -> &str {
        &self.venue
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    fn stock_path(&self) -> String {
        format!("venues/{}/stocks/{}", self.venue, self.symbol)
    }

    #[instrument(skip(self), fields(instrument = %self))]
    pub async fn get_quote(&self) -> ApiResult<Quote> {
        self.client.get_as(&format!("{}/quote", self.stock_path())).await
    }

    #[instrument(skip(self), fields(instrument = %self))]
    pub async fn get_order_book(&self) -> ApiResult<OrderBook> {
        self.client.get_as(&self.stock_path()).await
    }

    #[instrument(skip(self), fields(instrument = %self))]
    pub async fn post_order(&self, request: OrderRequest) -> ApiResult<Order> {
        // The type already guarantees this; keep the wire honest anyway.
        if request.quantity() == 0 {
            return Err(ApiError::precondition("order quantity must be positive"));
        }
        let body = json!({
            "venue": self.venue,
            "stock": self.symbol,
            "price": request.price(),
            "qty": request.quantity(),
            "direction": request.direction(),
            "orderType": request.order_type(),
        });
        self.client.post_as(&format!("{}/orders", self.stock_path()), body).await
    }

    #[instrument(skip(self), fields(instrument = %self))]
    pub async fn get_order_status(&self, order_id: u64) -> ApiResult<Order> {
        check_order_id(order_id)?;
        self.client.get_as(&format!("{}/orders/{}", self.stock_path(), order_id)).await
    }

    /// Every order this account holds on this instrument.
    #[instrument(skip(self), fields(instrument = %self))]
    pub async fn get_order_statuses(&self) -> ApiResult<Vec<Order>> {
        let path = format!("venues/{}/accounts/{}/orders", self.venue, self.client.account());
        let listing: OrderListing = self.client.get_as(&path).await?;
        Ok(listing.orders.into_iter().filter(|o| o.symbol == self.symbol).collect())
    }

    /// Best effort. Cancelling a closed order returns whatever the service says.
    #[instrument(skip(self), fields(instrument = %self))]
    pub async fn cancel_order(&self, order_id: u64) -> ApiResult<Order> {
        check_order_id(order_id)?;
        self.client
            .post_as(&format!("{}/orders/{}/cancel", self.stock_path(), order_id), json!({}))
            .await
    }
}

#[async_trait]
impl TradingVenue for InstrumentHandle {
    async fn quote(&self) -> ApiResult<Quote> {
        self.get_quote().await
    }

    async fn post_order(&self, request: OrderRequest) -> ApiResult<Order> {
        InstrumentHandle::post_order(self, request).await
    }
}

fn check_order_id(order_id: u64) -> ApiResult<()> {
    if order_id == 0 {
        return Err(ApiError::precondition("order id must be positive"));
    }
    Ok(())
}

/// Venue and symbol codes go straight into URL paths.
pub(crate) fn validate_identifier(kind: &str, value: &str) -> ApiResult<()> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(ApiError::precondition(format!("malformed {kind} identifier {value:?}")));
    }
    Ok(())
}
