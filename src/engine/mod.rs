// Trading engine entrypoint
pub mod acquisition; // quote-driven IOC buy loop
pub mod retry;       // capped exponential backoff
pub mod signal;      // external cancellation
pub mod types;       // quotes, books, orders

use async_trait::async_trait;

use crate::api::error::ApiResult;
use types::{Order, OrderRequest, Quote};

/// The two calls the acquisition loop needs from a single instrument.
/// `InstrumentHandle` implements this against the live service.
#[async_trait]
pub trait TradingVenue: Send + Sync {
    async fn quote(&self) -> ApiResult<Quote>;
    async fn post_order(&self, request: OrderRequest) -> ApiResult<Order>;
}
