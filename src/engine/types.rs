use std::fmt;

use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderType {
    Market,
    Limit,
    ImmediateOrCancel,
    FillOrKill,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::ImmediateOrCancel => "immediate-or-cancel",
            OrderType::FillOrKill => "fill-or-kill",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

// Best bid/ask snapshot. Prices are integer cents.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub venue: String,
    pub bid: Option<u64>,
    #[serde(default)]
    pub bid_size: u64,
    #[serde(default)]
    pub bid_depth: u64,
    pub ask: Option<u64>,
    #[serde(default)]
    pub ask_size: u64,
    /// Total quantity offered across all ask levels.
    #[serde(default)]
    pub ask_depth: u64,
    pub last: Option<u64>,
    #[serde(default)]
    pub last_size: u64,
    pub last_trade: Option<String>,
    pub quote_time: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookLevel {
    pub price: u64,
    #[serde(rename = "qty")]
    pub size: u64,
}

// Wire shape: either side may be `null` when empty.
#[derive(Debug, Deserialize)]
struct RawOrderBook {
    #[serde(default)]
    venue: String,
    #[serde(default)]
    symbol: String,
    bids: Option<Vec<BookLevel>>,
    asks: Option<Vec<BookLevel>>,
    ts: Option<String>,
}

/// Full depth. Bids descending by price, asks ascending.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "RawOrderBook")]
pub struct OrderBook {
    pub venue: String,
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub ts: Option<String>,
}

impl From<RawOrderBook> for OrderBook {
    fn from(raw: RawOrderBook) -> Self {
        let mut bids = raw.bids.unwrap_or_default();
        let mut asks = raw.asks.unwrap_or_default();
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        OrderBook { venue: raw.venue, symbol: raw.symbol, bids, asks, ts: raw.ts }
    }
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<BookLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<BookLevel> {
        self.asks.first().copied()
    }

    pub fn spread(&self) -> Option<i64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price as i64 - bid.price as i64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub price: u64,
    #[serde(rename = "qty")]
    pub quantity: u64,
    #[serde(default)]
    pub ts: String,
}

// Order as reported by the service. Read-only once we hold it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: u64,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub venue: String,
    #[serde(default)]
    pub account: String,
    pub direction: Direction,
    pub original_qty: u64,
    /// Quantity still outstanding.
    #[serde(default)]
    pub qty: u64,
    #[serde(default)]
    pub price: u64,
    pub order_type: OrderType,
    #[serde(default)]
    pub fills: Vec<Fill>,
    #[serde(default)]
    pub total_filled: u64,
    #[serde(default)]
    pub open: bool,
    pub ts: Option<String>,
}

impl Order {
    /// Sum of fill quantities. This, not `original_qty`, is what we actually bought.
    pub fn filled_quantity(&self) -> u64 {
        self.fills.iter().map(|f| f.quantity).sum()
    }

    pub fn status(&self) -> OrderStatus {
        let filled = self.total_filled.max(self.filled_quantity());
        if self.open {
            if filled > 0 {
                OrderStatus::PartiallyFilled
            } else {
                OrderStatus::Open
            }
        } else if filled >= self.original_qty {
            OrderStatus::Filled
        } else {
            OrderStatus::Cancelled
        }
    }
}

/// Validated order submission. Quantity is always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderRequest {
    quantity: u64,
    order_type: OrderType,
    price: u64,
    direction: Direction,
}

impl OrderRequest {
    pub fn new(quantity: u64, order_type: OrderType) -> ApiResult<Self> {
        if quantity == 0 {
            return Err(ApiError::precondition("order quantity must be positive"));
        }
        Ok(Self { quantity, order_type, price: 0, direction: Direction::Buy })
    }

    pub fn with_price(mut self, price: u64) -> Self {
        self.price = price;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn price(&self) -> u64 {
        self.price
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}
