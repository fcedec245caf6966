// Response shapes that only exist on the wire.
// Source: GET venues/{venue}/stocks, GET venues/{venue}/accounts/{account}/orders

use serde::Deserialize;

use crate::engine::types::Order;

#[derive(Debug, Deserialize)]
pub struct StockListing {
    #[serde(default)]
    pub symbols: Vec<ListedStock>,
}

#[derive(Debug, Deserialize)]
pub struct ListedStock {
    #[serde(default)]
    pub name: String,
    pub symbol: String,
}

#[derive(Debug, Deserialize)]
pub struct OrderListing {
    #[serde(default)]
    pub venue: String,
    #[serde(default)]
    pub orders: Vec<Order>,
}

impl StockListing {
    pub fn symbols(self) -> Vec<String> {
        self.symbols.into_iter().map(|s| s.symbol).collect()
    }
}
