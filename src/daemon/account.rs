use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use super::instrument::{validate_identifier, InstrumentHandle};
use crate::api::client::{from_payload, ApiClient};
use crate::api::error::{ApiError, ApiResult};
use crate::api::wire::{OrderListing, StockListing};
use crate::engine::types::Order;

/// Instruments on one venue, keyed by symbol.
pub type VenueInstruments = HashMap<String, Arc<InstrumentHandle>>;
/// Venue -> symbol -> handle.
pub type InstrumentTable = HashMap<String, VenueInstruments>;

#[derive(Debug)]
pub enum OrderStatuses {
    Venue(Vec<Order>),
    /// One entry per venue in the instrument table; a failed venue keeps its error.
    PerVenue(BTreeMap<String, ApiResult<Vec<Order>>>),
}

/// Account-level operations plus the lazily populated instrument table.
#[derive(Debug)]
pub struct AccountHandle {
    client: Arc<ApiClient>,
    instruments: RwLock<InstrumentTable>,
}

impl AccountHandle {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client, instruments: RwLock::new(HashMap::new()) }
    }

    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    pub fn account(&self) -> &str {
        self.client.account()
    }

    #[instrument(skip(self))]
    pub async fn is_service_up(&self) -> bool {
        match self.client.get("heartbeat").await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "heartbeat failed");
                false
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn is_venue_up(&self, venue: &str) -> bool {
        if validate_identifier("venue", venue).is_err() {
            return false;
        }
        match self.client.get(&stocks_path(venue)).await {
            Ok(_) => true,
            Err(e) => {
                debug!(venue, error = %e, "venue probe failed");
                false
            }
        }
    }

    /// Symbols tradable on `venue`. Fails with `VenueUnavailable` if the probe fails.
    ///
    /// The liveness probe and the listing are the same endpoint, so one call does both.
    #[instrument(skip(self))]
    pub async fn discover_instruments(&self, venue: &str) -> ApiResult<Vec<String>> {
        validate_identifier("venue", venue)?;
        let payload = match self.client.get(&stocks_path(venue)).await {
            Ok(payload) => payload,
            Err(e) => {
                debug!(venue, error = %e, "venue probe failed");
                return Err(ApiError::VenueUnavailable { venue: venue.to_string() });
            }
        };
        let listing: StockListing = from_payload(payload)?;
        Ok(listing.symbols())
    }

    /// Build handles for every instrument on every live venue in `venues`.
    ///
    /// Dead venues are left out of the result without an error and dropped from
    /// the table. Handles already in the table for a (venue, symbol) pair are
    /// reused; the table entry for each live venue is replaced with exactly what
    /// the venue lists now.
    #[instrument(skip(self))]
    pub async fn spawn_instrument_handles(&self, venues: &[&str]) -> InstrumentTable {
        let mut spawned = InstrumentTable::new();
        let mut dead = Vec::new();

        for &venue in venues {
            let symbols = match self.discover_instruments(venue).await {
                Ok(symbols) => symbols,
                Err(ApiError::VenueUnavailable { .. }) => {
                    info!(venue, "venue is down, skipping");
                    dead.push(venue);
                    continue;
                }
                Err(e) => {
                    warn!(venue, error = %e, "instrument discovery failed, skipping venue");
                    dead.push(venue);
                    continue;
                }
            };

            let existing = self.instruments.read().get(venue).cloned().unwrap_or_default();
            let mut handles = VenueInstruments::new();
            for symbol in symbols {
                let handle = match existing.get(&symbol) {
                    Some(handle) => Arc::clone(handle),
                    None => match InstrumentHandle::new(Arc::clone(&self.client), venue, symbol.as_str()) {
                        Ok(handle) => Arc::new(handle),
                        Err(e) => {
                            warn!(venue, symbol = %symbol, error = %e, "ignoring unusable symbol");
                            continue;
                        }
                    },
                };
                handles.insert(symbol, handle);
            }
            info!(venue, instruments = handles.len(), "venue discovered");
            spawned.insert(venue.to_string(), handles);
        }

        let mut table = self.instruments.write();
        for venue in dead {
            table.remove(venue);
        }
        for (venue, handles) in &spawned {
            table.insert(venue.clone(), handles.clone());
        }
        spawned
    }

    /// Shared handle for a discovered (venue, symbol), if any.
    pub fn instrument(&self, venue: &str, symbol: &str) -> Option<Arc<InstrumentHandle>> {
        self.instruments.read().get(venue).and_then(|v| v.get(symbol)).cloned()
    }

    pub fn instrument_table(&self) -> InstrumentTable {
        self.instruments.read().clone()
    }

    pub fn venues(&self) -> Vec<String> {
        let mut venues: Vec<String> = self.instruments.read().keys().cloned().collect();
        venues.sort();
        venues
    }

    #[instrument(skip(self))]
    pub async fn venue_order_statuses(&self, venue: &str) -> ApiResult<Vec<Order>> {
        validate_identifier("venue", venue)?;
        let path = format!("venues/{}/accounts/{}/orders", venue, self.account());
        let listing: OrderListing = self.client.get_as(&path).await?;
        Ok(listing.orders)
    }

    /// Order statuses across every venue in the table, fetched concurrently.
    pub async fn all_order_statuses(&self) -> BTreeMap<String, ApiResult<Vec<Order>>> {
        let venues = self.venues();
        let results = join_all(venues.iter().map(|v| self.venue_order_statuses(v))).await;
        venues.into_iter().zip(results).collect()
    }

    pub async fn get_all_order_statuses(&self, venue: Option<&str>) -> ApiResult<OrderStatuses> {
        match venue {
            Some(venue) => Ok(OrderStatuses::Venue(self.venue_order_statuses(venue).await?)),
            None => Ok(OrderStatuses::PerVenue(self.all_order_statuses().await)),
        }
    }
}

fn stocks_path(venue: &str) -> String {
    format!("venues/{venue}/stocks")
}
