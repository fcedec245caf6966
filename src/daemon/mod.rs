// Account and instrument handles over a shared API client
pub mod account;
pub mod instrument;

pub use account::{AccountHandle, InstrumentTable, OrderStatuses, VenueInstruments};
pub use instrument::InstrumentHandle;
