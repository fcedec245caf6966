//! Client and acquisition strategy for the Stockfighter order-book service.
//!
//! ```ignore
//! let client = Arc::new(ApiClient::new(settings.credentials()?, settings.client_options())?);
//! let account = AccountHandle::new(client);
//! let table = account.spawn_instrument_handles(&["TESTEX"]).await;
//! let stock = account.instrument("TESTEX", "FOOBAR").unwrap();
//! let report = AcquisitionEngine::new(stock, settings.acquisition_config(5_000)).run().await?;
//! ```

pub mod api;       // authenticated REST access
pub mod config;    // layered settings
pub mod daemon;    // account + instrument handles
pub mod engine;    // domain types, acquisition loop, retry, cancellation
pub mod telemetry; // tracing + metrics setup

pub use api::{ApiClient, ApiError, ClientOptions, Credentials};
pub use daemon::{AccountHandle, InstrumentHandle};
pub use engine::acquisition::{AcquisitionConfig, AcquisitionEngine, AcquisitionReport, Outcome};
