// API access layer entrypoint
pub mod client; // authenticated client + response envelope decoding
pub mod error;  // error taxonomy
pub mod wire;   // listing envelopes that never leave this layer

pub use client::{ApiClient, ClientOptions, Credentials, Payload};
pub use error::{ApiError, ApiResult};
