// Runtime settings: defaults -> optional TOML file -> CHOCK_* environment.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::api::client::{ClientOptions, Credentials, DEFAULT_BASE_URL};
use crate::api::error::ApiResult;
use crate::engine::acquisition::AcquisitionConfig;
use crate::engine::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "chock";
pub const ENV_PREFIX: &str = "CHOCK";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("failed to read {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_key: String,
    pub account: String,
    pub venue: String,
    pub stock: String,
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub target_quantity: u64,
    pub reference_price: Option<u64>,
    pub poll_interval_ms: u64,
    pub max_cycles: Option<u64>,
    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            account: String::new(),
            venue: String::new(),
            stock: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_ms: 10_000,
            target_quantity: 100_000,
            reference_price: None,
            poll_interval_ms: 100,
            max_cycles: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &"<redacted>")
            .field("account", &self.account)
            .field("venue", &self.venue)
            .field("stock", &self.stock)
            .field("base_url", &self.base_url)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("target_quantity", &self.target_quantity)
            .field("reference_price", &self.reference_price)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("max_cycles", &self.max_cycles)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Settings {
    /// Layered load. `path` must exist when given; otherwise `chock.toml` is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings: Settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Four lines: api key, account, venue, stock.
    pub fn from_information_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        let settings = Self::from_information(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_information(text: &str) -> Result<Self, ConfigError> {
        let mut lines = text.lines().map(str::trim);
        let mut next = |what: &str| {
            lines
                .next()
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .ok_or_else(|| ConfigError::Invalid(format!("information file is missing the {what} line")))
        };
        Ok(Self {
            api_key: next("api key")?,
            account: next("account")?,
            venue: next("venue")?,
            stock: next("stock")?,
            ..Self::default()
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("api_key", &self.api_key),
            ("account", &self.account),
            ("venue", &self.venue),
            ("stock", &self.stock),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{name} must be set")));
            }
        }
        if self.target_quantity == 0 {
            return Err(ConfigError::Invalid("target_quantity must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("request_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn credentials(&self) -> ApiResult<Credentials> {
        Credentials::new(self.api_key.clone(), self.account.clone())
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            base_url: self.base_url.clone(),
            timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    pub fn acquisition_config(&self, reference_price: u64) -> AcquisitionConfig {
        AcquisitionConfig {
            target_quantity: self.target_quantity,
            reference_price,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_cycles: self.max_cycles,
            retry: self.retry.clone(),
        }
    }
}
