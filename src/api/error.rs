// Error taxonomy shared by the API client, the handles and the acquisition engine.

/// Placeholder used when the service answers `ok = false` without an `error` string.
pub const NO_ERROR_SPECIFIED: &str = "No error specified";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Network failure, timeout, connection reset, DNS failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with `ok = false` (or a non-JSON error page).
    #[error("service rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The payload could not be decoded into the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The caller supplied an invalid argument. Never sent over the wire.
    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("venue {venue} is unavailable")]
    VenueUnavailable { venue: String },
}

impl ApiError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        ApiError::Precondition(msg.into())
    }

    /// Rejections where the service told us it did not take the request
    /// because we are calling too often.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ApiError::Rejected { status, message } => {
                *status == 429 || message.to_ascii_lowercase().contains("rate limit")
            }
            _ => false,
        }
    }

    /// Errors worth retrying under the backoff policy.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Rejected { status, .. } => {
                self.is_rate_limited() || matches!(status, 500 | 502 | 503 | 504)
            }
            ApiError::Decode(_) | ApiError::Precondition(_) | ApiError::VenueUnavailable { .. } => {
                false
            }
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else if e.is_timeout() {
            ApiError::Transport(format!("request timed out: {e}"))
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Decode(e.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
