// Authenticated client for the order-book REST service.
//
// One `ApiClient` owns one pooled `reqwest::Client` per credential. Handles share
// it through `Arc<ApiClient>`; reqwest pools connections and is safe to call
// concurrently.

use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use super::error::{ApiError, ApiResult, NO_ERROR_SPECIFIED};

pub const AUTH_HEADER: &str = "x-starfighter-authorization";
pub const DEFAULT_BASE_URL: &str = "https://api.stockfighter.io/ob/api";

/// API key + trading account. Immutable for the lifetime of the client.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    account: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, account: impl Into<String>) -> ApiResult<Self> {
        let api_key = api_key.into();
        let account = account.into();
        if api_key.trim().is_empty() {
            return Err(ApiError::precondition("api key must not be empty"));
        }
        if account.trim().is_empty() {
            return Err(ApiError::precondition("account id must not be empty"));
        }
        Ok(Self { api_key, account })
    }

    pub fn account(&self) -> &str {
        &self.account
    }
}

// Keep the key out of logs and panics.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("account", &self.account)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Request payload. Reads carry query parameters, writes carry a JSON body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Query(Vec<(String, String)>),
    Json(Value),
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl ApiClient {
    pub fn new(credentials: Credentials, options: ClientOptions) -> ApiResult<Self> {
        let mut auth = HeaderValue::from_str(&credentials.api_key)
            .map_err(|_| ApiError::precondition("api key contains characters not allowed in a header"))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static(AUTH_HEADER), auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(options.timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn account(&self) -> &str {
        self.credentials.account()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Issue one call and normalise the response. No retries at this layer.
    pub async fn send(&self, method: Method, path: &str, payload: Payload) -> ApiResult<Value> {
        let url = self.url(path);
        let account = self.credentials.account();

        let request = if method == Method::GET || method == Method::DELETE {
            let params = match payload {
                Payload::Query(params) => params,
                Payload::Empty => Vec::new(),
                Payload::Json(_) => {
                    return Err(ApiError::precondition(format!("{method} {path} cannot carry a JSON body")))
                }
            };
            self.http.request(method.clone(), &url).query(&with_account_query(params, account))
        } else {
            let body = match payload {
                Payload::Json(body) => body,
                Payload::Empty => Value::Object(Map::new()),
                Payload::Query(_) => {
                    return Err(ApiError::precondition(format!("{method} {path} expects a JSON body")))
                }
            };
            self.http.request(method.clone(), &url).json(&with_account_body(body, account)?)
        };

        debug!(%method, path, "api request");
        let response = request.send().await.map_err(|e| {
            warn!(%method, path, error = %e, "transport failure");
            ApiError::from(e)
        })?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        trace!(%method, path, status, bytes = body.len(), "api response");

        decode_envelope(status, &body)
    }

    pub async fn get(&self, path: &str) -> ApiResult<Value> {
        self.send(Method::GET, path, Payload::Empty).await
    }

    pub async fn post(&self, path: &str, body: Value) -> ApiResult<Value> {
        self.send(Method::POST, path, Payload::Json(body)).await
    }

    pub async fn get_as<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        from_payload(self.get(path).await?)
    }

    pub async fn post_as<T: DeserializeOwned>(&self, path: &str, body: Value) -> ApiResult<T> {
        from_payload(self.post(path, body).await?)
    }
}

/// Query string for a read, with the account appended unless already present.
pub fn with_account_query(mut params: Vec<(String, String)>, account: &str) -> Vec<(String, String)> {
    params.retain(|(k, _)| k != "account");
    params.push(("account".to_string(), account.to_string()));
    params
}

/// JSON body for a write, with the `account` field set to ours.
pub fn with_account_body(body: Value, account: &str) -> ApiResult<Value> {
    match body {
        Value::Object(mut map) => {
            map.insert("account".to_string(), Value::String(account.to_string()));
            Ok(Value::Object(map))
        }
        other => Err(ApiError::precondition(format!("request body must be a JSON object, got {other}"))),
    }
}

/// Turn a raw HTTP response into the success payload (with `ok` stripped) or an error.
pub fn decode_envelope(status: u16, body: &str) -> ApiResult<Value> {
    let mut value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            // Proxies and rate limiters answer with HTML; keep those classifiable.
            if status == 429 || status >= 500 {
                let message = body.trim();
                let message = if message.is_empty() {
                    NO_ERROR_SPECIFIED.to_string()
                } else {
                    message.chars().take(200).collect()
                };
                return Err(ApiError::Rejected { status, message });
            }
            return Err(ApiError::Decode(format!("HTTP {status}: {e}")));
        }
    };

    let ok = value.get("ok").and_then(Value::as_bool).unwrap_or(false);
    if ok {
        if let Some(map) = value.as_object_mut() {
            map.remove("ok");
        }
        return Ok(value);
    }

    let message = value
        .get("error")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .unwrap_or(NO_ERROR_SPECIFIED)
        .to_string();
    Err(ApiError::Rejected { status, message })
}

pub fn from_payload<T: DeserializeOwned>(value: Value) -> ApiResult<T> {
    serde_json::from_value(value).map_err(ApiError::from)
}
