use crate::blockchain::models::{
    BlockResponse, BlockResultsResponse, RestResponse, StatusResponse, ValidatorsResponse,
};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error {code}: {message} {data}")]
    Rpc { code: i64, message: String, data: String },

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid header {0}")]
    InvalidHeader(String),

    #[error("Query {path} failed with HTTP {status}: {message}")]
    Query {
        path: String,
        status: u16,
        message: String,
    },

    #[error("Endpoint {0} has no REST gateway configured")]
    NoRestEndpoint(String),

    #[error("Request to {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("Deadline exceeded before any endpoint answered")]
    DeadlineExceeded,

    #[error("No active RPC endpoints")]
    NoActiveEndpoints,

    #[error("None of the {attempted} RPC endpoints responded to status")]
    NoEndpointResponded { attempted: usize },

    #[error("All {count} RPC endpoints are behind requested height {requested} (best seen {best})")]
    AllStale { count: usize, requested: i64, best: i64 },

    #[error("All {count} RPC endpoints failed, last error: {last}")]
    AllFailed { count: usize, last: Box<ClientError> },
}

impl ClientError {
    /// Whether asking again can give a different answer. Malformed payloads
    /// and rejected queries come back the same on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Decode(_)
            | ClientError::InvalidResponse(_)
            | ClientError::InvalidHeader(_)
            | ClientError::NoRestEndpoint(_) => false,
            ClientError::Query { status, .. } => *status == 429 || (*status >= 500 && *status != 501),
            ClientError::AllFailed { last, .. } => last.is_retryable(),
            _ => true,
        }
    }
}

/// A configured chain node: CometBFT RPC URL, the REST gateway used for
/// module queries, and optional custom headers (API keys and the like) sent
/// to both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    #[serde(default)]
    pub rest_url: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            rest_url: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_rest(mut self, rest_url: impl Into<String>) -> Self {
        self.rest_url = Some(rest_url.into());
        self
    }
}

/// Read access to a chain node. Implemented by the single-endpoint
/// [`RpcClient`] and by the multi-endpoint [`Hub`](crate::blockchain::hub::Hub).
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Label used in logs and errors.
    fn name(&self) -> &str;

    async fn status(&self) -> Result<StatusResponse, ClientError>;

    async fn block(&self, height: i64) -> Result<BlockResponse, ClientError>;

    async fn block_results(&self, height: i64) -> Result<BlockResultsResponse, ClientError>;

    async fn validators(
        &self,
        height: i64,
        page: u32,
        per_page: u32,
    ) -> Result<ValidatorsResponse, ClientError>;

    /// GET `path` on the REST gateway, which serves module queries as JSON.
    async fn rest_get(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<RestResponse, ClientError>;
}

#[derive(Deserialize)]
struct RestErrorBody {
    #[serde(default)]
    message: String,
}

const BLOCK_HEIGHT_HEADER: &str = "x-cosmos-block-height";

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: String,
}

/// JSON-RPC client for a single CometBFT endpoint.
pub struct RpcClient {
    endpoint: Endpoint,
    http: reqwest::Client,
    limiter: Option<DefaultDirectRateLimiter>,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(endpoint: Endpoint, rate_limit: Option<u32>) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        for (key, value) in &endpoint.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| ClientError::InvalidHeader(key.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ClientError::InvalidHeader(key.clone()))?;
            headers.insert(name, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        let limiter = rate_limit
            .and_then(NonZeroU32::new)
            .map(|per_second| RateLimiter::direct(Quota::per_second(per_second)));

        info!(
            "Initializing RPC client for {} (rate limit: {:?})",
            endpoint.url, rate_limit
        );

        Ok(Self {
            endpoint,
            http,
            limiter,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ClientError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!("{} -> {} {}", self.endpoint.url, method, params);

        let bytes = self
            .http
            .post(&self.endpoint.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let response: RpcResponse<T> = serde_json::from_slice(&bytes)?;
        if let Some(err) = response.error {
            return Err(ClientError::Rpc {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }

        response
            .result
            .ok_or_else(|| ClientError::InvalidResponse(format!("{} returned no result", method)))
    }
}

#[async_trait]
impl ChainReader for RpcClient {
    fn name(&self) -> &str {
        &self.endpoint.url
    }

    async fn status(&self) -> Result<StatusResponse, ClientError> {
        self.call("status", json!({})).await
    }

    async fn block(&self, height: i64) -> Result<BlockResponse, ClientError> {
        self.call("block", json!({ "height": height.to_string() })).await
    }

    async fn block_results(&self, height: i64) -> Result<BlockResultsResponse, ClientError> {
        self.call("block_results", json!({ "height": height.to_string() }))
            .await
    }

    async fn validators(
        &self,
        height: i64,
        page: u32,
        per_page: u32,
    ) -> Result<ValidatorsResponse, ClientError> {
        self.call(
            "validators",
            json!({
                "height": height.to_string(),
                "page": page.to_string(),
                "per_page": per_page.to_string(),
            }),
        )
        .await
    }

    async fn rest_get(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<RestResponse, ClientError> {
        let base = self
            .endpoint
            .rest_url
            .as_deref()
            .ok_or_else(|| ClientError::NoRestEndpoint(self.endpoint.url.clone()))?;

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let url = format!("{}{}", base.trim_end_matches('/'), path);
        debug!("{} -> GET {} {:?}", self.endpoint.url, url, query);

        let response = self.http.get(&url).query(query).send().await?;
        let status = response.status();
        let height: i64 = response
            .headers()
            .get(BLOCK_HEIGHT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<RestErrorBody>(&bytes)
                .map(|body| body.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
            return Err(ClientError::Query {
                path: path.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        Ok(RestResponse {
            height,
            body: serde_json::from_slice(&bytes)?,
        })
    }
}
