//! HTTP/JSON fetch adapter.
//!
//! ### Request
//! - URL from the source's `config` map (see [`endpoint`])
//! - Domain parameters as query pairs
//! - Max redirects: 5
//!
//! ### Response
//! - Non-2xx status is a failure
//! - Max body bytes: 5MB (configurable), enforced while streaming
//! - Body must be JSON

pub mod endpoint;

use async_trait::async_trait;
use bytes::BytesMut;
use reqwest::{Client, header};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};

use datahub_core::{Error, FetchError, Fetcher, HubConfig, SourceConfig};

pub use endpoint::{base_url, request_url};

/// `adapter_ref` handled by [`HttpFetcher`].
pub const ADAPTER_REF: &str = "http_json";

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "data-hub/<version>")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("data-hub/", env!("CARGO_PKG_VERSION")).to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
        }
    }
}

/// Fetches JSON from HTTP sources.
#[derive(Debug)]
pub struct HttpFetcher {
    http: Client,
    config: FetchConfig,
}

impl HttpFetcher {
    /// Create a new fetcher with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::InvalidInput(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// Build from the hub's upstream settings.
    pub fn from_hub_config(config: &HubConfig) -> Result<Self, Error> {
        Self::new(FetchConfig {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            ..Default::default()
        })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn check_adapter(source: &SourceConfig) -> Result<(), FetchError> {
        if source.adapter_ref != ADAPTER_REF {
            return Err(FetchError::Misconfigured(format!(
                "{}: adapter {} is not handled by the HTTP fetcher",
                source.source_id, source.adapter_ref
            )));
        }
        Ok(())
    }

    fn transport_error(&self, err: &reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX))
        } else {
            FetchError::Unavailable(err.to_string())
        }
    }

    async fn read_limited(&self, mut response: reqwest::Response) -> Result<BytesMut, FetchError> {
        let limit = self.config.max_bytes;
        if let Some(len) = response.content_length()
            && len as usize > limit
        {
            return Err(FetchError::TooLarge { limit });
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.transport_error(&e))? {
            if body.len() + chunk.len() > limit {
                return Err(FetchError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, source: &SourceConfig, params: &Map<String, Value>) -> Result<Value, FetchError> {
        Self::check_adapter(source)?;
        let url = request_url(source, params)?;
        let start = Instant::now();

        let response = self
            .http
            .get(url.clone())
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http { status: status.as_u16() });
        }

        let body = self.read_limited(response).await?;
        let value = serde_json::from_slice(&body).map_err(|e| FetchError::Malformed(e.to_string()))?;

        tracing::debug!(
            source_id = %source.source_id,
            host = url.host_str().unwrap_or_default(),
            fetch_ms = start.elapsed().as_millis() as u64,
            bytes = body.len(),
            "fetched upstream data"
        );

        Ok(value)
    }

    /// Reachability check: any response below 500 from `base_url` counts.
    async fn probe(&self, source: &SourceConfig) -> Result<(), FetchError> {
        Self::check_adapter(source)?;
        let url = base_url(source)?;

        let response = self.http.get(url).send().await.map_err(|e| self.transport_error(&e))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(FetchError::Http { status: status.as_u16() });
        }
        Ok(())
    }
}
