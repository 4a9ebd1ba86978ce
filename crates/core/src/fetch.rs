//! Contract for upstream data fetchers.
//!
//! The hub never talks to a provider directly. It hands a registered
//! [`SourceConfig`] and the request parameters to a [`Fetcher`] and caches
//! whatever JSON comes back.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::registry::SourceConfig;

/// Failure reported by a [`Fetcher`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The source's `config` map lacks something the fetcher needs.
    #[error("source misconfigured: {0}")]
    Misconfigured(String),

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("upstream returned HTTP {status}")]
    Http { status: u16 },

    #[error("response exceeds {limit} bytes")]
    TooLarge { limit: usize },

    /// The upstream answered but the body is not usable JSON.
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("upstream unavailable: {0}")]
    Unavailable(String),
}

/// Retrieves data from an upstream source.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch data for `params` from `source`.
    async fn fetch(&self, source: &SourceConfig, params: &Map<String, Value>) -> Result<Value, FetchError>;

    /// Cheap liveness probe against `source`.
    async fn probe(&self, source: &SourceConfig) -> Result<(), FetchError>;
}
