//! cache_get tool implementation.
//!
//! Retrieves the cached JSON stored under a key.

use datahub_core::{DataHub, Error};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::json_result;

/// Parameters for the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetParams {
    /// The cache key, as returned in `cache_key` by data_fetch.
    pub key: String,
}

/// Output from the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheGetOutput {
    pub key: String,
    pub value: Value,
}

/// Implementation of the cache_get tool.
pub async fn get_impl(hub: &DataHub, params: CacheGetParams) -> Result<CallToolResult, McpError> {
    if params.key.is_empty() {
        return Err(Error::InvalidInput("key cannot be empty".into()).into());
    }

    let value = hub
        .cache()
        .get::<Value>(&params.key)
        .await
        .ok_or_else(|| Error::CacheMiss(params.key.clone()))?;

    json_result(&CacheGetOutput { key: params.key, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{hub_with, output};
    use serde_json::json;

    #[tokio::test]
    async fn test_get_impl_missing() {
        let hub = hub_with(vec![]).await;
        let params = CacheGetParams { key: "price:NOPE".to_string() };

        let err = get_impl(&hub, params).await.unwrap_err();
        assert_eq!(err.code.0, -32001);
    }

    #[tokio::test]
    async fn test_get_impl_found() {
        let hub = hub_with(vec![]).await;
        hub.cache().set("fx:EURUSD", &json!({"rate": 1.09}), 60).await.unwrap();

        let result = get_impl(&hub, CacheGetParams { key: "fx:EURUSD".into() }).await.unwrap();
        let out: CacheGetOutput = output(&result);
        assert_eq!(out.key, "fx:EURUSD");
        assert_eq!(out.value, json!({"rate": 1.09}));
    }

    #[tokio::test]
    async fn test_get_impl_empty_key() {
        let hub = hub_with(vec![]).await;
        let err = get_impl(&hub, CacheGetParams { key: String::new() }).await.unwrap_err();
        assert_eq!(err.code.0, -32602);
    }
}
