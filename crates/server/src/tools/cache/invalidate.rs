//! cache_invalidate and cache_refresh_source tool implementations.

use datahub_core::{DataHub, Error};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::json_result;

/// Parameters for the cache_invalidate tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheInvalidateParams {
    /// Key to drop from both cache tiers.
    pub key: String,
}

/// Parameters for the cache_refresh_source tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheRefreshSourceParams {
    /// Every entry written on behalf of this source is dropped.
    pub source_id: String,
}

/// Output from the cache_invalidate tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheInvalidateOutput {
    /// True if either tier held the key. False when it was absent or the
    /// durable delete failed.
    pub removed: bool,
}

/// Output from the cache_refresh_source tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRefreshSourceOutput {
    /// False when the durable store could not list or delete the source's
    /// entries. A source with nothing cached is still `true`.
    pub ok: bool,
}

/// Implementation of the cache_invalidate tool.
pub async fn invalidate_impl(hub: &DataHub, params: CacheInvalidateParams) -> Result<CallToolResult, McpError> {
    if params.key.is_empty() {
        return Err(Error::InvalidInput("key cannot be empty".into()).into());
    }
    let removed = hub.cache().invalidate(&params.key).await;
    json_result(&CacheInvalidateOutput { removed })
}

/// Implementation of the cache_refresh_source tool.
pub async fn refresh_source_impl(
    hub: &DataHub, params: CacheRefreshSourceParams,
) -> Result<CallToolResult, McpError> {
    if params.source_id.trim().is_empty() {
        return Err(Error::InvalidInput("source_id cannot be empty".into()).into());
    }
    let ok = hub.cache().refresh_source(&params.source_id).await;
    json_result(&CacheRefreshSourceOutput { ok })
}
