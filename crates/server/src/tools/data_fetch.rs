//! data_fetch tool implementation.
//!
//! Cache-aside read of one data domain through the orchestrator.

use datahub_core::{DataDomain, DataHub};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::json_result;

/// Parameters for the data_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DataFetchParams {
    /// Data domain: price, historical, fundamentals, corporate_profile or economic_indicator.
    pub domain: DataDomain,

    /// Request parameters passed to the source (symbol, dates, ...).
    /// They also form the cache key, so their order does not matter.
    #[serde(default)]
    pub params: Map<String, Value>,

    /// Skip the cache and go to the source.
    #[serde(default)]
    pub force_refresh: bool,
}

/// Implementation of the data_fetch tool. Returns the `DataResponse`.
pub async fn fetch_impl(hub: &DataHub, params: DataFetchParams) -> Result<CallToolResult, McpError> {
    let response = hub
        .orchestrator()
        .fetch(params.domain, &params.params, params.force_refresh)
        .await?;

    json_result(&response)
}
