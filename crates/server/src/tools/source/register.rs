//! source_register tool implementation.

use datahub_core::{DataHub, NewSource};
use rmcp::{ErrorData as McpError, model::CallToolResult};

use crate::tools::json_result;

/// Implementation of the source_register tool. Returns the stored source.
pub async fn register_impl(hub: &DataHub, params: NewSource) -> Result<CallToolResult, McpError> {
    let source = hub.registry().register(params).await?;
    json_result(&source)
}
