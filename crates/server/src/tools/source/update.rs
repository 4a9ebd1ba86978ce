//! source_update and source_remove tool implementations.

use datahub_core::{DataHub, SourceUpdate};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::json_result;

/// Parameters for the source_update tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SourceUpdateParams {
    pub source_id: String,

    /// Fields to change. Config keys are merged; a null value removes a key.
    #[serde(flatten)]
    pub update: SourceUpdate,
}

/// Parameters for the source_remove tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SourceRemoveParams {
    pub source_id: String,
}

/// Output from the source_remove tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRemoveOutput {
    /// False when no such source was registered.
    pub removed: bool,
}

/// Implementation of the source_update tool. Returns the updated source.
pub async fn update_impl(hub: &DataHub, params: SourceUpdateParams) -> Result<CallToolResult, McpError> {
    let source = hub.registry().update(&params.source_id, params.update).await?;
    json_result(&source)
}

/// Implementation of the source_remove tool.
pub async fn remove_impl(hub: &DataHub, params: SourceRemoveParams) -> Result<CallToolResult, McpError> {
    let removed = hub.registry().remove(&params.source_id).await?;
    json_result(&SourceRemoveOutput { removed })
}
