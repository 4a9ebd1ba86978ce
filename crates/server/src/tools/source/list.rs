//! source_list tool implementation.

use datahub_core::registry::RegistryStats;
use datahub_core::{DataHub, SourceConfig, SourceStatus};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::json_result;

/// Parameters for the source_list tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SourceListParams {
    /// Only sources serving this domain type.
    #[serde(default)]
    pub domain_type: Option<String>,

    /// Only sources in the `active` state.
    #[serde(default)]
    pub active_only: bool,
}

/// Output from the source_list tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceListOutput {
    pub sources: Vec<SourceConfig>,
    pub statistics: RegistryStats,
}

/// Implementation of the source_list tool.
pub async fn list_impl(hub: &DataHub, params: SourceListParams) -> Result<CallToolResult, McpError> {
    let registry = hub.registry();
    let mut sources = match &params.domain_type {
        Some(domain_type) => registry.list_by_domain(domain_type).await?,
        None if params.active_only => registry.list_active().await?,
        None => registry.list_all().await?,
    };
    if params.active_only {
        sources.retain(|s| s.status == SourceStatus::Active);
    }

    let statistics = registry.statistics().await?;
    json_result(&SourceListOutput { sources, statistics })
}
