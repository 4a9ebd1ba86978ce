//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.

use std::sync::Arc;

use datahub_core::{DataHub, NewSource};
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

use crate::tools::{
    cache::{
        CacheGetParams, CacheInvalidateParams, CacheRefreshSourceParams, CacheStatsParams, get_impl, invalidate_impl,
        refresh_source_impl, stats_impl, sweep_impl,
    },
    data_fetch::{DataFetchParams, fetch_impl},
    health::health_impl,
    source::{
        SourceListParams, SourceRemoveParams, SourceTestParams, SourceUpdateParams, list_impl, register_impl,
        remove_impl, test_impl, update_impl,
    },
};

/// The main MCP server handler for the data hub.
#[derive(Clone)]
pub struct DataHubServer {
    hub: Arc<DataHub>,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl DataHubServer {
    /// Create a new server handler over an opened hub.
    pub fn new(hub: Arc<DataHub>) -> Self {
        Self { hub, tool_router: Self::tool_router() }
    }

    #[tool(
        description = "Fetch data for a domain (price, historical, fundamentals, corporate_profile, economic_indicator). Served from cache when fresh, otherwise from the first active source."
    )]
    async fn data_fetch(&self, params: Parameters<DataFetchParams>) -> Result<CallToolResult, McpError> {
        fetch_impl(&self.hub, params.0).await
    }

    #[tool(description = "Read the cached JSON stored under a cache key. Entries stored in a binary encoding read as a miss.")]
    async fn cache_get(&self, params: Parameters<CacheGetParams>) -> Result<CallToolResult, McpError> {
        get_impl(&self.hub, params.0).await
    }

    #[tool(description = "Remove a cache key from both tiers.")]
    async fn cache_invalidate(&self, params: Parameters<CacheInvalidateParams>) -> Result<CallToolResult, McpError> {
        invalidate_impl(&self.hub, params.0).await
    }

    #[tool(description = "Remove every cache entry written on behalf of a source.")]
    async fn cache_refresh_source(
        &self, params: Parameters<CacheRefreshSourceParams>,
    ) -> Result<CallToolResult, McpError> {
        refresh_source_impl(&self.hub, params.0).await
    }

    #[tool(description = "Delete expired entries from both cache tiers. Returns the number removed.")]
    async fn cache_sweep(&self) -> Result<CallToolResult, McpError> {
        sweep_impl(&self.hub).await
    }

    #[tool(description = "Cache sizes and hit/miss counts over the statistics window, optionally with the largest durable entries.")]
    async fn cache_stats(&self, params: Parameters<CacheStatsParams>) -> Result<CallToolResult, McpError> {
        stats_impl(&self.hub, params.0).await
    }

    #[tool(description = "Register a new data source. Fails if the id is already taken.")]
    async fn source_register(&self, params: Parameters<NewSource>) -> Result<CallToolResult, McpError> {
        register_impl(&self.hub, params.0).await
    }

    #[tool(description = "Update a registered source. Config keys are merged; null removes a key.")]
    async fn source_update(&self, params: Parameters<SourceUpdateParams>) -> Result<CallToolResult, McpError> {
        update_impl(&self.hub, params.0).await
    }

    #[tool(description = "Remove a registered source.")]
    async fn source_remove(&self, params: Parameters<SourceRemoveParams>) -> Result<CallToolResult, McpError> {
        remove_impl(&self.hub, params.0).await
    }

    #[tool(description = "List registered sources, optionally by domain type or active only, with registry statistics.")]
    async fn source_list(&self, params: Parameters<SourceListParams>) -> Result<CallToolResult, McpError> {
        list_impl(&self.hub, params.0).await
    }

    #[tool(description = "Probe a source's endpoint and record the result on the source.")]
    async fn source_test(&self, params: Parameters<SourceTestParams>) -> Result<CallToolResult, McpError> {
        test_impl(&self.hub, params.0).await
    }

    #[tool(description = "Health of the durable tier, volatile tier and source registry.")]
    async fn health_check(&self) -> Result<CallToolResult, McpError> {
        health_impl(&self.hub).await
    }
}

impl ServerHandler for DataHubServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "data-hub".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::hub_with;

    #[tokio::test]
    async fn test_all_tools_are_routed() {
        let server = DataHubServer::new(Arc::new(hub_with(vec![]).await));
        let mut names: Vec<String> = server.tool_router.list_all().into_iter().map(|t| t.name.to_string()).collect();
        names.sort();

        assert_eq!(
            names,
            vec![
                "cache_get",
                "cache_invalidate",
                "cache_refresh_source",
                "cache_stats",
                "cache_sweep",
                "data_fetch",
                "health_check",
                "source_list",
                "source_register",
                "source_remove",
                "source_test",
                "source_update",
            ]
        );
    }

    #[tokio::test]
    async fn test_server_info() {
        let info = DataHubServer::new(Arc::new(hub_with(vec![]).await)).get_info();
        assert_eq!(info.server_info.name, "data-hub");
    }
}
