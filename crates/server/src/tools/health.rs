//! health_check tool implementation.

use datahub_core::DataHub;
use rmcp::{ErrorData as McpError, model::CallToolResult};

use super::json_result;

/// Implementation of the health_check tool. An unhealthy hub is still a
/// successful call; the report says what is down.
pub async fn health_impl(hub: &DataHub) -> Result<CallToolResult, McpError> {
    let report = hub.health_check().await;
    json_result(&report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{hub_with, output, seed};
    use datahub_core::{HealthReport, HealthStatus};

    #[tokio::test]
    async fn test_health_report() {
        let hub = hub_with(vec![seed("fred", "economic_indicator")]).await;
        let report: HealthReport = output(&health_impl(&hub).await.unwrap());
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.active_sources, 1);
    }

    #[tokio::test]
    async fn test_unhealthy_without_sources() {
        let hub = hub_with(vec![]).await;
        let report: HealthReport = output(&health_impl(&hub).await.unwrap());
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report.components.durable_tier);
        assert!(!report.components.source_registry);
    }
}
