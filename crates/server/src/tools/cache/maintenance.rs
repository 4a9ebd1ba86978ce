//! cache_sweep and cache_stats tool implementations.

use datahub_core::cache::{CacheStats, EntrySummary};
use datahub_core::{DataHub, Error};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::json_result;

/// Output from the cache_sweep tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSweepOutput {
    /// Expired entries removed across both tiers.
    pub removed: u64,
}

/// Parameters for the cache_stats tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CacheStatsParams {
    /// Also persist hit rate, entry count and size to the statistics table.
    #[serde(default)]
    pub record: bool,

    /// Also list this many of the largest durable entries.
    #[serde(default)]
    pub largest: Option<usize>,
}

/// Output from the cache_stats tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsOutput {
    #[serde(flatten)]
    pub stats: CacheStats,

    /// Largest entries by payload size, when requested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub largest_entries: Vec<EntrySummary>,
}

/// Implementation of the cache_sweep tool.
pub async fn sweep_impl(hub: &DataHub) -> Result<CallToolResult, McpError> {
    let removed = hub.cache().sweep_expired().await;
    json_result(&CacheSweepOutput { removed })
}

/// Implementation of the cache_stats tool.
pub async fn stats_impl(hub: &DataHub, params: CacheStatsParams) -> Result<CallToolResult, McpError> {
    let stats: CacheStats = if params.record {
        hub.cache().record_stats_snapshot().await?
    } else {
        hub.cache().stats().await?
    };

    let largest_entries = match params.largest {
        Some(limit) if limit > 0 => hub
            .cache()
            .durable()
            .largest_entries(limit)
            .await
            .map_err(Error::into_store_unavailable)?,
        _ => Vec::new(),
    };

    json_result(&CacheStatsOutput { stats, largest_entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{Echo, clock, output};
    use datahub_core::{HubConfig, HubDb};
    use serde_json::{Value, json};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sweep_and_stats() {
        let clock = clock();
        let db = HubDb::open_in_memory().await.unwrap();
        let hub = DataHub::with_db(db, &HubConfig::default(), Arc::new(Echo), clock.clone()).await.unwrap();

        hub.cache().set("short", &json!("a"), 10).await.unwrap();
        hub.cache().set("long", &json!("b"), 3_600).await.unwrap();
        let _ = hub.cache().get::<Value>("long").await;
        clock.advance(chrono::Duration::seconds(11));

        let swept = sweep_impl(&hub).await.unwrap();
        assert_eq!(output::<CacheSweepOutput>(&swept).removed, 2);

        let result = stats_impl(&hub, CacheStatsParams { record: true, largest: None }).await.unwrap();
        let out: CacheStatsOutput = output(&result);
        assert_eq!(out.stats.durable_entries, 1);
        assert_eq!(out.stats.volatile_entries, 1);
        assert!(out.largest_entries.is_empty());

        let recorded = hub
            .cache()
            .durable()
            .recent_statistics("entry_count", chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(recorded.len(), 1);
    }

    #[tokio::test]
    async fn test_stats_lists_largest_entries() {
        let db = HubDb::open_in_memory().await.unwrap();
        let hub = DataHub::with_db(db, &HubConfig::default(), Arc::new(Echo), clock()).await.unwrap();

        hub.cache().set("small", &json!("a"), 600).await.unwrap();
        hub.cache().set("big", &json!("a much longer cached payload"), 600).await.unwrap();
        hub.cache().set("medium", &json!("a medium one"), 600).await.unwrap();

        let result = stats_impl(&hub, CacheStatsParams { record: false, largest: Some(2) }).await.unwrap();
        let out: CacheStatsOutput = output(&result);
        let keys: Vec<&str> = out.largest_entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["big", "medium"]);
        assert_eq!(out.stats.durable_entries, 3);
    }
}
