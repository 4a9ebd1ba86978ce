//! The assembled data hub.
//!
//! [`DataHub`] is built once at startup and passed by reference to whoever
//! needs it; there is no process-wide cache or registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::Error;
use crate::cache::{CacheCoordinator, HubDb};
use crate::clock::Clock;
use crate::config::HubConfig;
use crate::fetch::Fetcher;
use crate::orchestrator::DataAccessOrchestrator;
use crate::registry::{NewSource, SourceRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub durable_tier: bool,
    pub volatile_tier: bool,
    pub source_registry: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: ComponentHealth,
    pub active_sources: u64,
    pub timestamp: DateTime<Utc>,
}

/// Owns every component of the hub.
pub struct DataHub {
    db: HubDb,
    cache: Arc<CacheCoordinator>,
    registry: Arc<SourceRegistry>,
    orchestrator: DataAccessOrchestrator,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for DataHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataHub")
            .field("db", &self.db)
            .field("cache", &self.cache)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl DataHub {
    /// Open the database at `config.db_path` and wire everything up.
    pub async fn open(config: &HubConfig, fetcher: Arc<dyn Fetcher>, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        let db = HubDb::open(&config.db_path).await?;
        Self::with_db(db, config, fetcher, clock).await
    }

    /// Wire up the hub over an already opened database and seed the
    /// configured sources. Seeds that already exist are left as they are.
    pub async fn with_db(
        db: HubDb, config: &HubConfig, fetcher: Arc<dyn Fetcher>, clock: Arc<dyn Clock>,
    ) -> Result<Self, Error> {
        let routes = config.resolved_routes().map_err(|e| Error::InvalidInput(e.to_string()))?;

        let cache = Arc::new(CacheCoordinator::new(
            db.clone(),
            clock.clone(),
            config.volatile_capacity,
            config.stats_window(),
        ));
        let registry = Arc::new(SourceRegistry::new(db.clone(), clock.clone()));
        let orchestrator = DataAccessOrchestrator::new(cache.clone(), registry.clone(), fetcher.clone(), clock.clone())
            .with_routes(routes)
            .with_ttl_policy(config.ttl.clone())
            .with_deactivate_after_errors(config.deactivate_after_errors);

        let hub = Self { db, cache, registry, orchestrator, fetcher, clock };
        hub.seed_sources(&config.sources).await?;
        Ok(hub)
    }

    async fn seed_sources(&self, sources: &[NewSource]) -> Result<(), Error> {
        for source in sources {
            match self.registry.register(source.clone()).await {
                Ok(_) => {}
                Err(Error::DuplicateSource(id)) => tracing::debug!(source_id = %id, "seed source already registered"),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn cache(&self) -> &CacheCoordinator {
        &self.cache
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> &DataAccessOrchestrator {
        &self.orchestrator
    }

    pub fn fetcher(&self) -> &dyn Fetcher {
        self.fetcher.as_ref()
    }

    /// Component-level health.
    pub async fn health_check(&self) -> HealthReport {
        let durable_tier = self.cache.health_check().await;
        let source_registry = self.registry.healthy().await;
        let active_sources = self.registry.count_active().await.unwrap_or(0);
        let components = ComponentHealth { durable_tier, volatile_tier: true, source_registry };

        let status = if components.durable_tier && components.volatile_tier && components.source_registry {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        HealthReport { status, components, active_sources, timestamp: self.clock.now() }
    }

    /// Run `sweep_expired` every `interval` on the current runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = hub.cache.sweep_expired().await;
                tracing::debug!(removed, "periodic sweep finished");
            }
        })
    }

    /// Close the database. Outstanding clones of the handle stop working.
    pub async fn close(self) -> Result<(), Error> {
        self.db.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::fetch::FetchError;
    use crate::orchestrator::DataDomain;
    use crate::registry::{SourceConfig, SourceUpdate};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::{Map, Value, json};

    struct Echo;

    #[async_trait]
    impl Fetcher for Echo {
        async fn fetch(&self, source: &SourceConfig, params: &Map<String, Value>) -> Result<Value, FetchError> {
            Ok(json!({"from": source.source_id, "params": params}))
        }

        async fn probe(&self, _source: &SourceConfig) -> Result<(), FetchError> {
            Ok(())
        }
    }

    fn seed(id: &str, domain: &str) -> NewSource {
        NewSource {
            source_id: id.into(),
            name: id.into(),
            domain_type: domain.into(),
            adapter_ref: "echo".into(),
            config: Map::new(),
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 15, 16, 0, 0).unwrap()))
    }

    #[tokio::test]
    async fn test_seeding_skips_existing_sources() {
        let db = HubDb::open_in_memory().await.unwrap();
        let config = HubConfig { sources: vec![seed("fred", "economic_indicator")], ..Default::default() };

        let hub = DataHub::with_db(db.clone(), &config, Arc::new(Echo), clock()).await.unwrap();
        hub.registry()
            .update("fred", SourceUpdate { name: Some("Renamed".into()), ..Default::default() })
            .await
            .unwrap();

        let again = DataHub::with_db(db, &config, Arc::new(Echo), clock()).await.unwrap();
        assert_eq!(again.registry().get("fred").await.unwrap().unwrap().name, "Renamed");
    }

    #[tokio::test]
    async fn test_health_report() {
        let db = HubDb::open_in_memory().await.unwrap();
        let hub = DataHub::with_db(db, &HubConfig::default(), Arc::new(Echo), clock()).await.unwrap();

        let report = hub.health_check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report.components.durable_tier);
        assert!(!report.components.source_registry);

        hub.registry().register(seed("yahoo_finance", "price")).await.unwrap();
        let report = hub.health_check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.active_sources, 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "healthy");
        assert!(json["components"]["durable_tier"].as_bool().unwrap());
    }

    #[tokio::test]
    async fn test_health_after_close() {
        let db = HubDb::open_in_memory().await.unwrap();
        let config = HubConfig { sources: vec![seed("fred", "economic_indicator")], ..Default::default() };
        let hub = DataHub::with_db(db.clone(), &config, Arc::new(Echo), clock()).await.unwrap();

        db.close().await.unwrap();
        let report = hub.health_check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.components.durable_tier);
        assert_eq!(report.active_sources, 0);
    }

    #[tokio::test]
    async fn test_configured_routes_and_ttl_reach_orchestrator() {
        let db = HubDb::open_in_memory().await.unwrap();
        let mut config = HubConfig {
            sources: vec![seed("worldbank", "economic_indicator"), seed("fred", "economic_indicator")],
            routes: [("economic_indicator".to_string(), vec!["worldbank".to_string()])].into_iter().collect(),
            ..Default::default()
        };
        config.ttl.economic_indicator = 60;
        let clock = clock();
        let hub = DataHub::with_db(db, &config, Arc::new(Echo), clock.clone()).await.unwrap();

        let params = json!({"series": "GDP"}).as_object().cloned().unwrap();
        let response = hub.orchestrator().fetch(DataDomain::EconomicIndicator, &params, false).await.unwrap();
        assert_eq!(response.source, "worldbank");

        clock.advance(chrono::Duration::seconds(61));
        let again = hub.orchestrator().fetch(DataDomain::EconomicIndicator, &params, false).await.unwrap();
        assert!(!again.cached);
    }

    #[tokio::test]
    async fn test_open_file_backed_hub() {
        let dir = tempfile::tempdir().unwrap();
        let config = HubConfig { db_path: dir.path().join("hub.sqlite"), ..Default::default() };
        let hub = DataHub::open(&config, Arc::new(Echo), clock()).await.unwrap();
        assert!(hub.cache().health_check().await);
        hub.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_entries() {
        let db = HubDb::open_in_memory().await.unwrap();
        let clock = clock();
        let hub = Arc::new(DataHub::with_db(db, &HubConfig::default(), Arc::new(Echo), clock.clone()).await.unwrap());
        hub.cache().set("k", &1u8, 10).await.unwrap();
        clock.advance(chrono::Duration::seconds(11));

        let handle = hub.spawn_sweeper(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(hub.cache().volatile().is_empty());
        assert_eq!(hub.cache().durable().stats(chrono::Duration::hours(1)).await.unwrap().total_entries, 0);
        handle.abort();
    }
}
