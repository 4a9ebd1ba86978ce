//! Cache-aside access to upstream data.
//!
//! A request names a [`DataDomain`] and a parameter map. The orchestrator
//! derives the cache key, serves from cache when it can, and otherwise
//! picks the first active source on the domain's route, fetches, wraps the
//! result in a [`NormalizedPayload`] and caches it for the domain's TTL.
//! Failed fetches are never cached.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::Error;
use crate::cache::{CacheCoordinator, CacheTags, build_key};
use crate::clock::Clock;
use crate::fetch::{FetchError, Fetcher};
use crate::registry::{SourceConfig, SourceRegistry, SourceStatus, SourceUpdate};

/// Kind of data being requested. Doubles as the cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DataDomain {
    Price,
    Historical,
    Fundamentals,
    CorporateProfile,
    EconomicIndicator,
}

impl DataDomain {
    pub const ALL: [DataDomain; 5] = [
        DataDomain::Price,
        DataDomain::Historical,
        DataDomain::Fundamentals,
        DataDomain::CorporateProfile,
        DataDomain::EconomicIndicator,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataDomain::Price => "price",
            DataDomain::Historical => "historical",
            DataDomain::Fundamentals => "fundamentals",
            DataDomain::CorporateProfile => "corporate_profile",
            DataDomain::EconomicIndicator => "economic_indicator",
        }
    }

    /// Map a financial `data_type` label onto a domain.
    pub fn from_financial_data_type(data_type: &str) -> Result<Self, Error> {
        match data_type {
            "prices" | "price" | "realtime" => Ok(DataDomain::Price),
            "historical" => Ok(DataDomain::Historical),
            "fundamentals" => Ok(DataDomain::Fundamentals),
            "company_profile" | "profile" => Ok(DataDomain::CorporateProfile),
            other => Err(Error::InvalidInput(format!("unsupported financial data type {other:?}"))),
        }
    }
}

impl fmt::Display for DataDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataDomain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataDomain::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown data domain {s:?}")))
    }
}

/// Cache lifetime per domain, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlPolicy {
    #[serde(default = "default_price_ttl")]
    pub price: u64,
    #[serde(default = "default_long_ttl")]
    pub historical: u64,
    #[serde(default = "default_medium_ttl")]
    pub fundamentals: u64,
    #[serde(default = "default_medium_ttl")]
    pub corporate_profile: u64,
    #[serde(default = "default_long_ttl")]
    pub economic_indicator: u64,
}

fn default_price_ttl() -> u64 {
    900
}

fn default_medium_ttl() -> u64 {
    3_600
}

fn default_long_ttl() -> u64 {
    86_400
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            price: default_price_ttl(),
            historical: default_long_ttl(),
            fundamentals: default_medium_ttl(),
            corporate_profile: default_medium_ttl(),
            economic_indicator: default_long_ttl(),
        }
    }
}

impl TtlPolicy {
    pub fn ttl_for(&self, domain: DataDomain) -> u64 {
        match domain {
            DataDomain::Price => self.price,
            DataDomain::Historical => self.historical,
            DataDomain::Fundamentals => self.fundamentals,
            DataDomain::CorporateProfile => self.corporate_profile,
            DataDomain::EconomicIndicator => self.economic_indicator,
        }
    }
}

/// Ordered source preference per domain.
pub fn default_routes() -> BTreeMap<DataDomain, Vec<String>> {
    let route = |ids: &[&str]| ids.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    BTreeMap::from([
        (DataDomain::Price, route(&["yahoo_finance", "fred"])),
        (DataDomain::Historical, route(&["yahoo_finance", "fred"])),
        (DataDomain::Fundamentals, route(&["sec_edgar", "yahoo_finance"])),
        (DataDomain::CorporateProfile, route(&["sec_edgar", "yahoo_finance"])),
        (DataDomain::EconomicIndicator, route(&["fred", "worldbank"])),
    ])
}

/// What gets cached and returned for a successful fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPayload {
    pub domain: DataDomain,
    pub source_id: String,
    pub fetched_at: DateTime<Utc>,
    pub payload: Value,
}

/// Result of [`DataAccessOrchestrator::fetch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataResponse {
    /// `"cache"` or the id of the source that served the request.
    pub source: String,
    pub cached: bool,
    pub cache_key: String,
    pub data: NormalizedPayload,
}

pub const CACHE_ORIGIN: &str = "cache";

/// Ties the cache, the registry and a [`Fetcher`] together.
pub struct DataAccessOrchestrator {
    cache: Arc<CacheCoordinator>,
    registry: Arc<SourceRegistry>,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    routes: BTreeMap<DataDomain, Vec<String>>,
    ttl: TtlPolicy,
    deactivate_after_errors: Option<u32>,
}

impl fmt::Debug for DataAccessOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataAccessOrchestrator")
            .field("routes", &self.routes)
            .field("ttl", &self.ttl)
            .field("deactivate_after_errors", &self.deactivate_after_errors)
            .finish_non_exhaustive()
    }
}

impl DataAccessOrchestrator {
    pub fn new(
        cache: Arc<CacheCoordinator>, registry: Arc<SourceRegistry>, fetcher: Arc<dyn Fetcher>, clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache,
            registry,
            fetcher,
            clock,
            routes: default_routes(),
            ttl: TtlPolicy::default(),
            deactivate_after_errors: None,
        }
    }

    /// Replace the route for each domain present in `routes`.
    pub fn with_routes(mut self, routes: BTreeMap<DataDomain, Vec<String>>) -> Self {
        self.routes.extend(routes);
        self
    }

    pub fn with_ttl_policy(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    /// Mark a source `inactive` once its error counter reaches `limit`.
    pub fn with_deactivate_after_errors(mut self, limit: Option<u32>) -> Self {
        self.deactivate_after_errors = limit;
        self
    }

    pub fn routes(&self) -> &BTreeMap<DataDomain, Vec<String>> {
        &self.routes
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }

    /// Cache-aside fetch.
    ///
    /// # Errors
    ///
    /// - `Error::SourceNotConfigured` if no active source serves `domain`
    /// - `Error::FetchFailed` if the chosen source fails; the cache is not
    ///   touched
    /// - `Error::StoreUnavailable` if the registry cannot be read
    pub async fn fetch(
        &self, domain: DataDomain, params: &Map<String, Value>, force_refresh: bool,
    ) -> Result<DataResponse, Error> {
        let cache_key = build_key(domain.as_str(), params);

        if !force_refresh && let Some(data) = self.cache.get::<NormalizedPayload>(&cache_key).await {
            tracing::debug!(domain = %domain, key = %cache_key, "served from cache");
            return Ok(DataResponse { source: CACHE_ORIGIN.to_string(), cached: true, cache_key, data });
        }

        let source = self.select_source(domain).await?;
        let source_id = source.source_id.clone();

        let raw = match self.fetcher.fetch(&source, params).await {
            Ok(raw) => raw,
            Err(e) => {
                self.note_failure(&source_id, &e).await;
                return Err(Error::FetchFailed { source_id, message: e.to_string() });
            }
        };

        if let Err(e) = self.registry.record_success(&source_id).await {
            tracing::warn!(source_id = %source_id, error = %e, "could not record source success");
        }

        let data = NormalizedPayload { domain, source_id: source_id.clone(), fetched_at: self.clock.now(), payload: raw };
        let ttl = self.ttl.ttl_for(domain);
        let tags = CacheTags::new(source_id.clone(), domain.as_str());

        if let Err(e) = self.cache.set_tagged(&cache_key, &data, ttl, tags).await {
            tracing::warn!(key = %cache_key, error = %e, "fetched data was not cached");
        }

        tracing::debug!(domain = %domain, source_id = %source_id, ttl, "fetched from source");
        Ok(DataResponse { source: source_id, cached: false, cache_key, data })
    }

    /// Prices, historical series, fundamentals or a profile for `symbol`.
    pub async fn get_financial_data(
        &self, symbol: &str, data_type: &str, start_date: Option<&str>, end_date: Option<&str>, force_refresh: bool,
    ) -> Result<DataResponse, Error> {
        if symbol.trim().is_empty() {
            return Err(Error::InvalidInput("symbol cannot be empty".into()));
        }
        let domain = DataDomain::from_financial_data_type(data_type)?;
        let params = as_params(json!({
            "symbol": symbol,
            "data_type": data_type,
            "start_date": start_date,
            "end_date": end_date,
        }));
        self.fetch(domain, &params, force_refresh).await
    }

    /// Macro indicators for `country`. Indicator order does not matter.
    pub async fn get_economic_indicators(
        &self, indicators: &[String], country: &str, start_date: Option<&str>, end_date: Option<&str>,
        force_refresh: bool,
    ) -> Result<DataResponse, Error> {
        if indicators.is_empty() {
            return Err(Error::InvalidInput("at least one indicator is required".into()));
        }
        let params = as_params(json!({
            "indicators": sorted_unique(indicators),
            "country": country,
            "start_date": start_date,
            "end_date": end_date,
        }));
        self.fetch(DataDomain::EconomicIndicator, &params, force_refresh).await
    }

    /// Company profile fields for `symbol`. Field order does not matter.
    pub async fn get_corporate_data(
        &self, symbol: &str, fields: &[String], force_refresh: bool,
    ) -> Result<DataResponse, Error> {
        if symbol.trim().is_empty() {
            return Err(Error::InvalidInput("symbol cannot be empty".into()));
        }
        let params = as_params(json!({ "symbol": symbol, "fields": sorted_unique(fields) }));
        self.fetch(DataDomain::CorporateProfile, &params, force_refresh).await
    }

    /// Cache and registry both usable.
    pub async fn healthy(&self) -> bool {
        self.cache.health_check().await && self.registry.healthy().await
    }

    /// First active source on the domain's route, falling back to any
    /// active source registered for the domain.
    async fn select_source(&self, domain: DataDomain) -> Result<SourceConfig, Error> {
        let mut active: BTreeMap<String, SourceConfig> = self
            .registry
            .list_active()
            .await
            .map_err(Error::into_store_unavailable)?
            .into_iter()
            .map(|s| (s.source_id.clone(), s))
            .collect();

        if let Some(route) = self.routes.get(&domain) {
            for id in route {
                if let Some(source) = active.remove(id) {
                    return Ok(source);
                }
            }
        }

        active
            .into_values()
            .find(|s| s.domain_type == domain.as_str())
            .ok_or_else(|| Error::SourceNotConfigured(format!("no active source for domain {domain}")))
    }

    async fn note_failure(&self, source_id: &str, err: &FetchError) {
        tracing::warn!(source_id, error = %err, "fetch failed");

        let count = match self.registry.record_failure(source_id, &err.to_string()).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(source_id, error = %e, "could not record source failure");
                return;
            }
        };

        if let Some(limit) = self.deactivate_after_errors
            && count >= limit
        {
            let update = SourceUpdate { status: Some(SourceStatus::Inactive), ..Default::default() };
            match self.registry.update(source_id, update).await {
                Ok(_) => tracing::warn!(source_id, error_count = count, "source deactivated after repeated errors"),
                Err(e) => tracing::warn!(source_id, error = %e, "could not deactivate source"),
            }
        }
    }
}

fn as_params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn sorted_unique(items: &[String]) -> Vec<String> {
    let mut out = items.to_vec();
    out.sort();
    out.dedup();
    out
}
