//! Hub configuration with layered loading.
//!
//! Configuration is assembled with figment from, in increasing precedence:
//!
//! 1. Built-in defaults
//! 2. TOML config file (if DATA_HUB_CONFIG_FILE set)
//! 3. Environment variables (DATA_HUB_*, `__` for nesting)

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::orchestrator::{DataDomain, TtlPolicy, default_routes};
use crate::registry::NewSource;

mod validation;

pub use validation::ConfigError;

/// Hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Path to the SQLite database shared by the durable tier and the registry.
    ///
    /// Set via DATA_HUB_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Maximum entries held in the in-process tier.
    #[serde(default = "default_volatile_capacity")]
    pub volatile_capacity: usize,

    /// Trailing window for hit/miss statistics.
    #[serde(default = "default_stats_window_hours")]
    pub stats_window_hours: u32,

    /// Period of the background expiry sweep. 0 disables it.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Deactivate a source after this many consecutive errors.
    #[serde(default)]
    pub deactivate_after_errors: Option<u32>,

    /// User-Agent string for upstream HTTP requests.
    ///
    /// Set via DATA_HUB_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Upstream request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum upstream response size in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Cache lifetime per data domain.
    #[serde(default)]
    pub ttl: TtlPolicy,

    /// Ordered source ids per domain name, overriding the built-in routes.
    #[serde(default)]
    pub routes: BTreeMap<String, Vec<String>>,

    /// Sources registered at startup if not already present.
    #[serde(default)]
    pub sources: Vec<NewSource>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data-hub.sqlite")
}

fn default_volatile_capacity() -> usize {
    1_000
}

fn default_stats_window_hours() -> u32 {
    24
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_user_agent() -> String {
    concat!("data-hub/", env!("CARGO_PKG_VERSION")).into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            volatile_capacity: default_volatile_capacity(),
            stats_window_hours: default_stats_window_hours(),
            sweep_interval_secs: default_sweep_interval_secs(),
            deactivate_after_errors: None,
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_bytes: default_max_bytes(),
            ttl: TtlPolicy::default(),
            routes: BTreeMap::new(),
            sources: Vec::new(),
        }
    }
}

impl HubConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn stats_window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.stats_window_hours))
    }

    /// `None` when the sweeper is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    /// Built-in routes overlaid with the configured ones.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for an unknown domain name.
    pub fn resolved_routes(&self) -> Result<BTreeMap<DataDomain, Vec<String>>, ConfigError> {
        let mut routes = default_routes();
        for (name, ids) in &self.routes {
            let domain = name.parse::<DataDomain>().map_err(|_| ConfigError::Invalid {
                field: format!("routes.{name}"),
                reason: "unknown data domain".into(),
            })?;
            routes.insert(domain, ids.clone());
        }
        Ok(routes)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("DATA_HUB_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("DATA_HUB_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./data-hub.sqlite"));
        assert_eq!(config.volatile_capacity, 1_000);
        assert_eq!(config.stats_window_hours, 24);
        assert_eq!(config.max_bytes, 5_242_880);
        assert_eq!(config.timeout_ms, 20_000);
        assert!(config.user_agent.starts_with("data-hub/"));
        assert_eq!(config.ttl.price, 900);
        assert_eq!(config.ttl.economic_indicator, 86_400);
        assert!(config.deactivate_after_errors.is_none());
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_durations() {
        let config = HubConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(20_000));
        assert_eq!(config.stats_window(), chrono::Duration::hours(24));
        assert_eq!(config.sweep_interval(), Some(Duration::from_secs(300)));

        let off = HubConfig { sweep_interval_secs: 0, ..Default::default() };
        assert_eq!(off.sweep_interval(), None);
    }

    #[test]
    fn test_resolved_routes_overlay_defaults() {
        let config = HubConfig {
            routes: BTreeMap::from([("price".to_string(), vec!["polygon".to_string()])]),
            ..Default::default()
        };
        let routes = config.resolved_routes().unwrap();
        assert_eq!(routes[&DataDomain::Price], vec!["polygon".to_string()]);
        assert_eq!(routes[&DataDomain::EconomicIndicator], vec!["fred".to_string(), "worldbank".to_string()]);
    }

    #[test]
    fn test_toml_layer_with_sources() {
        let toml = r#"
            volatile_capacity = 50
            deactivate_after_errors = 3

            [ttl]
            price = 60

            [routes]
            economic_indicator = ["worldbank"]

            [[sources]]
            source_id = "fred"
            name = "FRED"
            domain_type = "economic_indicator"
            adapter_ref = "http_json"
            config = { base_url = "https://api.stlouisfed.org/fred", path = "series/observations" }
        "#;

        let figment = Figment::from(Serialized::defaults(HubConfig::default())).merge(Toml::string(toml));
        let config = HubConfig::extract(figment).unwrap();

        assert_eq!(config.volatile_capacity, 50);
        assert_eq!(config.deactivate_after_errors, Some(3));
        assert_eq!(config.ttl.price, 60);
        assert_eq!(config.ttl.fundamentals, 3_600);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].config["path"], "series/observations");
        assert_eq!(config.resolved_routes().unwrap()[&DataDomain::EconomicIndicator], vec!["worldbank".to_string()]);
    }

    #[test]
    fn test_invalid_layer_is_rejected() {
        let figment = Figment::from(Serialized::defaults(HubConfig::default())).merge(Toml::string("volatile_capacity = 0"));
        assert!(matches!(HubConfig::extract(figment), Err(ConfigError::Invalid { field, .. }) if field == "volatile_capacity"));
    }
}
