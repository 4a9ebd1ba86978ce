//! Configuration validation rules.
//!
//! This module provides validation logic for `HubConfig` values
//! after they have been loaded from environment, files, or defaults.

use std::collections::HashSet;

use crate::cache::MAX_TTL_SECS;
use crate::config::HubConfig;
use crate::orchestrator::DataDomain;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl HubConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `volatile_capacity` or `stats_window_hours` is 0
    /// - any domain TTL is 0
    /// - `max_bytes` is 0 or exceeds 50MB
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` is empty
    /// - `deactivate_after_errors` is 0
    /// - a route names an unknown domain or lists no sources
    /// - a seed source is missing a required field or repeats an id
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.volatile_capacity == 0 {
            return Err(invalid("volatile_capacity", "must be greater than 0"));
        }
        if self.stats_window_hours == 0 {
            return Err(invalid("stats_window_hours", "must be greater than 0"));
        }

        for domain in DataDomain::ALL {
            let ttl = self.ttl.ttl_for(domain);
            if ttl == 0 {
                return Err(invalid(format!("ttl.{domain}"), "must be greater than 0"));
            }
            if ttl > MAX_TTL_SECS {
                return Err(invalid(format!("ttl.{domain}"), format!("must not exceed {MAX_TTL_SECS} seconds")));
            }
        }

        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }
        if self.max_bytes > 50 * 1024 * 1024 {
            return Err(invalid("max_bytes", "must not exceed 50MB"));
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.deactivate_after_errors == Some(0) {
            return Err(invalid("deactivate_after_errors", "must be at least 1 when set"));
        }

        for (name, ids) in &self.routes {
            if name.parse::<DataDomain>().is_err() {
                return Err(invalid(format!("routes.{name}"), "unknown data domain"));
            }
            if ids.is_empty() {
                return Err(invalid(format!("routes.{name}"), "must list at least one source"));
            }
        }

        let mut seen = HashSet::new();
        for (i, source) in self.sources.iter().enumerate() {
            let required = [
                ("source_id", &source.source_id),
                ("name", &source.name),
                ("domain_type", &source.domain_type),
                ("adapter_ref", &source.adapter_ref),
            ];
            for (field, value) in required {
                if value.trim().is_empty() {
                    return Err(ConfigError::Missing {
                        field: format!("sources[{i}].{field}"),
                        hint: "every seed source needs source_id, name, domain_type and adapter_ref".into(),
                    });
                }
            }
            if !seen.insert(source.source_id.as_str()) {
                return Err(invalid(format!("sources[{i}].source_id"), format!("duplicate id {}", source.source_id)));
            }
        }

        if self.sweep_interval_secs == 0 {
            tracing::warn!("sweep_interval_secs is 0; expired entries are only removed on read or by cache_sweep");
        }

        Ok(())
    }
}
