//! Catalog of upstream data sources and their health.
//!
//! Status moves `unknown -> active` on the first success, `-> error` on a
//! failed fetch or test (bumping `error_count`), and back to `active` on the
//! next success with the counter reset. `inactive` is set administratively
//! and is left alone by successes and failures alike.

use chrono::{DateTime, SubsecRound, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, TransactionBehavior};

use crate::Error;
use crate::cache::HubDb;
use crate::clock::{Clock, from_db_timestamp, to_db_timestamp};
use crate::fetch::Fetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Unknown,
    Active,
    Inactive,
    Error,
}

impl SourceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceStatus::Unknown => "unknown",
            SourceStatus::Active => "active",
            SourceStatus::Inactive => "inactive",
            SourceStatus::Error => "error",
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(SourceStatus::Unknown),
            "active" => Ok(SourceStatus::Active),
            "inactive" => Ok(SourceStatus::Inactive),
            "error" => Ok(SourceStatus::Error),
            other => Err(Error::CorruptEntry(format!("unknown source status {other:?}"))),
        }
    }
}

/// Registration payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NewSource {
    /// Unique identifier, e.g. "yahoo_finance"
    pub source_id: String,
    /// Human-readable name
    pub name: String,
    /// Data domain the source serves, e.g. "price"
    pub domain_type: String,
    /// Which fetch adapter handles this source, e.g. "http_json"
    pub adapter_ref: String,
    /// Adapter-specific settings (base_url, path, api_key, ...)
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// Partial update. `None` fields are left unchanged.
///
/// `config` is merged key by key; a `null` value removes that key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub domain_type: Option<String>,
    #[serde(default)]
    pub adapter_ref: Option<String>,
    #[serde(default)]
    pub config: Option<Map<String, Value>>,
    #[serde(default)]
    pub status: Option<SourceStatus>,
}

/// Outcome of the last connection test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub ok: bool,
    pub latency_ms: u64,
    pub message: Option<String>,
}

/// A registered source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub name: String,
    pub domain_type: String,
    pub adapter_ref: String,
    pub config: Map<String, Value>,
    pub status: SourceStatus,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_tested_at: Option<DateTime<Utc>>,
    pub test_result: Option<ConnectionTest>,
}

/// Counts over the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total: u64,
    pub active: u64,
    pub by_domain: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
}

struct RawSource {
    source_id: String,
    name: String,
    domain_type: String,
    adapter_ref: String,
    config_json: String,
    status: String,
    error_count: i64,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
    last_tested_at: Option<String>,
    test_result_json: Option<String>,
}

impl RawSource {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            source_id: row.get(0)?,
            name: row.get(1)?,
            domain_type: row.get(2)?,
            adapter_ref: row.get(3)?,
            config_json: row.get(4)?,
            status: row.get(5)?,
            error_count: row.get(6)?,
            last_error: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            last_tested_at: row.get(10)?,
            test_result_json: row.get(11)?,
        })
    }

    fn into_source(self) -> Result<SourceConfig, Error> {
        let config = serde_json::from_str(&self.config_json)
            .map_err(|e| Error::CorruptEntry(format!("config for {}: {e}", self.source_id)))?;
        let test_result = self
            .test_result_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| Error::CorruptEntry(format!("test result for {}: {e}", self.source_id)))?;

        Ok(SourceConfig {
            status: self.status.parse()?,
            error_count: u32::try_from(self.error_count.max(0)).unwrap_or(u32::MAX),
            created_at: from_db_timestamp(&self.created_at)?,
            updated_at: from_db_timestamp(&self.updated_at)?,
            last_tested_at: self.last_tested_at.as_deref().map(from_db_timestamp).transpose()?,
            config,
            test_result,
            source_id: self.source_id,
            name: self.name,
            domain_type: self.domain_type,
            adapter_ref: self.adapter_ref,
            last_error: self.last_error,
        })
    }
}

const SELECT_SOURCE: &str = "SELECT
    source_id, name, domain_type, adapter_ref, config_json, status,
    error_count, last_error, created_at, updated_at, last_tested_at, test_result_json
FROM data_sources";

fn config_to_json(config: &Map<String, Value>) -> Result<String, Error> {
    serde_json::to_string(config).map_err(|e| Error::Serialization(e.to_string()))
}

fn require(field: &str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Persistent registry of data sources.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    db: HubDb,
    clock: Arc<dyn Clock>,
}

impl SourceRegistry {
    pub fn new(db: HubDb, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Register a new source as `active`.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidInput` if a required field is blank
    /// - `Error::DuplicateSource` if `source_id` is taken; the existing row
    ///   is not modified
    pub async fn register(&self, new: NewSource) -> Result<SourceConfig, Error> {
        require("source_id", &new.source_id)?;
        require("name", &new.name)?;
        require("domain_type", &new.domain_type)?;
        require("adapter_ref", &new.adapter_ref)?;

        let now = self.clock.now().trunc_subsecs(6);
        let ts = to_db_timestamp(&now);
        let config_json = config_to_json(&new.config)?;
        let id = new.source_id.clone();
        let name = new.name.clone();
        let domain_type = new.domain_type.clone();
        let adapter_ref = new.adapter_ref.clone();

        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                let inserted = conn.execute(
                    "INSERT INTO data_sources (
                        source_id, name, domain_type, adapter_ref, config_json,
                        status, error_count, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, 'active', 0, ?6, ?6)",
                    params![id, name, domain_type, adapter_ref, config_json, ts],
                );
                match inserted {
                    Ok(_) => Ok(()),
                    Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                        Err(Error::DuplicateSource(id))
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)?;

        tracing::info!(source_id = %new.source_id, domain = %new.domain_type, "registered data source");

        Ok(SourceConfig {
            source_id: new.source_id,
            name: new.name,
            domain_type: new.domain_type,
            adapter_ref: new.adapter_ref,
            config: new.config,
            status: SourceStatus::Active,
            error_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            last_tested_at: None,
            test_result: None,
        })
    }

    pub async fn get(&self, source_id: &str) -> Result<Option<SourceConfig>, Error> {
        let id = source_id.to_owned();
        let raw = self
            .db
            .conn
            .call(move |conn| -> Result<Option<RawSource>, Error> {
                let sql = format!("{SELECT_SOURCE} WHERE source_id = ?1");
                Ok(conn.query_row(&sql, params![id], RawSource::from_row).optional()?)
            })
            .await
            .map_err(Error::from)?;

        raw.map(RawSource::into_source).transpose()
    }

    /// Merge `update` into an existing source and bump `updated_at`.
    ///
    /// # Errors
    ///
    /// `Error::SourceNotFound` if `source_id` is not registered.
    pub async fn update(&self, source_id: &str, update: SourceUpdate) -> Result<SourceConfig, Error> {
        let required = [("name", &update.name), ("domain_type", &update.domain_type), ("adapter_ref", &update.adapter_ref)];
        for (field, value) in required {
            if let Some(value) = value {
                require(field, value)?;
            }
        }

        let id = source_id.to_owned();
        let ts = to_db_timestamp(&self.clock.now());

        let raw = self
            .db
            .conn
            .call(move |conn| -> Result<RawSource, Error> {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let sql = format!("{SELECT_SOURCE} WHERE source_id = ?1");
                let Some(mut raw) = tx.query_row(&sql, params![id], RawSource::from_row).optional()? else {
                    return Err(Error::SourceNotFound(id));
                };

                if let Some(name) = update.name {
                    raw.name = name;
                }
                if let Some(domain_type) = update.domain_type {
                    raw.domain_type = domain_type;
                }
                if let Some(adapter_ref) = update.adapter_ref {
                    raw.adapter_ref = adapter_ref;
                }
                if let Some(patch) = update.config {
                    let mut config: Map<String, Value> = serde_json::from_str(&raw.config_json)
                        .map_err(|e| Error::CorruptEntry(format!("config for {id}: {e}")))?;
                    for (k, v) in patch {
                        if v.is_null() {
                            config.remove(&k);
                        } else {
                            config.insert(k, v);
                        }
                    }
                    raw.config_json = config_to_json(&config)?;
                }
                if let Some(status) = update.status {
                    raw.status = status.as_str().to_string();
                    if status == SourceStatus::Active {
                        raw.error_count = 0;
                    }
                }
                raw.updated_at = ts;

                tx.execute(
                    "UPDATE data_sources SET
                        name = ?2, domain_type = ?3, adapter_ref = ?4, config_json = ?5,
                        status = ?6, error_count = ?7, updated_at = ?8
                    WHERE source_id = ?1",
                    params![
                        &raw.source_id,
                        &raw.name,
                        &raw.domain_type,
                        &raw.adapter_ref,
                        &raw.config_json,
                        &raw.status,
                        raw.error_count,
                        &raw.updated_at,
                    ],
                )?;
                tx.commit()?;
                Ok(raw)
            })
            .await
            .map_err(Error::from)?;

        tracing::info!(source_id, "updated data source");
        raw.into_source()
    }

    /// Delete a source. Removing an unknown id is not an error.
    pub async fn remove(&self, source_id: &str) -> Result<bool, Error> {
        let id = source_id.to_owned();
        let removed = self
            .db
            .conn
            .call(move |conn| -> Result<bool, Error> {
                Ok(conn.execute("DELETE FROM data_sources WHERE source_id = ?1", params![id])? > 0)
            })
            .await
            .map_err(Error::from)?;

        if removed {
            tracing::info!(source_id, "removed data source");
        }
        Ok(removed)
    }

    async fn list_where(&self, filter: &'static str, arg: Option<String>) -> Result<Vec<SourceConfig>, Error> {
        let raws = self
            .db
            .conn
            .call(move |conn| -> Result<Vec<RawSource>, Error> {
                let sql = format!("{SELECT_SOURCE} {filter} ORDER BY source_id");
                let mut stmt = conn.prepare(&sql)?;
                let rows = match arg {
                    Some(arg) => stmt.query_map(params![arg], RawSource::from_row)?.collect::<rusqlite::Result<Vec<_>>>()?,
                    None => stmt.query_map([], RawSource::from_row)?.collect::<rusqlite::Result<Vec<_>>>()?,
                };
                Ok(rows)
            })
            .await
            .map_err(Error::from)?;

        raws.into_iter().map(RawSource::into_source).collect()
    }

    pub async fn list_all(&self) -> Result<Vec<SourceConfig>, Error> {
        self.list_where("", None).await
    }

    /// Sources with `status = active`, the only ones eligible for fetching.
    pub async fn list_active(&self) -> Result<Vec<SourceConfig>, Error> {
        self.list_where("WHERE status = 'active'", None).await
    }

    pub async fn list_by_domain(&self, domain_type: &str) -> Result<Vec<SourceConfig>, Error> {
        self.list_where("WHERE domain_type = ?1", Some(domain_type.to_owned())).await
    }

    /// Mark a successful use: `error -> active`, counter reset.
    pub async fn record_success(&self, source_id: &str) -> Result<(), Error> {
        let id = source_id.to_owned();
        let ts = to_db_timestamp(&self.clock.now());

        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                let changed = conn.execute(
                    "UPDATE data_sources SET
                        status = CASE WHEN status = 'inactive' THEN 'inactive' ELSE 'active' END,
                        error_count = 0,
                        last_error = NULL,
                        updated_at = ?2
                    WHERE source_id = ?1",
                    params![id, ts],
                )?;
                if changed == 0 {
                    return Err(Error::SourceNotFound(id));
                }
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Mark a failure: status `error`, counter incremented, message kept.
    ///
    /// Returns the new error count.
    pub async fn record_failure(&self, source_id: &str, message: &str) -> Result<u32, Error> {
        let id = source_id.to_owned();
        let message = message.to_owned();
        let ts = to_db_timestamp(&self.clock.now());

        let count = self
            .db
            .conn
            .call(move |conn| -> Result<i64, Error> {
                let tx = conn.transaction()?;
                let changed = tx.execute(
                    "UPDATE data_sources SET
                        status = CASE WHEN status = 'inactive' THEN 'inactive' ELSE 'error' END,
                        error_count = error_count + 1,
                        last_error = ?2,
                        updated_at = ?3
                    WHERE source_id = ?1",
                    params![id, message, ts],
                )?;
                if changed == 0 {
                    return Err(Error::SourceNotFound(id));
                }
                let count =
                    tx.query_row("SELECT error_count FROM data_sources WHERE source_id = ?1", params![id], |row| row.get(0))?;
                tx.commit()?;
                Ok(count)
            })
            .await
            .map_err(Error::from)?;

        tracing::warn!(source_id, error_count = count, "data source failure recorded");
        Ok(u32::try_from(count.max(0)).unwrap_or(u32::MAX))
    }

    /// Probe a source through `fetcher` and record latency and outcome.
    ///
    /// A failed probe is a normal result (`ok: false`), not an error, and
    /// moves the source to `error` like a failed fetch.
    pub async fn test_connection(&self, source_id: &str, fetcher: &dyn Fetcher) -> Result<ConnectionTest, Error> {
        let source = self.get(source_id).await?.ok_or_else(|| Error::SourceNotFound(source_id.to_owned()))?;

        let started = Instant::now();
        let probe = fetcher.probe(&source).await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let result = match &probe {
            Ok(()) => ConnectionTest { ok: true, latency_ms, message: None },
            Err(e) => ConnectionTest { ok: false, latency_ms, message: Some(e.to_string()) },
        };

        let id = source_id.to_owned();
        let ts = to_db_timestamp(&self.clock.now());
        let result_json = serde_json::to_string(&result).map_err(|e| Error::Serialization(e.to_string()))?;
        let ok = result.ok;
        let message = result.message.clone();

        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "UPDATE data_sources SET
                        last_tested_at = ?2,
                        test_result_json = ?3,
                        status = CASE
                            WHEN status = 'inactive' THEN 'inactive'
                            WHEN ?4 THEN 'active'
                            ELSE 'error'
                        END,
                        error_count = CASE WHEN ?4 THEN 0 ELSE error_count + 1 END,
                        last_error = CASE WHEN ?4 THEN NULL ELSE ?5 END
                    WHERE source_id = ?1",
                    params![id, ts, result_json, ok, message],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;

        tracing::info!(source_id, ok, latency_ms, "connection test finished");
        Ok(result)
    }

    /// Store reachable and at least one source active.
    pub async fn healthy(&self) -> bool {
        if !self.db.ping().await {
            return false;
        }
        match self.count_active().await {
            Ok(n) => n > 0,
            Err(e) => {
                tracing::warn!(error = %e, "could not count active sources");
                false
            }
        }
    }

    pub async fn count_active(&self) -> Result<u64, Error> {
        let n: i64 = self
            .db
            .conn
            .call(|conn| -> Result<i64, Error> {
                Ok(conn.query_row("SELECT COUNT(*) FROM data_sources WHERE status = 'active'", [], |row| row.get(0))?)
            })
            .await
            .map_err(Error::from)?;
        Ok(n.max(0) as u64)
    }

    /// Totals per domain and per status.
    pub async fn statistics(&self) -> Result<RegistryStats, Error> {
        let sources = self.list_all().await?;
        let mut stats = RegistryStats { total: sources.len() as u64, ..Default::default() };
        for source in &sources {
            if source.status == SourceStatus::Active {
                stats.active += 1;
            }
            *stats.by_domain.entry(source.domain_type.clone()).or_default() += 1;
            *stats.by_status.entry(source.status.to_string()).or_default() += 1;
        }
        Ok(stats)
    }
}
