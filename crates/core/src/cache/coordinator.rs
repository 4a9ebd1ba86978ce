//! Two-tier cache front: volatile first, durable behind it.
//!
//! Store failures stop here. Reads degrade to misses, invalidations to
//! `false`, and writes surface `StoreUnavailable` or `Serialization`
//! without leaking the underlying SQL error.

use bytes::Bytes;
use chrono::Duration;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;

use super::codec::CodecChain;
use super::connection::HubDb;
use super::durable::{DEFAULT_CACHE_TYPE, DurableTier, EntryWrite};
use super::volatile::VolatileTier;
use crate::Error;
use crate::clock::{Clock, is_storable};

/// Longest TTL a cache write accepts: 100 years.
pub const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Tags stored alongside a durable entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTags {
    pub source_id: Option<String>,
    pub cache_type: String,
}

impl Default for CacheTags {
    fn default() -> Self {
        Self { source_id: None, cache_type: DEFAULT_CACHE_TYPE.to_string() }
    }
}

impl CacheTags {
    pub fn new(source_id: impl Into<String>, cache_type: impl Into<String>) -> Self {
        Self { source_id: Some(source_id.into()), cache_type: cache_type.into() }
    }
}

/// Aggregated view over both tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub volatile_entries: usize,
    pub volatile_capacity: usize,
    pub durable_entries: u64,
    pub durable_bytes: u64,
    pub expired_entries: u64,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, or 0 with no traffic.
    pub hit_rate: f64,
    pub window_hours: i64,
}

/// A key that failed during a batch write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub key: String,
    pub error: String,
}

/// Per-key result of [`CacheCoordinator::batch_set`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub stored: Vec<String>,
    pub failed: Vec<BatchFailure>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Unified cache over a [`VolatileTier`] and a [`DurableTier`].
#[derive(Debug)]
pub struct CacheCoordinator {
    volatile: VolatileTier,
    durable: DurableTier,
    codecs: CodecChain,
    clock: Arc<dyn Clock>,
    stats_window: Duration,
}

impl CacheCoordinator {
    pub fn new(db: HubDb, clock: Arc<dyn Clock>, volatile_capacity: usize, stats_window: Duration) -> Self {
        Self {
            volatile: VolatileTier::new(volatile_capacity),
            durable: DurableTier::new(db, clock.clone()),
            codecs: CodecChain::default(),
            clock,
            stats_window,
        }
    }

    pub fn volatile(&self) -> &VolatileTier {
        &self.volatile
    }

    pub fn durable(&self) -> &DurableTier {
        &self.durable
    }

    /// Look up `key`, volatile tier first.
    ///
    /// A live durable entry is copied back into the volatile tier. Absent,
    /// expired, undecodable and unreachable entries all come back as `None`.
    /// A payload that does not decode as `T` is left in place and logged as
    /// a miss, since another caller may read it as a different type.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = self.clock.now();

        if let Some(bytes) = self.volatile.get(key, now) {
            match self.codecs.decode::<T>(&bytes) {
                Ok(value) => {
                    tracing::debug!(key, tier = "volatile", "cache hit");
                    return Some(value);
                }
                Err(e) => tracing::debug!(key, error = %e, "volatile entry did not decode, checking durable tier"),
            }
        }

        let entry = match self.durable.peek(key).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key, error = %e, "durable lookup failed, treating as miss");
                return None;
            }
        };

        let decoded = match entry {
            None => {
                tracing::debug!(key, "cache miss");
                None
            }
            Some(entry) if entry.is_expired(now) => {
                tracing::debug!(key, expires_at = %entry.expires_at, "durable entry expired");
                None
            }
            Some(entry) => match self.codecs.decode::<T>(&entry.payload) {
                Ok(value) => Some((value, entry)),
                Err(e) => {
                    tracing::warn!(key, error = %e, "durable entry could not be decoded");
                    None
                }
            },
        };

        let hit = decoded.is_some();
        if let Err(e) = self.durable.record_read(key, hit).await {
            tracing::warn!(key, error = %e, "failed to record cache read");
        }

        let (value, entry) = decoded?;
        self.volatile.set(key, Bytes::from(entry.payload), entry.expires_at);
        tracing::debug!(key, tier = "durable", "cache hit");
        Some(value)
    }

    /// Store `value` under `key` for `ttl_secs` with default tags.
    pub async fn set<T>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<(), Error>
    where
        T: Serialize + DeserializeOwned,
    {
        self.set_tagged(key, value, ttl_secs, CacheTags::default()).await
    }

    /// Store `value` under `key` for `ttl_secs`, tagging the durable row.
    ///
    /// The value is encoded before either tier is touched, so a
    /// serialization failure leaves any previous entry intact. If the
    /// durable write fails the volatile copy is removed again.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidInput` for an empty key, a zero TTL, a TTL above
    ///   [`MAX_TTL_SECS`], or an expiry past year 9999
    /// - `Error::Serialization` when no codec can carry the value
    /// - `Error::StoreUnavailable` when the durable write fails
    pub async fn set_tagged<T>(&self, key: &str, value: &T, ttl_secs: u64, tags: CacheTags) -> Result<(), Error>
    where
        T: Serialize + DeserializeOwned,
    {
        if key.is_empty() {
            return Err(Error::InvalidInput("cache key cannot be empty".into()));
        }
        let ttl = i64::try_from(ttl_secs)
            .ok()
            .filter(|secs| *secs > 0 && ttl_secs <= MAX_TTL_SECS)
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                Error::InvalidInput(format!("ttl must be between 1 and {MAX_TTL_SECS} seconds, got {ttl_secs}"))
            })?;

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(ttl)
            .filter(is_storable)
            .ok_or_else(|| Error::InvalidInput(format!("ttl {ttl_secs}s expires past year 9999")))?;

        let payload = match self.codecs.encode(value) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                tracing::error!(key, error = %e, "cache set failed, value left unchanged");
                return Err(e);
            }
        };

        if let Some(evicted) = self.volatile.set(key, payload.clone(), expires_at) {
            tracing::debug!(key, evicted = %evicted, "volatile tier full, evicted oldest entry");
        }

        let write = EntryWrite {
            key: key.to_owned(),
            payload: payload.to_vec(),
            expires_at,
            source_id: tags.source_id,
            cache_type: tags.cache_type,
        };

        if let Err(e) = self.durable.set(write).await {
            self.volatile.remove(key);
            tracing::warn!(key, error = %e, "durable write failed, volatile entry rolled back");
            return Err(e.into_store_unavailable());
        }

        tracing::debug!(key, ttl_secs, "cache set");
        Ok(())
    }

    /// Remove `key` from both tiers. True if either tier held it.
    pub async fn invalidate(&self, key: &str) -> bool {
        let volatile = self.volatile.remove(key);
        let durable = match self.durable.delete(key).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(key, error = %e, "durable delete failed");
                false
            }
        };
        volatile || durable
    }

    /// Sweep expired entries from both tiers. Returns the total removed.
    pub async fn sweep_expired(&self) -> u64 {
        let volatile = self.volatile.sweep_expired(self.clock.now()) as u64;
        let durable = match self.durable.sweep_expired().await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "durable sweep failed");
                0
            }
        };
        volatile + durable
    }

    /// Invalidate every entry tagged with `source_id`.
    ///
    /// Returns false if the lookup or any single delete failed; deletes that
    /// did succeed stay applied.
    pub async fn refresh_source(&self, source_id: &str) -> bool {
        let keys = match self.durable.keys_for_source(source_id).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(source_id, error = %e, "could not list keys for source");
                return false;
            }
        };

        let mut all_ok = true;
        for key in &keys {
            self.volatile.remove(key);
            if let Err(e) = self.durable.delete(key).await {
                tracing::warn!(source_id, key = %key, error = %e, "durable delete failed during refresh");
                all_ok = false;
            }
        }

        tracing::info!(source_id, invalidated = keys.len(), "refreshed source");
        all_ok
    }

    /// Look up each key independently, preserving input order.
    pub async fn batch_get<T: DeserializeOwned>(&self, keys: &[String]) -> Vec<(String, Option<T>)> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push((key.clone(), self.get(key).await));
        }
        out
    }

    /// Store each entry independently. Not atomic: earlier successes are
    /// kept when a later key fails.
    pub async fn batch_set<T>(&self, entries: &[(String, T)], ttl_secs: u64) -> BatchOutcome
    where
        T: Serialize + DeserializeOwned,
    {
        let mut outcome = BatchOutcome::default();
        for (key, value) in entries {
            match self.set(key, value, ttl_secs).await {
                Ok(()) => outcome.stored.push(key.clone()),
                Err(e) => outcome.failed.push(BatchFailure { key: key.clone(), error: e.to_string() }),
            }
        }
        outcome
    }

    /// Tier sizes plus hit/miss counts over the configured window.
    pub async fn stats(&self) -> Result<CacheStats, Error> {
        let durable = self.durable.stats(self.stats_window).await.map_err(Error::into_store_unavailable)?;
        let lookups = durable.hit_count + durable.miss_count;
        let hit_rate = if lookups == 0 { 0.0 } else { durable.hit_count as f64 / lookups as f64 };

        Ok(CacheStats {
            volatile_entries: self.volatile.len(),
            volatile_capacity: self.volatile.capacity(),
            durable_entries: durable.total_entries,
            durable_bytes: durable.total_bytes,
            expired_entries: durable.expired_entries,
            hits: durable.hit_count,
            misses: durable.miss_count,
            hit_rate,
            window_hours: self.stats_window.num_hours(),
        })
    }

    /// Persist the current hit rate and sizes into the statistics table.
    pub async fn record_stats_snapshot(&self) -> Result<CacheStats, Error> {
        let stats = self.stats().await?;
        for (stat_type, value) in [
            ("hit_rate", stats.hit_rate),
            ("entry_count", stats.durable_entries as f64),
            ("total_bytes", stats.durable_bytes as f64),
        ] {
            self.durable
                .record_statistic(stat_type, "cache", value)
                .await
                .map_err(Error::into_store_unavailable)?;
        }
        Ok(stats)
    }

    pub async fn health_check(&self) -> bool {
        self.durable.health_check().await
    }
}
