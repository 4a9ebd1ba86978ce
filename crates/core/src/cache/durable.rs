//! Persistent cache tier on SQLite.
//!
//! Holds [`CacheEntry`] rows plus the append-only access log and the
//! generic statistics table. Each public mutation runs in a single
//! transaction together with its access-log rows, so concurrent writers
//! (including other processes sharing the file) never interleave a
//! read-modify-write.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, TransactionBehavior};

use super::connection::HubDb;
use crate::Error;
use crate::clock::{Clock, from_db_timestamp, is_storable, to_db_timestamp};

/// Default `cache_type` tag for untagged writes.
pub const DEFAULT_CACHE_TYPE: &str = "general";

/// Kind of access recorded in the access log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    Hit,
    Miss,
    Set,
    Delete,
    Expire,
}

impl AccessType {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessType::Hit => "hit",
            AccessType::Miss => "miss",
            AccessType::Set => "set",
            AccessType::Delete => "delete",
            AccessType::Expire => "expire",
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hit" => Ok(AccessType::Hit),
            "miss" => Ok(AccessType::Miss),
            "set" => Ok(AccessType::Set),
            "delete" => Ok(AccessType::Delete),
            "expire" => Ok(AccessType::Expire),
            other => Err(Error::CorruptEntry(format!("unknown access type {other:?}"))),
        }
    }
}

/// A persisted cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub size_bytes: u64,
    pub source_id: Option<String>,
    pub cache_type: String,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Input to [`DurableTier::set`]. `size_bytes` is derived from the payload.
#[derive(Debug, Clone)]
pub struct EntryWrite {
    pub key: String,
    pub payload: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    pub source_id: Option<String>,
    pub cache_type: String,
}

/// One row of the access log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub key: String,
    pub access_type: AccessType,
    pub timestamp: DateTime<Utc>,
}

/// Aggregates over the durable tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DurableStats {
    pub total_entries: u64,
    pub total_bytes: u64,
    /// Rows past `expires_at` that no sweep has removed yet.
    pub expired_entries: u64,
    pub hit_count: u64,
    pub miss_count: u64,
}

/// A row of the generic statistics table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatRecord {
    pub stat_type: String,
    pub stat_key: String,
    pub stat_value: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Size/usage summary of an entry, without its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub key: String,
    pub size_bytes: u64,
    pub access_count: u64,
    pub created_at: DateTime<Utc>,
    pub source_id: Option<String>,
    pub cache_type: String,
}

struct RawEntry {
    key: String,
    payload: Vec<u8>,
    expires_at: String,
    created_at: String,
    last_accessed_at: String,
    access_count: i64,
    size_bytes: i64,
    source_id: Option<String>,
    cache_type: String,
}

impl RawEntry {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            payload: row.get(1)?,
            expires_at: row.get(2)?,
            created_at: row.get(3)?,
            last_accessed_at: row.get(4)?,
            access_count: row.get(5)?,
            size_bytes: row.get(6)?,
            source_id: row.get(7)?,
            cache_type: row.get(8)?,
        })
    }

    fn into_entry(self) -> Result<CacheEntry, Error> {
        Ok(CacheEntry {
            expires_at: from_db_timestamp(&self.expires_at)?,
            created_at: from_db_timestamp(&self.created_at)?,
            last_accessed_at: from_db_timestamp(&self.last_accessed_at)?,
            access_count: self.access_count.max(0) as u64,
            size_bytes: self.size_bytes.max(0) as u64,
            key: self.key,
            payload: self.payload,
            source_id: self.source_id,
            cache_type: self.cache_type,
        })
    }
}

const SELECT_ENTRY: &str = "SELECT
    cache_key, payload, expires_at, created_at, last_accessed_at,
    access_count, size_bytes, source_id, cache_type
FROM cache_entries WHERE cache_key = ?1";

fn log_access(conn: &rusqlite::Connection, key: &str, access: AccessType, at: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO cache_access_log (cache_key, access_type, timestamp) VALUES (?1, ?2, ?3)",
        params![key, access.as_str(), at],
    )?;
    Ok(())
}

/// The durable, cross-process cache tier.
#[derive(Debug, Clone)]
pub struct DurableTier {
    db: HubDb,
    clock: Arc<dyn Clock>,
}

impl DurableTier {
    pub fn new(db: HubDb, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Fetch an entry by key.
    ///
    /// A live row gets its `access_count` and `last_accessed_at` bumped and
    /// a `hit` logged. A missing row logs `miss` and returns `None`. A row
    /// past `expires_at` is returned unchanged but logged as `miss`; the
    /// caller decides what to do with it.
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>, Error> {
        let key = key.to_owned();
        let now = to_db_timestamp(&self.clock.now());

        let raw = self
            .db
            .conn
            .call(move |conn| -> Result<Option<RawEntry>, Error> {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut found = tx.query_row(SELECT_ENTRY, params![key], RawEntry::from_row).optional()?;

                let access = match found.as_mut() {
                    Some(raw) if raw.expires_at > now => {
                        tx.execute(
                            "UPDATE cache_entries
                            SET last_accessed_at = ?1, access_count = access_count + 1
                            WHERE cache_key = ?2",
                            params![now, key],
                        )?;
                        raw.access_count += 1;
                        raw.last_accessed_at = now.clone();
                        AccessType::Hit
                    }
                    _ => AccessType::Miss,
                };

                log_access(&tx, &key, access, &now)?;
                tx.commit()?;
                Ok(found)
            })
            .await
            .map_err(Error::from)?;

        raw.map(RawEntry::into_entry).transpose()
    }

    /// Read an entry without touching its counters or the access log.
    ///
    /// Pair with [`DurableTier::record_read`] once the caller knows whether
    /// the payload was usable.
    pub async fn peek(&self, key: &str) -> Result<Option<CacheEntry>, Error> {
        let key = key.to_owned();
        let raw = self
            .db
            .conn
            .call(move |conn| -> Result<Option<RawEntry>, Error> {
                Ok(conn.query_row(SELECT_ENTRY, params![key], RawEntry::from_row).optional()?)
            })
            .await
            .map_err(Error::from)?;

        raw.map(RawEntry::into_entry).transpose()
    }

    /// Log the outcome of a read resolved by the caller.
    ///
    /// With `hit` set, a row that is still live gets its `access_count` and
    /// `last_accessed_at` bumped and a `hit` is logged. Anything else logs
    /// `miss`. Returns the access type written.
    pub async fn record_read(&self, key: &str, hit: bool) -> Result<AccessType, Error> {
        let key = key.to_owned();
        let now = to_db_timestamp(&self.clock.now());

        self.db
            .conn
            .call(move |conn| -> Result<AccessType, Error> {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let bumped = if hit {
                    tx.execute(
                        "UPDATE cache_entries
                        SET last_accessed_at = ?1, access_count = access_count + 1
                        WHERE cache_key = ?2 AND expires_at > ?1",
                        params![now, key],
                    )?
                } else {
                    0
                };
                let access = if bumped > 0 { AccessType::Hit } else { AccessType::Miss };
                log_access(&tx, &key, access, &now)?;
                tx.commit()?;
                Ok(access)
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or replace an entry (last writer wins) and log `set`.
    ///
    /// Replacing resets `created_at`, `last_accessed_at` and `access_count`.
    ///
    /// # Errors
    ///
    /// `Error::InvalidInput` if the key is empty, `expires_at` is not
    /// after the current time, or `expires_at` is past year 9999.
    pub async fn set(&self, write: EntryWrite) -> Result<(), Error> {
        if write.key.is_empty() {
            return Err(Error::InvalidInput("cache key cannot be empty".into()));
        }
        let now = self.clock.now();
        if write.expires_at <= now {
            return Err(Error::InvalidInput(format!("expires_at must be after now for key {}", write.key)));
        }
        if !is_storable(&write.expires_at) {
            return Err(Error::InvalidInput(format!("expires_at {} is past year 9999", write.expires_at)));
        }

        let now = to_db_timestamp(&now);
        let expires_at = to_db_timestamp(&write.expires_at);
        let size_bytes = write.payload.len() as i64;

        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO cache_entries (
                        cache_key, payload, expires_at, created_at, last_accessed_at,
                        access_count, size_bytes, source_id, cache_type
                    ) VALUES (?1, ?2, ?3, ?4, ?4, 0, ?5, ?6, ?7)
                    ON CONFLICT(cache_key) DO UPDATE SET
                        payload = excluded.payload,
                        expires_at = excluded.expires_at,
                        created_at = excluded.created_at,
                        last_accessed_at = excluded.last_accessed_at,
                        access_count = 0,
                        size_bytes = excluded.size_bytes,
                        source_id = excluded.source_id,
                        cache_type = excluded.cache_type",
                    params![
                        &write.key,
                        &write.payload,
                        &expires_at,
                        &now,
                        size_bytes,
                        &write.source_id,
                        &write.cache_type,
                    ],
                )?;
                log_access(&tx, &write.key, AccessType::Set, &now)?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Remove an entry and log `delete`. Returns whether a row was removed.
    pub async fn delete(&self, key: &str) -> Result<bool, Error> {
        let key = key.to_owned();
        let now = to_db_timestamp(&self.clock.now());

        self.db
            .conn
            .call(move |conn| -> Result<bool, Error> {
                let tx = conn.transaction()?;
                let removed = tx.execute("DELETE FROM cache_entries WHERE cache_key = ?1", params![key])?;
                log_access(&tx, &key, AccessType::Delete, &now)?;
                tx.commit()?;
                Ok(removed > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every entry with `expires_at < now`, logging one `expire`
    /// row per key. Returns the number removed.
    pub async fn sweep_expired(&self) -> Result<u64, Error> {
        let now = to_db_timestamp(&self.clock.now());

        let removed = self
            .db
            .conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let keys: Vec<String> = {
                    let mut stmt = tx.prepare("SELECT cache_key FROM cache_entries WHERE expires_at < ?1")?;
                    stmt.query_map(params![now], |row| row.get(0))?
                        .collect::<rusqlite::Result<_>>()?
                };
                tx.execute("DELETE FROM cache_entries WHERE expires_at < ?1", params![now])?;
                for key in &keys {
                    log_access(&tx, key, AccessType::Expire, &now)?;
                }
                tx.commit()?;
                Ok(keys.len() as u64)
            })
            .await
            .map_err(Error::from)?;

        if removed > 0 {
            tracing::info!(removed, "swept expired durable entries");
        }
        Ok(removed)
    }

    /// All keys tagged with `source_id`.
    pub async fn keys_for_source(&self, source_id: &str) -> Result<Vec<String>, Error> {
        let source_id = source_id.to_owned();
        self.db
            .conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt =
                    conn.prepare("SELECT cache_key FROM cache_entries WHERE source_id = ?1 ORDER BY cache_key")?;
                let keys = stmt
                    .query_map(params![source_id], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(keys)
            })
            .await
            .map_err(Error::from)
    }

    /// Liveness probe.
    pub async fn health_check(&self) -> bool {
        self.db.ping().await
    }

    /// Entry counts, sizes and hit/miss counts over the trailing `window`.
    pub async fn stats(&self, window: Duration) -> Result<DurableStats, Error> {
        let now_ts = self.clock.now();
        let now = to_db_timestamp(&now_ts);
        let since = to_db_timestamp(&(now_ts - window));

        self.db
            .conn
            .call(move |conn| -> Result<DurableStats, Error> {
                let (total_entries, total_bytes): (i64, i64) = conn.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM cache_entries",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                let expired_entries: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM cache_entries WHERE expires_at <= ?1",
                    params![now],
                    |row| row.get(0),
                )?;

                let mut stats = DurableStats {
                    total_entries: total_entries as u64,
                    total_bytes: total_bytes as u64,
                    expired_entries: expired_entries as u64,
                    ..Default::default()
                };

                let mut stmt = conn.prepare(
                    "SELECT access_type, COUNT(*) FROM cache_access_log
                    WHERE timestamp >= ?1 AND access_type IN ('hit', 'miss')
                    GROUP BY access_type",
                )?;
                let rows = stmt.query_map(params![since], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
                for row in rows {
                    let (access, count) = row?;
                    match access.as_str() {
                        "hit" => stats.hit_count = count as u64,
                        "miss" => stats.miss_count = count as u64,
                        _ => {}
                    }
                }

                Ok(stats)
            })
            .await
            .map_err(Error::from)
    }

    /// Access-log rows for `key`, oldest first.
    pub async fn access_log(&self, key: &str) -> Result<Vec<AccessLogEntry>, Error> {
        let key = key.to_owned();
        let rows = self
            .db
            .conn
            .call(move |conn| -> Result<Vec<(String, String, String)>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT cache_key, access_type, timestamp FROM cache_access_log
                    WHERE cache_key = ?1 ORDER BY id ASC",
                )?;
                let rows = stmt
                    .query_map(params![key], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(Error::from)?;

        rows.into_iter()
            .map(|(key, access, ts)| {
                Ok(AccessLogEntry { key, access_type: access.parse()?, timestamp: from_db_timestamp(&ts)? })
            })
            .collect()
    }

    /// Append a row to the generic statistics table.
    pub async fn record_statistic(&self, stat_type: &str, stat_key: &str, stat_value: f64) -> Result<(), Error> {
        let stat_type = stat_type.to_owned();
        let stat_key = stat_key.to_owned();
        let now = to_db_timestamp(&self.clock.now());

        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO cache_stats (stat_type, stat_key, stat_value, recorded_at) VALUES (?1, ?2, ?3, ?4)",
                    params![stat_type, stat_key, stat_value, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Statistics of one type recorded within `window`, newest first.
    pub async fn recent_statistics(&self, stat_type: &str, window: Duration) -> Result<Vec<StatRecord>, Error> {
        let stat_type = stat_type.to_owned();
        let since = to_db_timestamp(&(self.clock.now() - window));

        let rows = self
            .db
            .conn
            .call(move |conn| -> Result<Vec<(String, String, f64, String)>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT stat_type, stat_key, stat_value, recorded_at FROM cache_stats
                    WHERE stat_type = ?1 AND recorded_at >= ?2
                    ORDER BY recorded_at DESC, id DESC",
                )?;
                let rows = stmt
                    .query_map(params![stat_type, since], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(Error::from)?;

        rows.into_iter()
            .map(|(stat_type, stat_key, stat_value, ts)| {
                Ok(StatRecord { stat_type, stat_key, stat_value, recorded_at: from_db_timestamp(&ts)? })
            })
            .collect()
    }

    /// The `limit` largest entries by payload size.
    pub async fn largest_entries(&self, limit: usize) -> Result<Vec<EntrySummary>, Error> {
        let limit = limit as i64;
        let rows = self
            .db
            .conn
            .call(move |conn| -> Result<Vec<(String, i64, i64, String, Option<String>, String)>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT cache_key, size_bytes, access_count, created_at, source_id, cache_type
                    FROM cache_entries ORDER BY size_bytes DESC, cache_key ASC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(Error::from)?;

        rows.into_iter()
            .map(|(key, size, count, created, source_id, cache_type)| {
                Ok(EntrySummary {
                    key,
                    size_bytes: size.max(0) as u64,
                    access_count: count.max(0) as u64,
                    created_at: from_db_timestamp(&created)?,
                    source_id,
                    cache_type,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    async fn setup() -> (DurableTier, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap()));
        let db = HubDb::open_in_memory().await.unwrap();
        (DurableTier::new(db, clock.clone()), clock)
    }

    fn write(key: &str, payload: &[u8], expires_at: DateTime<Utc>, source_id: Option<&str>) -> EntryWrite {
        EntryWrite {
            key: key.to_string(),
            payload: payload.to_vec(),
            expires_at,
            source_id: source_id.map(str::to_string),
            cache_type: DEFAULT_CACHE_TYPE.to_string(),
        }
    }

    fn kinds(log: &[AccessLogEntry]) -> Vec<AccessType> {
        log.iter().map(|e| e.access_type).collect()
    }

    #[tokio::test]
    async fn test_set_and_get_bumps_access_stats() {
        let (tier, clock) = setup().await;
        let exp = clock.now() + Duration::seconds(900);
        tier.set(write("k", b"payload", exp, Some("fred"))).await.unwrap();

        clock.advance(Duration::seconds(10));
        let entry = tier.get("k").await.unwrap().unwrap();
        assert_eq!(entry.payload, b"payload");
        assert_eq!(entry.size_bytes, 7);
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.last_accessed_at, clock.now());
        assert_eq!(entry.source_id.as_deref(), Some("fred"));
        assert_eq!(entry.cache_type, "general");

        let again = tier.get("k").await.unwrap().unwrap();
        assert_eq!(again.access_count, 2);

        assert_eq!(kinds(&tier.access_log("k").await.unwrap()), vec![AccessType::Set, AccessType::Hit, AccessType::Hit]);
    }

    #[tokio::test]
    async fn test_get_missing_logs_miss() {
        let (tier, _clock) = setup().await;
        assert!(tier.get("nope").await.unwrap().is_none());
        assert_eq!(kinds(&tier.access_log("nope").await.unwrap()), vec![AccessType::Miss]);
    }

    #[tokio::test]
    async fn test_get_expired_row_is_returned_but_logged_as_miss() {
        let (tier, clock) = setup().await;
        tier.set(write("k", b"v", clock.now() + Duration::seconds(1), None)).await.unwrap();

        clock.advance(Duration::seconds(2));
        let entry = tier.get("k").await.unwrap().unwrap();
        assert!(entry.is_expired(clock.now()));
        assert_eq!(entry.access_count, 0);

        assert_eq!(kinds(&tier.access_log("k").await.unwrap()), vec![AccessType::Set, AccessType::Miss]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_resets_counters() {
        let (tier, clock) = setup().await;
        let exp = clock.now() + Duration::seconds(60);
        tier.set(write("k", b"old", exp, Some("a"))).await.unwrap();
        tier.get("k").await.unwrap();

        tier.set(write("k", b"newer", exp, Some("b"))).await.unwrap();
        let entry = tier.get("k").await.unwrap().unwrap();
        assert_eq!(entry.payload, b"newer");
        assert_eq!(entry.size_bytes, 5);
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.source_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_set_rejects_past_expiry_and_empty_key() {
        let (tier, clock) = setup().await;
        let result = tier.set(write("k", b"v", clock.now(), None)).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));

        let result = tier.set(write("", b"v", clock.now() + Duration::seconds(5), None)).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_set_rejects_expiry_past_year_9999() {
        let (tier, _clock) = setup().await;
        let far = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap() + Duration::seconds(1);
        let result = tier.set(write("k", b"v", far, None)).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(tier.health_check().await);
    }

    #[tokio::test]
    async fn test_peek_has_no_side_effects() {
        let (tier, clock) = setup().await;
        tier.set(write("k", b"v", clock.now() + Duration::seconds(60), None)).await.unwrap();

        let entry = tier.peek("k").await.unwrap().unwrap();
        assert_eq!(entry.payload, b"v");
        assert_eq!(entry.access_count, 0);
        assert!(tier.peek("absent").await.unwrap().is_none());
        assert_eq!(kinds(&tier.access_log("k").await.unwrap()), vec![AccessType::Set]);
    }

    #[tokio::test]
    async fn test_record_read_logs_outcome() {
        let (tier, clock) = setup().await;
        tier.set(write("k", b"v", clock.now() + Duration::seconds(60), None)).await.unwrap();

        assert_eq!(tier.record_read("k", false).await.unwrap(), AccessType::Miss);
        assert_eq!(tier.record_read("k", true).await.unwrap(), AccessType::Hit);
        assert_eq!(tier.peek("k").await.unwrap().unwrap().access_count, 1);

        // A hit on a row that expired in the meantime is downgraded.
        clock.advance(Duration::seconds(61));
        assert_eq!(tier.record_read("k", true).await.unwrap(), AccessType::Miss);
        assert_eq!(tier.record_read("gone", true).await.unwrap(), AccessType::Miss);

        assert_eq!(
            kinds(&tier.access_log("k").await.unwrap()),
            vec![AccessType::Set, AccessType::Miss, AccessType::Hit, AccessType::Miss]
        );
    }

    #[tokio::test]
    async fn test_delete_reports_removal() {
        let (tier, clock) = setup().await;
        tier.set(write("k", b"v", clock.now() + Duration::seconds(60), None)).await.unwrap();

        assert!(tier.delete("k").await.unwrap());
        assert!(!tier.delete("k").await.unwrap());
        assert!(tier.get("k").await.unwrap().is_none());

        let log = kinds(&tier.access_log("k").await.unwrap());
        assert_eq!(log, vec![AccessType::Set, AccessType::Delete, AccessType::Delete, AccessType::Miss]);
    }

    #[tokio::test]
    async fn test_sweep_expired_removes_only_expired_and_logs() {
        let (tier, clock) = setup().await;
        tier.set(write("short", b"1", clock.now() + Duration::seconds(1), None)).await.unwrap();
        tier.set(write("long", b"2", clock.now() + Duration::hours(1), None)).await.unwrap();

        clock.advance(Duration::seconds(5));
        assert_eq!(tier.sweep_expired().await.unwrap(), 1);
        assert_eq!(tier.sweep_expired().await.unwrap(), 0);

        assert_eq!(kinds(&tier.access_log("short").await.unwrap()), vec![AccessType::Set, AccessType::Expire]);
        assert!(tier.get("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_keys_for_source() {
        let (tier, clock) = setup().await;
        let exp = clock.now() + Duration::hours(1);
        tier.set(write("a1", b"1", exp, Some("a"))).await.unwrap();
        tier.set(write("a2", b"2", exp, Some("a"))).await.unwrap();
        tier.set(write("b1", b"3", exp, Some("b"))).await.unwrap();
        tier.set(write("none", b"4", exp, None)).await.unwrap();

        assert_eq!(tier.keys_for_source("a").await.unwrap(), vec!["a1".to_string(), "a2".to_string()]);
        assert!(tier.keys_for_source("zzz").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats_window() {
        let (tier, clock) = setup().await;
        tier.set(write("k", b"12345", clock.now() + Duration::seconds(30), None)).await.unwrap();
        tier.get("k").await.unwrap();
        tier.get("missing").await.unwrap();

        let stats = tier.stats(Duration::hours(24)).await.unwrap();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.total_bytes, 5);
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.expired_entries, 0);

        clock.advance(Duration::hours(25));
        let stats = tier.stats(Duration::hours(24)).await.unwrap();
        assert_eq!(stats.hit_count, 0);
        assert_eq!(stats.miss_count, 0);
        assert_eq!(stats.expired_entries, 1);
    }

    #[tokio::test]
    async fn test_record_and_read_statistics() {
        let (tier, clock) = setup().await;
        tier.record_statistic("hit_rate", "cache", 0.5).await.unwrap();
        clock.advance(Duration::minutes(1));
        tier.record_statistic("hit_rate", "cache", 0.75).await.unwrap();
        tier.record_statistic("entries", "cache", 3.0).await.unwrap();

        let recent = tier.recent_statistics("hit_rate", Duration::hours(1)).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].stat_value, 0.75);

        clock.advance(Duration::hours(2));
        assert!(tier.recent_statistics("hit_rate", Duration::hours(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_largest_entries() {
        let (tier, clock) = setup().await;
        let exp = clock.now() + Duration::hours(1);
        tier.set(write("small", b"1", exp, None)).await.unwrap();
        tier.set(write("big", b"1234567890", exp, None)).await.unwrap();
        tier.set(write("mid", b"12345", exp, None)).await.unwrap();

        let top = tier.largest_entries(2).await.unwrap();
        let keys: Vec<&str> = top.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["big", "mid"]);
        assert_eq!(top[0].size_bytes, 10);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.sqlite");
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap()));

        let db = HubDb::open(&path).await.unwrap();
        let tier = DurableTier::new(db.clone(), clock.clone());
        tier.set(write("k", b"persisted", clock.now() + Duration::hours(1), None)).await.unwrap();
        db.close().await.unwrap();

        let tier = DurableTier::new(HubDb::open(&path).await.unwrap(), clock.clone());
        assert_eq!(tier.get("k").await.unwrap().unwrap().payload, b"persisted");
    }

    #[tokio::test]
    async fn test_concurrent_gets_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.sqlite");
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap()));

        let a = DurableTier::new(HubDb::open(&path).await.unwrap(), clock.clone());
        let b = DurableTier::new(HubDb::open(&path).await.unwrap(), clock.clone());
        a.set(write("k", b"shared", clock.now() + Duration::hours(1), None)).await.unwrap();

        let reads = |tier: &DurableTier| {
            let tier = tier.clone();
            async move {
                for _ in 0..25 {
                    assert_eq!(tier.get("k").await.unwrap().unwrap().payload, b"shared");
                }
            }
        };
        tokio::join!(reads(&a), reads(&b));

        assert_eq!(a.get("k").await.unwrap().unwrap().access_count, 51);
    }

    #[tokio::test]
    async fn test_closed_store_reports_unavailable() {
        let (tier, clock) = setup().await;
        tier.db.clone().close().await.unwrap();

        assert!(!tier.health_check().await);
        let result = tier.set(write("k", b"v", clock.now() + Duration::seconds(5), None)).await;
        assert!(matches!(result, Err(Error::StoreUnavailable(_))));
    }
}
