//! Injectable time source and the on-disk timestamp format.
//!
//! Expiry in both tiers is evaluated against a [`Clock`] rather than the
//! wall clock directly, so TTL behaviour can be exercised by advancing a
//! [`ManualClock`].

use chrono::{DateTime, Datelike, Duration, SecondsFormat, Utc};
use parking_lot::Mutex;
use std::fmt::Debug;

use crate::Error;

/// Source of "now" for expiry and bookkeeping timestamps.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Format a timestamp for storage.
///
/// Fixed-width RFC 3339 in UTC with microseconds, so string comparison in
/// SQL orders the same way as time does.
pub fn to_db_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Whether `ts` keeps the fixed-width storage format.
///
/// Years outside 0000..=9999 gain a sign or a fifth digit and no longer
/// compare correctly as strings.
pub fn is_storable(ts: &DateTime<Utc>) -> bool {
    (0..=9999).contains(&ts.year())
}

/// Parse a stored timestamp.
pub fn from_db_timestamp(raw: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::CorruptEntry(format!("bad timestamp {raw:?}: {e}")))
}
