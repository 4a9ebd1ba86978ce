//! Process-local, bounded, in-memory tier.
//!
//! Eviction is strict insertion order (FIFO): when the tier is full the
//! entry inserted earliest is dropped, however recently it was read.
//! Overwriting a key that is already present keeps its original position.
//! Expired entries are dropped lazily on read or by [`VolatileTier::sweep_expired`].

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
struct VolatileEntry {
    payload: Bytes,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, VolatileEntry>,
    order: VecDeque<String>,
}

impl Inner {
    fn forget(&mut self, key: &str) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }
}

/// Bounded FIFO cache of encoded payloads.
#[derive(Debug)]
pub struct VolatileTier {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl VolatileTier {
    /// Create a tier holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), inner: Mutex::new(Inner::default()) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the payload if present and `now < expires_at`.
    ///
    /// An expired entry is removed as a side effect.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        match inner.entries.get(key) {
            Some(entry) if now < entry.expires_at => return Some(entry.payload.clone()),
            Some(_) => {}
            None => return None,
        }
        inner.forget(key);
        tracing::trace!(key, "volatile entry expired on read");
        None
    }

    /// Insert or overwrite an entry.
    ///
    /// Returns the key evicted to make room, if any.
    pub fn set(&self, key: &str, payload: Bytes, expires_at: DateTime<Utc>) -> Option<String> {
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.entries.get_mut(key) {
            *existing = VolatileEntry { payload, expires_at };
            return None;
        }

        let mut evicted = None;
        if inner.entries.len() >= self.capacity
            && let Some(oldest) = inner.order.pop_front()
        {
            inner.entries.remove(&oldest);
            evicted = Some(oldest);
        }

        inner.entries.insert(key.to_owned(), VolatileEntry { payload, expires_at });
        inner.order.push_back(key.to_owned());
        evicted
    }

    /// Remove an entry. Returns whether one was present.
    pub fn remove(&self, key: &str) -> bool {
        self.inner.lock().forget(key)
    }

    /// Drop every entry with `expires_at <= now`. Returns the number removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| now < entry.expires_at);
        let Inner { entries, order } = &mut *inner;
        order.retain(|k| entries.contains_key(k));
        before - entries.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}
