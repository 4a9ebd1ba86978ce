//! Two-tier cache for upstream data.
//!
//! - [`key`]: deterministic cache keys from a namespace and parameters
//! - [`volatile`]: bounded in-process FIFO tier
//! - [`durable`]: SQLite tier with access log and statistics
//! - [`codec`]: versioned payload envelope over an ordered codec chain
//! - [`coordinator`]: the unified get/set/invalidate front

pub mod codec;
pub mod connection;
pub mod coordinator;
pub mod durable;
pub mod key;
pub mod migrations;
pub mod volatile;

pub use crate::Error;

pub use codec::{Codec, CodecChain};
pub use connection::HubDb;
pub use coordinator::{BatchFailure, BatchOutcome, CacheCoordinator, CacheStats, CacheTags, MAX_TTL_SECS};
pub use durable::{AccessLogEntry, AccessType, CacheEntry, DurableStats, DurableTier, EntrySummary, StatRecord};
pub use key::build_key;
pub use volatile::VolatileTier;
