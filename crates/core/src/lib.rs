//! Core of the data hub: a two-tier cache, a source registry and the
//! cache-aside orchestrator in front of upstream data providers.
//!
//! This crate provides:
//! - Volatile (in-process) and durable (SQLite) cache tiers behind a coordinator
//! - Persistent source registry with a status lifecycle
//! - The fetch contract implemented by upstream adapters
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod hub;
pub mod orchestrator;
pub mod registry;

pub use cache::{CacheCoordinator, HubDb, build_key};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, HubConfig};
pub use error::Error;
pub use fetch::{FetchError, Fetcher};
pub use hub::{DataHub, HealthReport, HealthStatus};
pub use orchestrator::{DataAccessOrchestrator, DataDomain, DataResponse, NormalizedPayload, TtlPolicy};
pub use registry::{NewSource, SourceConfig, SourceRegistry, SourceStatus, SourceUpdate};
