//! Cache-related MCP tools.
//!
//! This module provides tools for inspecting and maintaining the two-tier cache.

pub mod get;
pub mod invalidate;
pub mod maintenance;

pub use get::{CacheGetParams, get_impl};
pub use invalidate::{CacheInvalidateParams, CacheRefreshSourceParams, invalidate_impl, refresh_source_impl};
pub use maintenance::{CacheStatsParams, stats_impl, sweep_impl};
