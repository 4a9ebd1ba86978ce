//! Upstream adapters for the data hub.
//!
//! This crate provides the HTTP/JSON implementation of the core
//! [`Fetcher`](datahub_core::Fetcher) contract used by the server.

pub mod fetch;

pub use fetch::{ADAPTER_REF, FetchConfig, HttpFetcher};
