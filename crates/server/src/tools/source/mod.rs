//! Source registry MCP tools.

pub mod list;
pub mod register;
pub mod update;

pub use list::{SourceListParams, list_impl};
pub use register::register_impl;
pub use test::{SourceTestParams, test_impl};
pub use update::{SourceRemoveParams, SourceUpdateParams, remove_impl, update_impl};
