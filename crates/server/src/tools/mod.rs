//! MCP tool implementations.
//!
//! Each tool is a plain async function over a [`DataHub`] so it can be
//! tested without a transport.

use datahub_core::Error;
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;

pub mod cache;
pub mod data_fetch;
pub mod health;
pub mod source;

/// Pretty JSON text result.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output)
        .map_err(|e| Error::Serialization(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}
