//! Shared MCP types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool exposed by a provider (or implemented locally).
///
/// Immutable once fetched; refreshed by re-listing the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Provider this tool belongs to ("local" for in-process tools)
    pub provider: String,
    /// Tool name, unique within a provider
    pub name: String,
    /// Tool description
    pub description: Option<String>,
    /// Input schema (JSON)
    pub input_schema: Option<Value>,
}
