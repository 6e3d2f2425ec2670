//! Tool parameter types for MCP tools.
//!
//! These types use serde for deserialization and schemars for automatic
//! JSON Schema generation required by MCP.

use schemars::JsonSchema;
use serde::Deserialize;

// ============================================================================
// Code Execution
// ============================================================================

/// Parameters for running Python code.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteParams {
    /// Python source code to execute.
    pub code: String,
}

// ============================================================================
// File Operations
// ============================================================================

/// Parameters for tools addressing one path in the code directory.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct PathParams {
    /// Path relative to the code directory (empty for the directory itself).
    #[serde(default)]
    pub relative_path: String,
}

/// Parameters for writing a file.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteFileParams {
    /// Path relative to the code directory.
    pub relative_path: String,

    /// Content to write.
    pub content: String,
}
