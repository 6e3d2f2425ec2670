//! # drydock-mcp
//!
//! MCP (Model Context Protocol) server that lets AI agents run Python code in
//! pooled, isolated Docker containers and manage the shared code directory.
//!
//! ## Quick Start
//!
//! Run the server with default configuration (stdio transport):
//!
//! ```bash
//! cargo run -p drydock-mcp
//! ```
//!
//! Configure via environment variables:
//!
//! ```bash
//! export DRYDOCK_IMAGE=python:3.12-slim
//! export DRYDOCK_CODE_DIR=/srv/drydock/code
//! export DRYDOCK_MAX_UNITS=8
//! export DRYDOCK_TRANSPORT=both
//! cargo run -p drydock-mcp
//! ```
//!
//! ## MCP Tools
//!
//! | Tool | Description |
//! |------|-------------|
//! | `execute_python` | Run Python code in a pooled container |
//! | `list_directory` | List code directory contents |
//! | `read_file` | Read a file from the code directory |
//! | `write_file` | Write a file to the code directory |
//! | `delete_file` | Delete a file from the code directory |
//! | `get_directory_tree` | Show the code directory as a tree |
//! | `cleanup_code_directory` | Empty the code directory |
//! | `pool_status` | Execution unit occupancy and counters |

mod config;
pub mod http;
mod server;
#[cfg(test)]
mod testing;
mod types;

pub use config::{ConfigError, DrydockConfig, TransportMode, MAX_INPUT_SIZE_BYTES};
pub use server::DrydockServer;
pub use types::*;
