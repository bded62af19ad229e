//! Model Context Protocol (MCP) bridge
//!
//! Manages one subprocess per configured MCP server and mediates its
//! JSON-RPC tool protocol over stdio.

mod client;
mod protocol;

pub use client::{ConnectionState, McpConnection};
pub use protocol::{McpServerConfig, McpSettings, McpTool, PROTOCOL_VERSION};
