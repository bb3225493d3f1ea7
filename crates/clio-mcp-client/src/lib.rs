// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `clio-mcp-client` — connects to external MCP (Model Context Protocol)
//! servers configured in `tools.mcp_servers` and exposes their tools as
//! additional entries in a [`clio_tools::ToolRegistry`].
//!
//! Unlike `clio-mcp` (which serves clio's own tools to other MCP hosts),
//! this crate is a client: it speaks the handshake, caches tool
//! definitions, and forwards `tools/call` requests, namespacing everything
//! as `{server}_{tool}` so external tools never collide with built-ins.

pub mod client;
pub mod manager;
pub mod proxy_tool;
pub mod transport;

pub use client::{CallToolResult, McpClient};
pub use manager::McpManager;
pub use proxy_tool::McpProxyTool;

use serde::{Deserialize, Serialize};

/// Protocol version this client speaks during the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2025-11-25";

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "clio".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: Option<serde_json::Value>,
    pub resources: Option<serde_json::Value>,
    pub prompts: Option<serde_json::Value>,
}

/// One entry from a server's `tools/list` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// Connection status of a configured MCP server, surfaced to diagnostics
/// (`clio mcp client-test`) and to the tool registry (a failed server's
/// tools are simply absent, never a startup-fatal error).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpServerStatus {
    Disabled,
    Connected,
    Failed(String),
}
