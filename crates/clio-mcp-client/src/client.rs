// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! [`McpClient`] — owns a transport and the connect/handshake/call_tool
//! protocol logic, independent of stdio vs HTTP.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::info;

use crate::transport::Transport;
use crate::{ClientInfo, ServerCapabilities, ServerInfo, ToolDef, PROTOCOL_VERSION};

/// Flattened result of a `tools/call` request.
///
/// `content` preserves the raw MCP content array (text/image/resource
/// items); `text` is the concatenation of all text items for callers that
/// just want a string.
#[derive(Debug, Clone)]
pub struct CallToolResult {
    pub content: Vec<Value>,
    pub text: String,
    pub is_error: bool,
}

/// A connected (or connectable) MCP server.
///
/// `connect()` runs the full handshake: `initialize`, stash `server_info`/
/// `capabilities`, send `notifications/initialized`, then `tools/list` if
/// the server advertises a `tools` capability.
pub struct McpClient {
    transport: Arc<dyn Transport>,
    server_info: RwLock<Option<ServerInfo>>,
    capabilities: RwLock<Option<ServerCapabilities>>,
    tools: RwLock<Vec<ToolDef>>,
}

impl McpClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            server_info: RwLock::new(None),
            capabilities: RwLock::new(None),
            tools: RwLock::new(Vec::new()),
        }
    }

    pub async fn connect(&self, client_info: &ClientInfo) -> Result<()> {
        self.transport.connect().await?;

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": client_info.name, "version": client_info.version },
        });
        let result = self
            .transport
            .send_request("initialize", params)
            .await
            .context("MCP initialize failed")?;

        let server_info: ServerInfo = serde_json::from_value(
            result.get("serverInfo").cloned().unwrap_or(Value::Null),
        )
        .unwrap_or(ServerInfo { name: "unknown".into(), version: "0.0.0".into() });
        let capabilities: ServerCapabilities = serde_json::from_value(
            result.get("capabilities").cloned().unwrap_or(Value::Null),
        )
        .unwrap_or_default();

        info!(server = %server_info.name, version = %server_info.version, "MCP handshake complete");

        *self.server_info.write().await = Some(server_info);
        *self.capabilities.write().await = Some(capabilities.clone());

        self.transport
            .send_notification("notifications/initialized", json!({}))
            .await?;

        if capabilities.tools.is_some() {
            self.refresh_tools().await?;
        }

        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.transport.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    async fn refresh_tools(&self) -> Result<()> {
        let result = self.transport.send_request("tools/list", json!({})).await?;
        let tools: Vec<ToolDef> =
            serde_json::from_value(result.get("tools").cloned().unwrap_or(Value::Array(vec![])))
                .unwrap_or_default();
        *self.tools.write().await = tools;
        Ok(())
    }

    pub async fn tools(&self) -> Vec<ToolDef> {
        self.tools.read().await.clone()
    }

    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().await.clone()
    }

    pub async fn call_tool(&self, name: &str, args: Value) -> Result<CallToolResult> {
        let params = json!({ "name": name, "arguments": args });
        let result = self
            .transport
            .send_request("tools/call", params)
            .await
            .with_context(|| format!("tools/call failed for {name}"))?;

        let content = result
            .get("content")
            .and_then(|c| c.as_array())
            .cloned()
            .unwrap_or_default();
        let is_error = result
            .get("isError")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let text = content
            .iter()
            .filter_map(|item| {
                if item.get("type").and_then(|t| t.as_str()) == Some("text") {
                    item.get("text").and_then(|t| t.as_str()).map(str::to_string)
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        Ok(CallToolResult {
            content,
            text,
            is_error,
        })
    }
}

/// Validate that a server's advertised protocol version is one we can speak.
/// Used by `connect()` callers that want to fail fast rather than discover a
/// mismatch on the first real request.
pub fn check_protocol_version(advertised: &str) -> Result<()> {
    if advertised != PROTOCOL_VERSION {
        bail!("unsupported MCP protocol version: server advertised {advertised}, client speaks {PROTOCOL_VERSION}");
    }
    Ok(())
}
