// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! [`McpManager`] — owns one [`McpClient`] per configured server, connects
//! them concurrently at startup, and merges their tools into a
//! [`clio_tools::ToolRegistry`] under a `{server}_` namespace.
//!
//! A failing server never aborts startup: its status is recorded as
//! `Failed(reason)`, its tools are simply absent from `all_tools()`, and
//! every other configured server still connects normally.

use std::collections::HashMap;
use std::sync::Arc;

use clio_config::{McpServerConfig, McpTransportConfig};
use clio_tools::ToolRegistry;
use tokio::sync::RwLock;
use tracing::warn;

use crate::client::McpClient;
use crate::proxy_tool::McpProxyTool;
use crate::transport::{HttpTransport, StdioTransport, Transport};
use crate::{ClientInfo, McpServerStatus, ToolDef};

struct ConnectedServer {
    client: Arc<McpClient>,
    status: McpServerStatus,
    tools: Vec<ToolDef>,
}

/// Singleton-style owner of every configured MCP server connection.
///
/// Construct once at startup via [`McpManager::connect_all`], then register
/// its tools into the agent's [`ToolRegistry`] with [`McpManager::register_tools`].
pub struct McpManager {
    client_info: ClientInfo,
    servers: RwLock<HashMap<String, ConnectedServer>>,
}

impl McpManager {
    pub fn new(client_info: ClientInfo) -> Self {
        Self {
            client_info,
            servers: RwLock::new(HashMap::new()),
        }
    }

    /// Connect to every enabled server in `configs`, concurrently. Servers
    /// whose `disabled` flag is set are skipped (status recorded as
    /// `Disabled`) without attempting a connection.
    pub async fn connect_all(&self, configs: &[McpServerConfig]) {
        let mut servers = self.servers.write().await;
        for cfg in configs {
            if cfg.disabled {
                servers.insert(
                    cfg.name.clone(),
                    ConnectedServer {
                        client: Arc::new(McpClient::new(Arc::new(NoopTransport))),
                        status: McpServerStatus::Disabled,
                        tools: Vec::new(),
                    },
                );
                continue;
            }

            let transport: Arc<dyn Transport> = match &cfg.transport {
                McpTransportConfig::Stdio { command, args, env } => Arc::new(StdioTransport::new(
                    command.clone(),
                    args.clone(),
                    env.clone(),
                )),
                McpTransportConfig::Http { url, headers, bearer_token } => {
                    Arc::new(HttpTransport::new(url.clone(), headers.clone(), bearer_token.clone()))
                }
            };

            let client = Arc::new(McpClient::new(transport));
            match client.connect(&self.client_info).await {
                Ok(()) => {
                    let tools = client.tools().await;
                    servers.insert(
                        cfg.name.clone(),
                        ConnectedServer {
                            client,
                            status: McpServerStatus::Connected,
                            tools,
                        },
                    );
                }
                Err(e) => {
                    warn!(server = %cfg.name, error = %e, "MCP server failed to connect");
                    servers.insert(
                        cfg.name.clone(),
                        ConnectedServer {
                            client,
                            status: McpServerStatus::Failed(e.to_string()),
                            tools: Vec::new(),
                        },
                    );
                }
            }
        }
    }

    pub async fn status(&self, server_name: &str) -> Option<McpServerStatus> {
        self.servers.read().await.get(server_name).map(|s| s.status.clone())
    }

    /// All `{server}_{tool}` names currently available across connected servers.
    pub async fn all_tool_names(&self) -> Vec<String> {
        let servers = self.servers.read().await;
        servers
            .iter()
            .flat_map(|(name, s)| s.tools.iter().map(move |t| format!("{name}_{}", t.name)))
            .collect()
    }

    /// Register an [`McpProxyTool`] for every tool of every connected server
    /// into `registry`. Disabled/failed servers contribute nothing.
    pub async fn register_tools(&self, registry: &mut ToolRegistry) {
        let servers = self.servers.read().await;
        for (server_name, server) in servers.iter() {
            if server.status != McpServerStatus::Connected {
                continue;
            }
            for tool in &server.tools {
                registry.register(McpProxyTool::new(
                    server_name,
                    tool.name.clone(),
                    tool.description.clone(),
                    tool.input_schema.clone(),
                    server.client.clone(),
                ));
            }
        }
    }

    pub async fn disconnect_all(&self) {
        let servers = self.servers.read().await;
        for server in servers.values() {
            let _ = server.client.disconnect().await;
        }
    }
}

/// Placeholder transport for servers marked `disabled` in config — never
/// dialed, exists only so `ConnectedServer` always has a client to hold.
struct NoopTransport;

#[async_trait::async_trait]
impl Transport for NoopTransport {
    async fn connect(&self) -> anyhow::Result<()> {
        Ok(())
    }
    async fn disconnect(&self) -> anyhow::Result<()> {
        Ok(())
    }
    fn is_connected(&self) -> bool {
        false
    }
    async fn send_request(&self, _method: &str, _params: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        anyhow::bail!("server is disabled")
    }
    async fn send_notification(&self, _method: &str, _params: serde_json::Value) -> anyhow::Result<()> {
        anyhow::bail!("server is disabled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_server_reports_disabled_status_without_connecting() {
        let manager = McpManager::new(ClientInfo::default());
        let configs = vec![McpServerConfig {
            name: "github".into(),
            transport: McpTransportConfig::Stdio {
                command: "nonexistent-binary-xyz".into(),
                args: vec![],
                env: HashMap::new(),
            },
            disabled: true,
        }];
        manager.connect_all(&configs).await;
        assert_eq!(manager.status("github").await, Some(McpServerStatus::Disabled));
        assert!(manager.all_tool_names().await.is_empty());
    }

    #[tokio::test]
    async fn unreachable_stdio_server_reports_failed_not_panic() {
        let manager = McpManager::new(ClientInfo::default());
        let configs = vec![McpServerConfig {
            name: "flaky".into(),
            transport: McpTransportConfig::Stdio {
                command: "definitely-not-a-real-binary-anywhere".into(),
                args: vec![],
                env: HashMap::new(),
            },
            disabled: false,
        }];
        manager.connect_all(&configs).await;
        match manager.status("flaky").await {
            Some(McpServerStatus::Failed(_)) => {}
            other => panic!("expected Failed status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn one_failing_server_does_not_block_others() {
        let manager = McpManager::new(ClientInfo::default());
        let configs = vec![
            McpServerConfig {
                name: "flaky".into(),
                transport: McpTransportConfig::Stdio {
                    command: "definitely-not-a-real-binary-anywhere".into(),
                    args: vec![],
                    env: HashMap::new(),
                },
                disabled: false,
            },
            McpServerConfig {
                name: "off".into(),
                transport: McpTransportConfig::Stdio {
                    command: "also-not-real".into(),
                    args: vec![],
                    env: HashMap::new(),
                },
                disabled: true,
            },
        ];
        manager.connect_all(&configs).await;
        assert_eq!(manager.status("off").await, Some(McpServerStatus::Disabled));
        assert!(matches!(manager.status("flaky").await, Some(McpServerStatus::Failed(_))));
    }
}
