// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! [`McpProxyTool`] — adapts one external MCP tool into a [`clio_tools::Tool`]
//! so the registry and the agent loop never need to know a given tool call
//! is actually routed to a subprocess or an HTTP server.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use clio_config::AgentMode;
use clio_tools::{ApprovalPolicy, Tool, ToolCall, ToolOutput};

use crate::client::McpClient;

/// A single external tool, namespaced `{server}_{tool}` to avoid collisions
/// with built-ins and with tools from other configured servers.
pub struct McpProxyTool {
    namespaced_name: String,
    /// The name as advertised by the server itself (without namespace).
    remote_name: String,
    description: String,
    parameters: Value,
    client: Arc<McpClient>,
}

impl McpProxyTool {
    pub fn new(
        server_name: &str,
        remote_name: String,
        description: String,
        parameters: Value,
        client: Arc<McpClient>,
    ) -> Self {
        Self {
            namespaced_name: format!("{server_name}_{remote_name}"),
            remote_name,
            description,
            parameters,
            client,
        }
    }
}

#[async_trait]
impl Tool for McpProxyTool {
    fn name(&self) -> &str {
        &self.namespaced_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    fn default_policy(&self) -> ApprovalPolicy {
        // External tools are not vetted the way built-ins are; ask by default.
        ApprovalPolicy::Ask
    }

    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Research, AgentMode::Plan, AgentMode::Agent]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.client.call_tool(&self.remote_name, call.args.clone()).await {
            Ok(result) if result.is_error => ToolOutput::err(&call.id, result.text),
            Ok(result) => ToolOutput::ok(&call.id, result.text),
            Err(e) => ToolOutput::err(&call.id, format!("MCP tool call failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn send_request(&self, _method: &str, _params: Value) -> Result<Value> {
            Ok(json!({
                "content": [{ "type": "text", "text": "proxied ok" }],
                "isError": false,
            }))
        }
        async fn send_notification(&self, _method: &str, _params: Value) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn namespaced_name_combines_server_and_tool() {
        let client = Arc::new(McpClient::new(Arc::new(NullTransport)));
        let tool = McpProxyTool::new(
            "github",
            "search_issues".to_string(),
            "Search issues".to_string(),
            json!({"type":"object"}),
            client,
        );
        assert_eq!(tool.name(), "github_search_issues");
    }

    #[tokio::test]
    async fn execute_forwards_to_client_and_flattens_text() {
        let client = Arc::new(McpClient::new(Arc::new(NullTransport)));
        let tool = McpProxyTool::new(
            "github",
            "search_issues".to_string(),
            "Search issues".to_string(),
            json!({"type":"object"}),
            client,
        );
        let out = tool
            .execute(&ToolCall { id: "1".into(), name: "github_search_issues".into(), args: json!({}) })
            .await;
        assert!(!out.is_error);
        assert_eq!(out.content, "proxied ok");
    }
}
