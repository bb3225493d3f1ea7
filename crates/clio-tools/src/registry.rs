// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clio_config::{AgentMode, ToolsConfig};

use crate::authorizer::PathAuthorizer;
use crate::permission::{AutoApprove, PermissionBroker};
use crate::policy::{ApprovalPolicy, ToolPolicy};
use crate::vault::FileVault;
use crate::{Tool, ToolCall, ToolOutput};

/// Tools whose execution mutates the filesystem: the registry authorizes
/// their `path` argument against the sandbox and records a FileVault backup
/// before dispatch.
const FS_MUTATING_TOOLS: &[&str] = &["write_file", "delete_file", "edit_file"];

/// Per-session/per-turn context the registry needs to authorize and vault
/// fs-mutating tool calls, and to resolve `Ask`-tier approvals. Cheap to
/// construct; `authorizer`, `vault`, `policy` and `broker` are typically
/// shared across an entire session.
#[derive(Clone)]
pub struct ExecCtx {
    pub authorizer: Arc<PathAuthorizer>,
    pub vault: Arc<FileVault>,
    pub turn_id: String,
    pub policy: Arc<ToolPolicy>,
    pub broker: Arc<dyn PermissionBroker>,
}

impl ExecCtx {
    pub fn new(authorizer: Arc<PathAuthorizer>, vault: Arc<FileVault>, turn_id: impl Into<String>) -> Self {
        Self {
            authorizer,
            vault,
            turn_id: turn_id.into(),
            policy: Arc::new(ToolPolicy::from_config(&ToolsConfig::default())),
            broker: Arc::new(AutoApprove),
        }
    }

    /// Attach an approval policy and permission broker, replacing the
    /// all-`Ask`-auto-approved defaults set by [`ExecCtx::new`].
    pub fn with_approval(mut self, policy: Arc<ToolPolicy>, broker: Arc<dyn PermissionBroker>) -> Self {
        self.policy = policy;
        self.broker = broker;
        self
    }

    /// A context sandboxed to `cwd` with a fresh, unshared vault — used
    /// where no richer session context is available (e.g. one-off CLI tool
    /// invocations, MCP server dispatch that predates a session). `Ask`-tier
    /// tools are auto-approved since there is no channel to ask through.
    pub fn permissive(cwd: impl Into<PathBuf>) -> Self {
        Self {
            authorizer: Arc::new(PathAuthorizer::new(cwd.into())),
            vault: Arc::new(FileVault::new()),
            turn_id: "adhoc".to_string(),
            policy: Arc::new(ToolPolicy::from_config(&ToolsConfig::default())),
            broker: Arc::new(AutoApprove),
        }
    }
}

/// A tool schema – mirrors clio_model::ToolSchema but keeps tools crate
/// independent from the model crate.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Central registry holding all available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

// SAFETY: ToolRegistry is Sync because:
// - HashMap<String, Arc<dyn Tool>> is Sync (String is Sync, Arc<T: Send + Sync> is Sync)
// - Tools implement Send + Sync (required by the Tool trait)
// - No interior mutability exists after construction (all methods take &self)
// - Parallel tool execution is safe because tools are immutable after registration
unsafe impl Sync for ToolRegistry {}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Produce schemas for ALL registered tools (mode-unfiltered).
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| ToolSchema {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        }).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Produce schemas only for tools available in the given mode.
    pub fn schemas_for_mode(&self, mode: AgentMode) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values()
            .filter(|t| t.modes().contains(&mode))
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Execute without a session context: fs-mutating tools run unchecked.
    /// Prefer [`ToolRegistry::execute_with_ctx`] whenever a session is
    /// available so path authorization and turn backups apply.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.tools.get(&call.name) {
            Some(tool) => tool.execute(call).await,
            None => ToolOutput::err(
                &call.id,
                format!("unknown tool: {}", call.name),
            ),
        }
    }

    /// Execute `call` under a session context: before dispatching a
    /// fs-mutating tool, the `path` argument is checked against the sandbox
    /// and its pre-call bytes are captured in the FileVault for this turn.
    /// Tool failures (including authorization denials) never propagate as
    /// errors — they come back as a normal `ToolOutput` with `is_error` set,
    /// so the model can see and recover from them.
    pub async fn execute_with_ctx(&self, call: &ToolCall, ctx: &ExecCtx) -> ToolOutput {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolOutput::err(&call.id, format!("unknown tool: {}", call.name));
        };

        if FS_MUTATING_TOOLS.contains(&call.name.as_str()) {
            let Some(path_str) = call.args.get("path").and_then(|v| v.as_str()) else {
                return ToolOutput::err(
                    &call.id,
                    "missing required parameter 'path'".to_string(),
                );
            };
            let path = std::path::Path::new(path_str);
            let resolved = match ctx.authorizer.authorize(path) {
                Ok(p) => p,
                Err(reason) => {
                    return ToolOutput::err(
                        &call.id,
                        format!("denied: {reason} ({path_str})"),
                    );
                }
            };
            if let Err(e) = ctx.vault.capture_before_write(&ctx.turn_id, &resolved) {
                return ToolOutput::err(
                    &call.id,
                    format!("failed to capture backup for {path_str}: {e}"),
                );
            }
        }

        match self.resolve_approval(tool.as_ref(), call, ctx) {
            ApprovalPolicy::Deny => {
                return ToolOutput::err(&call.id, format!("tool '{}' is denied by policy", call.name));
            }
            ApprovalPolicy::Auto => {}
            ApprovalPolicy::Ask => {
                if !ctx.broker.request_permission(&call.name, &call.args).await {
                    return ToolOutput::err(&call.id, format!("permission denied for tool '{}'", call.name));
                }
            }
        }

        tool.execute(call).await
    }

    /// Resolve the approval tier for `call`: the tool's static default,
    /// refined by [`ToolPolicy`] against its `command` argument (if any) —
    /// a glob-matched auto-approve/deny pattern can only relax or tighten an
    /// `Ask`-tier tool's decision, never override an explicit `Deny`.
    fn resolve_approval(&self, tool: &dyn Tool, call: &ToolCall, ctx: &ExecCtx) -> ApprovalPolicy {
        let default = tool.default_policy();
        if default != ApprovalPolicy::Ask {
            return default;
        }
        match call.args.get("command").and_then(|v| v.as_str()) {
            Some(command) => ctx.policy.decide(command),
            None => ApprovalPolicy::Ask,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn names_for_mode(&self, mode: AgentMode) -> Vec<String> {
        let mut names: Vec<String> = self.tools.values()
            .filter(|t| t.modes().contains(&mode))
            .map(|t| t.name().to_string())
            .collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self { Self::new() }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::policy::ApprovalPolicy;
    use crate::tool::{Tool, ToolCall, ToolOutput};

    /// Minimal no-op tool for registry tests.
    struct EchoTool { name: &'static str }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { self.name }
        fn description(&self) -> &str { "echoes its input" }
        fn parameters_schema(&self) -> Value { json!({ "type": "object" }) }
        fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, format!("echo:{}", call.args))
        }
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        assert!(reg.get("echo").is_some());
    }

    #[test]
    fn get_unknown_returns_none() {
        let reg = ToolRegistry::new();
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn names_returns_all_registered() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "a" });
        reg.register(EchoTool { name: "b" });
        let mut names = reg.names();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn schemas_contains_registered_tool() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "my_tool" });
        let schemas = reg.schemas();
        assert!(schemas.iter().any(|s| s.name == "my_tool"));
    }

    #[test]
    fn schemas_include_description() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "t" });
        let schemas = reg.schemas();
        assert_eq!(schemas[0].description, "echoes its input");
    }

    #[tokio::test]
    async fn execute_known_tool_succeeds() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        let call = ToolCall { id: "1".into(), name: "echo".into(), args: json!({"x":1}) };
        let out = reg.execute(&call).await;
        assert!(!out.is_error);
        assert!(out.content.starts_with("echo:"));
    }

    #[tokio::test]
    async fn execute_unknown_tool_returns_error() {
        let reg = ToolRegistry::new();
        let call = ToolCall { id: "x".into(), name: "missing".into(), args: json!({}) };
        let out = reg.execute(&call).await;
        assert!(out.is_error);
        assert!(out.content.contains("unknown tool"));
    }

    #[test]
    fn registering_same_name_twice_overwrites() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "t" });
        reg.register(EchoTool { name: "t" });
        assert_eq!(reg.names().len(), 1);
    }

    // ── Approval gating ───────────────────────────────────────────────────────

    struct AskTool;

    #[async_trait]
    impl Tool for AskTool {
        fn name(&self) -> &str { "ask_tool" }
        fn description(&self) -> &str { "needs approval" }
        fn parameters_schema(&self) -> Value { json!({ "type": "object" }) }
        fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Ask }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, "ran")
        }
    }

    struct DenyTool;

    #[async_trait]
    impl Tool for DenyTool {
        fn name(&self) -> &str { "deny_tool" }
        fn description(&self) -> &str { "never runs" }
        fn parameters_schema(&self) -> Value { json!({ "type": "object" }) }
        fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Deny }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, "should never run")
        }
    }

    struct RejectingBroker;

    #[async_trait]
    impl crate::permission::PermissionBroker for RejectingBroker {
        async fn request_permission(&self, _tool_name: &str, _args: &Value) -> bool { false }
    }

    fn ctx_with_broker(broker: Arc<dyn crate::permission::PermissionBroker>) -> ExecCtx {
        ExecCtx::permissive(".").with_approval(
            Arc::new(ToolPolicy::from_config(&ToolsConfig::default())),
            broker,
        )
    }

    #[tokio::test]
    async fn deny_tier_tool_never_executes() {
        let mut reg = ToolRegistry::new();
        reg.register(DenyTool);
        let call = ToolCall { id: "1".into(), name: "deny_tool".into(), args: json!({}) };
        let ctx = ctx_with_broker(Arc::new(AutoApprove));
        let out = reg.execute_with_ctx(&call, &ctx).await;
        assert!(out.is_error);
        assert!(out.content.contains("denied by policy"));
    }

    #[tokio::test]
    async fn ask_tier_tool_runs_when_broker_grants() {
        let mut reg = ToolRegistry::new();
        reg.register(AskTool);
        let call = ToolCall { id: "1".into(), name: "ask_tool".into(), args: json!({}) };
        let ctx = ctx_with_broker(Arc::new(AutoApprove));
        let out = reg.execute_with_ctx(&call, &ctx).await;
        assert!(!out.is_error);
        assert_eq!(out.content, "ran");
    }

    #[tokio::test]
    async fn ask_tier_tool_blocked_when_broker_denies() {
        let mut reg = ToolRegistry::new();
        reg.register(AskTool);
        let call = ToolCall { id: "1".into(), name: "ask_tool".into(), args: json!({}) };
        let ctx = ctx_with_broker(Arc::new(RejectingBroker));
        let out = reg.execute_with_ctx(&call, &ctx).await;
        assert!(out.is_error);
        assert!(out.content.contains("permission denied"));
    }

    #[tokio::test]
    async fn ask_tier_tool_auto_approved_by_command_pattern() {
        let mut reg = ToolRegistry::new();
        reg.register(AskTool);
        let call = ToolCall {
            id: "1".into(),
            name: "ask_tool".into(),
            args: json!({"command": "cat README.md"}),
        };
        // RejectingBroker would deny, but the default config's auto-approve
        // pattern for `cat *` should resolve this to Auto before the broker
        // is ever consulted.
        let ctx = ctx_with_broker(Arc::new(RejectingBroker));
        let out = reg.execute_with_ctx(&call, &ctx).await;
        assert!(!out.is_error);
    }
}
