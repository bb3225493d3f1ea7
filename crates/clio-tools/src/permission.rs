// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Asks an external party whether an `Ask`-tier tool call may proceed.
//!
//! [`ToolRegistry::execute_with_ctx`](crate::ToolRegistry::execute_with_ctx)
//! consults a [`PermissionBroker`] only for tools whose resolved
//! [`ApprovalPolicy`](crate::policy::ApprovalPolicy) is `Ask`. The broker is
//! transport-agnostic: a CLI prompts on a terminal, an ACP bridge forwards
//! `session/request_permission` to the client, and headless/CI contexts use
//! [`AutoApprove`].

use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait PermissionBroker: Send + Sync {
    /// Returns `true` if the call is approved. `tool_name` and `args`
    /// identify the pending call; brokers typically surface both to
    /// whatever is on the other end of the approval channel.
    async fn request_permission(&self, tool_name: &str, args: &Value) -> bool;
}

/// Grants every request. The default broker for contexts with no
/// interactive approval channel (CI runner, MCP server, unit tests).
pub struct AutoApprove;

#[async_trait]
impl PermissionBroker for AutoApprove {
    async fn request_permission(&self, _tool_name: &str, _args: &Value) -> bool {
        true
    }
}
