// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Bridges a `Send + Sync` caller (`clio_core::Agent`, driven from
//! `tokio::spawn`-ed tool tasks) across the `Send`/`!Send` boundary to the
//! `AgentSideConnection`, which is only safe to touch from the `LocalSet`
//! that owns it. Messages carrying only `Send` data cross an mpsc channel to
//! a bridge task running inside that `LocalSet`; the bridge task is the only
//! place that ever calls a connection method directly.

use std::sync::Arc;

use agent_client_protocol::{
    AgentSideConnection, Client, Error as AcpError, PermissionOption, PermissionOptionId,
    PermissionOptionKind, RequestPermissionOutcome, RequestPermissionRequest,
    RequestPermissionResponse, SessionId, ToolCallId, ToolCallUpdate, ToolCallUpdateFields,
};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

pub enum BridgeMessage {
    RequestPermission {
        request: RequestPermissionRequest,
        response_tx: oneshot::Sender<Result<RequestPermissionResponse, AcpError>>,
    },
}

/// Runs inside the same `LocalSet` as the `AgentSideConnection`. The only
/// task allowed to call connection methods on the permission-request path.
pub async fn run_bridge_task(
    mut rx: mpsc::Receiver<BridgeMessage>,
    connection: Arc<AgentSideConnection>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            BridgeMessage::RequestPermission { request, response_tx } => {
                let result = connection.request_permission(request).await;
                let _ = response_tx.send(result);
            }
        }
    }
}

/// [`clio_tools::PermissionBroker`] implementation for one ACP session: asks
/// the client via `session/request_permission` and interprets the selected
/// option, caching nothing itself (the registry only calls this for
/// unresolved `Ask`-tier calls; "always" options are honored per-request,
/// matching the single-decision contract of `PermissionBroker`).
#[derive(Clone)]
pub struct PermissionBridge {
    tx: mpsc::Sender<BridgeMessage>,
    session_id: String,
}

impl PermissionBridge {
    pub fn new(tx: mpsc::Sender<BridgeMessage>, session_id: String) -> Self {
        Self { tx, session_id }
    }
}

#[async_trait]
impl clio_tools::PermissionBroker for PermissionBridge {
    async fn request_permission(&self, tool_name: &str, args: &serde_json::Value) -> bool {
        let request = RequestPermissionRequest::new(
            SessionId::new(self.session_id.clone().into()),
            ToolCallUpdate::new(
                ToolCallId::from(uuid::Uuid::new_v4().to_string()),
                ToolCallUpdateFields::new()
                    .title(format!("Run {tool_name}"))
                    .raw_input(args.clone()),
            ),
            vec![
                PermissionOption::new(
                    PermissionOptionId::from("allow_once"),
                    "Allow once",
                    PermissionOptionKind::AllowOnce,
                ),
                PermissionOption::new(
                    PermissionOptionId::from("allow_always"),
                    "Always allow",
                    PermissionOptionKind::AllowAlways,
                ),
                PermissionOption::new(
                    PermissionOptionId::from("reject_once"),
                    "Reject once",
                    PermissionOptionKind::RejectOnce,
                ),
                PermissionOption::new(
                    PermissionOptionId::from("reject_always"),
                    "Always reject",
                    PermissionOptionKind::RejectAlways,
                ),
            ],
        );

        let (response_tx, response_rx) = oneshot::channel();
        if self
            .tx
            .send(BridgeMessage::RequestPermission { request, response_tx })
            .await
            .is_err()
        {
            // Bridge task gone (client disconnected mid-session): fail open,
            // same as a context with no approval channel at all.
            return true;
        }

        match response_rx.await {
            Ok(Ok(resp)) => match resp.outcome {
                RequestPermissionOutcome::Selected(selected) => {
                    let id = selected.option_id.0.as_ref();
                    id == "allow_once" || id == "allow_always"
                }
                _ => false,
            },
            _ => false,
        }
    }
}
