// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! `clio-acp` — the inbound half of clio's JSON-RPC bridge: an ACP (Agent
//! Client Protocol) agent speaking newline-delimited JSON-RPC 2.0 over
//! stdin/stdout (spec §4.11).
//!
//! # Architecture
//!
//! ```text
//! ACP client (Zed, an IDE, …)
//!       │  stdin/stdout (newline-delimited JSON-RPC)
//!       ▼
//! AgentSideConnection (agent_client_protocol transport)
//!       │
//!       ▼
//! ClioAgentHandler (impl Agent)  ──►  clio_core::Agent per session
//! ```

mod agent;
mod client_bridge;
mod session;

pub use agent::ClioAgentHandler;
pub use session::{SessionEntry, SessionRegistry};

use std::sync::Arc;

use anyhow::Result;
use clio_config::Config;
use clio_model::ModelProvider;

/// Serve ACP over stdin/stdout until the client disconnects.
///
/// This blocks for the lifetime of the process; it is the sole operation of
/// the `clio acp` subcommand (the default when `clio` is invoked with no
/// subcommand, matching how IDEs launch agents).
pub async fn serve_stdio(config: Arc<Config>, model: Arc<dyn ModelProvider>) -> Result<()> {
    let handler = Arc::new(ClioAgentHandler::new(config, model));

    let outgoing = tokio::io::stdout();
    let incoming = tokio::io::stdin();

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            let (conn, io_task) = agent_client_protocol::AgentSideConnection::new(
                handler.clone(),
                outgoing,
                incoming,
                |fut| {
                    tokio::task::spawn_local(fut);
                },
            );
            let conn = Arc::new(conn);
            handler.attach_connection(conn.clone()).await;

            // The bridge task is the sole caller of `request_permission` on
            // the connection; `clio_core::Agent`'s Send+Sync tool-dispatch
            // tasks reach it only through the Send-safe channel.
            let (bridge_tx, bridge_rx) = tokio::sync::mpsc::channel(64);
            handler.attach_bridge(bridge_tx).await;
            tokio::task::spawn_local(client_bridge::run_bridge_task(bridge_rx, conn));

            io_task.await
        })
        .await
        .map_err(|e| anyhow::anyhow!("ACP connection error: {e}"))
}
