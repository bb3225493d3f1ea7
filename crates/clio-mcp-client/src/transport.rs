// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Transports that carry JSON-RPC 2.0 frames to an external MCP server.
//!
//! Both variants expose the same four operations: `connect`, `disconnect`,
//! `is_connected`, `send_request`/`send_notification`. `McpClient` is
//! transport-agnostic and only ever talks to the [`Transport`] trait.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A connection to a single MCP server, abstracting over stdio vs HTTP.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    fn is_connected(&self) -> bool;
    /// Send a JSON-RPC request and wait for its response. Returns `Ok(None)`
    /// only for notifications; requests always resolve to `Some(value)` or
    /// an error.
    async fn send_request(&self, method: &str, params: Value) -> Result<Value>;
    async fn send_notification(&self, method: &str, params: Value) -> Result<()>;
}

// ─── Stdio transport ────────────────────────────────────────────────────────

/// Spawns the server as a child process and speaks newline-delimited
/// JSON-RPC over its stdin/stdout. Stderr is drained to `tracing` so a
/// noisy server doesn't block on a full pipe.
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    next_id: AtomicU64,
    state: Mutex<Option<StdioState>>,
}

struct StdioState {
    child: Child,
    stdin: tokio::process::ChildStdin,
    pending: Arc<Mutex<HashMap<u64, tokio::sync::oneshot::Sender<Value>>>>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl StdioTransport {
    pub fn new(command: String, args: Vec<String>, env: HashMap<String, String>) -> Self {
        Self {
            command,
            args,
            env,
            next_id: AtomicU64::new(1),
            state: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn MCP server: {}", self.command))?;

        let stdin = child.stdin.take().context("child stdin not piped")?;
        let stdout = child.stdout.take().context("child stdout not piped")?;
        let stderr = child.stderr.take().context("child stderr not piped")?;

        let pending: Arc<Mutex<HashMap<u64, tokio::sync::oneshot::Sender<Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let pending_reader = pending.clone();

        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let v: Value = match serde_json::from_str(&line) {
                            Ok(v) => v,
                            Err(e) => {
                                warn!(error = %e, "malformed MCP stdio frame");
                                continue;
                            }
                        };
                        if let Some(id) = v.get("id").and_then(|i| i.as_u64()) {
                            if let Some(tx) = pending_reader.lock().await.remove(&id) {
                                let _ = tx.send(v);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "error reading MCP stdio stream");
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "mcp::server_stderr", "{line}");
            }
        });

        *guard = Some(StdioState {
            child,
            stdin,
            pending,
            reader_task,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        if let Some(mut state) = guard.take() {
            let _ = state.stdin.shutdown().await;
            let wait = tokio::time::timeout(Duration::from_secs(2), state.child.wait()).await;
            if wait.is_err() {
                let _ = state.child.start_kill();
                let _ = state.child.wait().await;
            }
            state.reader_task.abort();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.try_lock().map(|g| g.is_some()).unwrap_or(true)
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = tokio::sync::oneshot::channel();
        {
            let mut guard = self.state.lock().await;
            let state = guard.as_mut().context("MCP stdio transport not connected")?;
            state.pending.lock().await.insert(id, tx);
            let mut line = serde_json::to_string(&frame)?;
            line.push('\n');
            state
                .stdin
                .write_all(line.as_bytes())
                .await
                .context("failed to write MCP stdio request")?;
        }

        match tokio::time::timeout(DEFAULT_REQUEST_TIMEOUT, rx).await {
            Ok(Ok(resp)) => extract_result(resp),
            Ok(Err(_)) => bail!("MCP stdio transport closed before response to {method}"),
            Err(_) => {
                let mut guard = self.state.lock().await;
                if let Some(state) = guard.as_mut() {
                    state.pending.lock().await.remove(&id);
                }
                bail!("MCP request {method} timed out after {DEFAULT_REQUEST_TIMEOUT:?}")
            }
        }
    }

    async fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        let frame = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().context("MCP stdio transport not connected")?;
        let mut line = serde_json::to_string(&frame)?;
        line.push('\n');
        state.stdin.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

fn extract_result(resp: Value) -> Result<Value> {
    if let Some(err) = resp.get("error") {
        bail!("MCP error: {err}");
    }
    Ok(resp.get("result").cloned().unwrap_or(Value::Null))
}

// ─── HTTP(+SSE) transport ───────────────────────────────────────────────────

/// POSTs JSON-RPC to `url`. Servers may reply with a plain JSON body or an
/// `text/event-stream` response; in the latter case `data:` lines are
/// concatenated until a blank line terminates the event.
pub struct HttpTransport {
    url: String,
    headers: HashMap<String, String>,
    bearer_token: Mutex<Option<String>>,
    client: reqwest::Client,
    next_id: AtomicU64,
    session_id: Mutex<Option<String>>,
}

impl HttpTransport {
    pub fn new(url: String, headers: HashMap<String, String>, bearer_token: Option<String>) -> Self {
        Self {
            url,
            headers,
            bearer_token: Mutex::new(bearer_token),
            client: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
            session_id: Mutex::new(None),
        }
    }

    pub async fn set_bearer_token(&self, token: String) {
        *self.bearer_token.lock().await = Some(token);
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<()> {
        // HTTP is connectionless at this layer; the first request
        // establishes the session id.
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.session_id.lock().await = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let resp = self.do_post(&frame).await?;
        extract_result(resp)
    }

    async fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        let frame = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        self.do_post(&frame).await?;
        Ok(())
    }
}

impl HttpTransport {
    async fn do_post(&self, frame: &Value) -> Result<Value> {
        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header("MCP-Protocol-Version", crate::PROTOCOL_VERSION)
            .json(frame);

        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(token) = self.bearer_token.lock().await.clone() {
            req = req.bearer_auth(token);
        }
        if let Some(sid) = self.session_id.lock().await.clone() {
            req = req.header("MCP-Session-Id", sid);
        }

        let resp = req.send().await.context("MCP HTTP request failed")?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND && self.session_id.lock().await.is_some()
        {
            *self.session_id.lock().await = None;
            bail!("MCP session terminated by server (404)");
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("MCP HTTP error {status}: {text}");
        }

        if let Some(sid) = resp.headers().get("MCP-Session-Id") {
            if let Ok(sid) = sid.to_str() {
                *self.session_id.lock().await = Some(sid.to_string());
            }
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            let body = resp.text().await.context("failed to read SSE body")?;
            parse_sse_last_data(&body)
        } else {
            let v: Value = resp.json().await.context("failed to parse MCP JSON response")?;
            Ok(v)
        }
    }
}

/// Concatenate `data:` lines within each SSE event, return the last complete
/// event's JSON payload (the response to our single in-flight request).
fn parse_sse_last_data(body: &str) -> Result<Value> {
    let mut last: Option<Value> = None;
    let mut buf = String::new();
    for line in body.lines() {
        if let Some(data) = line.strip_prefix("data:") {
            buf.push_str(data.trim_start());
            buf.push('\n');
        } else if line.is_empty() && !buf.is_empty() {
            if let Ok(v) = serde_json::from_str::<Value>(buf.trim_end()) {
                last = Some(v);
            }
            buf.clear();
        }
    }
    if !buf.is_empty() {
        if let Ok(v) = serde_json::from_str::<Value>(buf.trim_end()) {
            last = Some(v);
        }
    }
    last.context("no complete SSE event found in response body")
}
