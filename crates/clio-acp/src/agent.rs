// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! [`ClioAgentHandler`] — implements `agent_client_protocol::Agent`, the
//! inbound half of the ACP bridge (spec §4.11). One instance is created per
//! `clio acp` process and owns every session for that process's lifetime.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use agent_client_protocol::{
    Agent, AgentCapabilities, AuthenticateRequest, AuthenticateResponse, CancelNotification,
    ClientCapabilities, ContentBlock, CreateTerminalRequest, CreateTerminalResponse, Error,
    InitializeRequest, InitializeResponse, KillTerminalCommandRequest, LoadSessionRequest,
    LoadSessionResponse, McpCapabilities, NewSessionRequest, NewSessionResponse,
    PromptCapabilities, PromptRequest, PromptResponse, ProtocolVersion, ReadTextFileRequest,
    ReadTextFileResponse, ReleaseTerminalRequest, SessionId, SessionNotification, SessionUpdate,
    SetSessionModeRequest, SetSessionModeResponse, StopReason, TerminalOutputRequest,
    TerminalOutputResponse, TextContent, WaitForTerminalExitRequest, WriteTextFileRequest,
};
use clio_bootstrap::{AgentBuilder, RuntimeContext, ToolSetProfile};
use clio_config::{AgentMode, Config};
use clio_core::AgentEvent;
use clio_model::ModelProvider;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use uuid::Uuid;

use crate::client_bridge::{self, PermissionBridge};
use crate::session::{SessionEntry, SessionRegistry};

/// Implements the ACP `Agent` side: accepts `initialize`/`session/new`/
/// `session/prompt`/etc. requests from the client and drives each session's
/// [`clio_core::Agent`] to completion, forwarding its [`AgentEvent`] stream
/// back as `session/update` notifications.
pub struct ClioAgentHandler {
    config: Arc<Config>,
    model: Arc<dyn ModelProvider>,
    sessions: SessionRegistry,
    /// Set once `initialize` succeeds; every other method rejects before this.
    initialized: std::sync::atomic::AtomicBool,
    conn: AsyncMutex<Option<Arc<agent_client_protocol::AgentSideConnection>>>,
    /// Negotiated in `initialize`; gates every outbound `fs/*` and
    /// `terminal/*` request below.
    client_capabilities: AsyncMutex<ClientCapabilities>,
    /// Sender half of the permission-request bridge (spec.rs §4.11); set by
    /// `serve_stdio` before the connection starts accepting requests, so by
    /// the time any session is created this is always populated.
    bridge_tx: AsyncMutex<Option<mpsc::Sender<client_bridge::BridgeMessage>>>,
}

impl ClioAgentHandler {
    pub fn new(config: Arc<Config>, model: Arc<dyn ModelProvider>) -> Self {
        Self {
            config,
            model,
            sessions: SessionRegistry::new(),
            initialized: std::sync::atomic::AtomicBool::new(false),
            conn: AsyncMutex::new(None),
            client_capabilities: AsyncMutex::new(ClientCapabilities::default()),
            bridge_tx: AsyncMutex::new(None),
        }
    }

    /// The transport sets this once the `AgentSideConnection` exists, so
    /// request handlers can send `session/update` notifications back out.
    pub async fn attach_connection(&self, conn: Arc<agent_client_protocol::AgentSideConnection>) {
        *self.conn.lock().await = Some(conn);
    }

    /// The transport sets this once the permission-bridge task is spawned,
    /// alongside `attach_connection`.
    pub async fn attach_bridge(&self, tx: mpsc::Sender<client_bridge::BridgeMessage>) {
        *self.bridge_tx.lock().await = Some(tx);
    }

    async fn require_initialized(&self) -> Result<(), Error> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::invalid_request())
        }
    }

    async fn send_update(&self, session_id: &str, update: SessionUpdate) {
        let conn = self.conn.lock().await.clone();
        if let Some(conn) = conn {
            let _ = conn
                .session_notification(SessionNotification {
                    session_id: SessionId::new(session_id.to_string().into()),
                    update,
                    meta: None,
                })
                .await;
        }
    }

    /// Drain one session's `AgentEvent` stream, translating each event into
    /// the matching `session/update` notification (spec §4.10–4.11). Returns
    /// the `StopReason` once `TurnComplete`/`Aborted` is observed.
    async fn drain_turn(&self, session_id: &str, mut rx: mpsc::Receiver<AgentEvent>) -> StopReason {
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::TextDelta(text) => {
                    self.send_update(
                        session_id,
                        SessionUpdate::AgentMessageChunk(agent_client_protocol::ContentChunk {
                            content: ContentBlock::Text(TextContent {
                                text,
                                annotations: None,
                                meta: None,
                            }),
                            meta: None,
                        }),
                    )
                    .await;
                }
                AgentEvent::ThinkingDelta(text) => {
                    self.send_update(
                        session_id,
                        SessionUpdate::ThoughtMessageChunk(agent_client_protocol::ContentChunk {
                            content: ContentBlock::Text(TextContent {
                                text,
                                annotations: None,
                                meta: None,
                            }),
                            meta: None,
                        }),
                    )
                    .await;
                }
                AgentEvent::ToolCallStarted(call) => {
                    self.send_update(
                        session_id,
                        SessionUpdate::ToolCall(agent_client_protocol::ToolCallUpdate {
                            id: call.id.clone().into(),
                            title: Some(call.name.clone()),
                            ..Default::default()
                        }),
                    )
                    .await;
                }
                AgentEvent::ToolCallFinished { call_id, is_error, .. } => {
                    self.send_update(
                        session_id,
                        SessionUpdate::ToolCallUpdate(agent_client_protocol::ToolCallUpdate {
                            id: call_id.into(),
                            status: Some(if is_error {
                                agent_client_protocol::ToolCallStatus::Failed
                            } else {
                                agent_client_protocol::ToolCallStatus::Completed
                            }),
                            ..Default::default()
                        }),
                    )
                    .await;
                }
                AgentEvent::Error(_) => return StopReason::Refusal,
                AgentEvent::Aborted { .. } => return StopReason::Cancelled,
                AgentEvent::TurnComplete => return StopReason::EndTurn,
                _ => {}
            }
        }
        StopReason::EndTurn
    }

    /// Read a file through the client's editor buffer rather than the local
    /// filesystem (spec §4.11's `fs/read_text_file`). Returns `None` when the
    /// client never advertised `fs.read_text_file` support or no connection
    /// is attached — callers should fall back to a direct filesystem read.
    pub async fn read_text_file_via_client(
        &self,
        session_id: &str,
        path: std::path::PathBuf,
    ) -> Option<ReadTextFileResponse> {
        if !self.client_capabilities.lock().await.fs.read_text_file {
            return None;
        }
        let conn = self.conn.lock().await.clone()?;
        conn.read_text_file(ReadTextFileRequest {
            session_id: SessionId::new(session_id.to_string().into()),
            path,
            line: None,
            limit: None,
            meta: None,
        })
        .await
        .ok()
    }

    /// Write a file through the client's editor buffer (spec §4.11's
    /// `fs/write_text_file`). Returns `false` when the client never
    /// advertised `fs.write_text_file` support, no connection is attached,
    /// or the request failed — callers should fall back to a direct write.
    pub async fn write_text_file_via_client(
        &self,
        session_id: &str,
        path: std::path::PathBuf,
        content: String,
    ) -> bool {
        if !self.client_capabilities.lock().await.fs.write_text_file {
            return false;
        }
        let Some(conn) = self.conn.lock().await.clone() else {
            return false;
        };
        conn.write_text_file(WriteTextFileRequest {
            session_id: SessionId::new(session_id.to_string().into()),
            path,
            content,
            meta: None,
        })
        .await
        .is_ok()
    }

    /// Start a command in a client-managed terminal (spec §4.11's
    /// `terminal/create`). `None` when the client never advertised terminal
    /// support.
    pub async fn create_terminal_via_client(
        &self,
        session_id: &str,
        command: String,
        args: Vec<String>,
        cwd: Option<std::path::PathBuf>,
    ) -> Option<CreateTerminalResponse> {
        if !self.client_capabilities.lock().await.terminal {
            return None;
        }
        let conn = self.conn.lock().await.clone()?;
        conn.create_terminal(CreateTerminalRequest {
            session_id: SessionId::new(session_id.to_string().into()),
            command,
            args,
            env: Vec::new(),
            cwd,
            output_byte_limit: None,
            meta: None,
        })
        .await
        .ok()
    }

    pub async fn terminal_output_via_client(
        &self,
        session_id: &str,
        terminal_id: String,
    ) -> Option<TerminalOutputResponse> {
        let conn = self.conn.lock().await.clone()?;
        conn.terminal_output(TerminalOutputRequest {
            session_id: SessionId::new(session_id.to_string().into()),
            terminal_id: terminal_id.into(),
            meta: None,
        })
        .await
        .ok()
    }

    pub async fn wait_for_terminal_exit_via_client(
        &self,
        session_id: &str,
        terminal_id: String,
    ) -> Option<agent_client_protocol::WaitForTerminalExitResponse> {
        let conn = self.conn.lock().await.clone()?;
        conn.wait_for_terminal_exit(WaitForTerminalExitRequest {
            session_id: SessionId::new(session_id.to_string().into()),
            terminal_id: terminal_id.into(),
            meta: None,
        })
        .await
        .ok()
    }

    pub async fn kill_terminal_via_client(&self, session_id: &str, terminal_id: String) -> bool {
        let Some(conn) = self.conn.lock().await.clone() else {
            return false;
        };
        conn.kill_terminal_command(KillTerminalCommandRequest {
            session_id: SessionId::new(session_id.to_string().into()),
            terminal_id: terminal_id.into(),
            meta: None,
        })
        .await
        .is_ok()
    }

    pub async fn release_terminal_via_client(&self, session_id: &str, terminal_id: String) -> bool {
        let Some(conn) = self.conn.lock().await.clone() else {
            return false;
        };
        conn.release_terminal(ReleaseTerminalRequest {
            session_id: SessionId::new(session_id.to_string().into()),
            terminal_id: terminal_id.into(),
            meta: None,
        })
        .await
        .is_ok()
    }
}

#[async_trait::async_trait(?Send)]
impl Agent for ClioAgentHandler {
    async fn initialize(&self, args: InitializeRequest) -> Result<InitializeResponse, Error> {
        self.initialized.store(true, Ordering::SeqCst);
        *self.client_capabilities.lock().await = args.client_capabilities.clone();
        let protocol_version = ProtocolVersion::V1.min(args.protocol_version);
        Ok(InitializeResponse {
            protocol_version,
            agent_capabilities: AgentCapabilities {
                load_session: true,
                prompt_capabilities: PromptCapabilities {
                    embedded_context: true,
                    ..Default::default()
                },
                mcp_capabilities: McpCapabilities { http: false, sse: false },
                ..Default::default()
            },
            auth_methods: Vec::new(),
            meta: None,
        })
    }

    async fn authenticate(&self, _args: AuthenticateRequest) -> Result<AuthenticateResponse, Error> {
        self.require_initialized().await?;
        // clio has no interactive auth flow: provider credentials are
        // resolved from config/environment before the agent process starts.
        Ok(AuthenticateResponse { meta: None })
    }

    async fn new_session(&self, args: NewSessionRequest) -> Result<NewSessionResponse, Error> {
        self.require_initialized().await?;

        let runtime_ctx = match &args.cwd {
            Some(cwd) => RuntimeContext {
                project_root: Some(cwd.clone()),
                git_context: Some(clio_runtime::collect_git_context(cwd)),
                ci_context: Some(clio_runtime::detect_ci_context()),
                project_context_file: clio_runtime::load_project_context_file(cwd),
                append_system_prompt: None,
                system_prompt_override: None,
            },
            None => RuntimeContext::auto_detect(),
        };

        let mut agent = AgentBuilder::new(self.config.clone())
            .with_runtime_context(runtime_ctx)
            .build(
                AgentMode::Agent,
                self.model.clone(),
                ToolSetProfile::Full {
                    question_tx: None,
                    todos: Arc::new(AsyncMutex::new(Vec::new())),
                    task_depth: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
                },
            );

        let session_id = Uuid::new_v4().to_string();

        // `Ask`-tier tool calls made by this session forward to the client as
        // `session/request_permission`, routed through the Send-safe bridge
        // rather than the (!Send) connection directly.
        let broker: Arc<dyn clio_tools::PermissionBroker> =
            match self.bridge_tx.lock().await.clone() {
                Some(tx) => Arc::new(PermissionBridge::new(tx, session_id.clone())),
                None => Arc::new(clio_tools::AutoApprove),
            };
        agent.set_permission_broker(broker);

        self.sessions.insert(session_id.clone(), SessionEntry::new(agent)).await;

        Ok(NewSessionResponse {
            session_id: SessionId::new(session_id.into()),
            modes: None,
            meta: None,
        })
    }

    async fn load_session(&self, args: LoadSessionRequest) -> Result<LoadSessionResponse, Error> {
        self.require_initialized().await?;
        // clio's YaRN thread archive (§4.7) is replayed by the orchestrator
        // when it restores a session; the ACP-level contract here is just
        // "session now exists and can accept session/prompt".
        let session_id = args.session_id.to_string();
        if self.sessions.get(&session_id).await.is_none() {
            return Err(Error::invalid_params());
        }
        Ok(LoadSessionResponse { modes: None, meta: None })
    }

    async fn set_session_mode(
        &self,
        args: SetSessionModeRequest,
    ) -> Result<SetSessionModeResponse, Error> {
        self.require_initialized().await?;
        let session_id = args.session_id.to_string();
        let entry = self
            .sessions
            .get(&session_id)
            .await
            .ok_or_else(Error::invalid_params)?;
        let mode = match args.mode_id.as_str() {
            "research" => AgentMode::Research,
            "plan" => AgentMode::Plan,
            _ => AgentMode::Agent,
        };
        entry.agent.lock().await.set_mode(mode).await;
        Ok(SetSessionModeResponse { meta: None })
    }

    async fn prompt(&self, args: PromptRequest) -> Result<PromptResponse, Error> {
        self.require_initialized().await?;
        let session_id = args.session_id.to_string();
        let entry = self
            .sessions
            .get(&session_id)
            .await
            .ok_or_else(Error::invalid_params)?;

        if entry
            .turn_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::invalid_request());
        }
        entry.cancelled.store(false, Ordering::SeqCst);

        let prompt_text = args
            .prompt
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text(t) => Some(t.text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        let (tx, rx) = mpsc::channel::<AgentEvent>(256);
        let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel();
        let cancelled_flag = entry.cancelled.clone();
        let watcher = tokio::spawn(async move {
            loop {
                if cancelled_flag.load(Ordering::SeqCst) {
                    let _ = cancel_tx.send(());
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        });

        let submit_result = {
            let mut agent = entry.agent.lock().await;
            agent.submit_with_cancel(&prompt_text, tx, cancel_rx).await
        };
        watcher.abort();

        let stop_reason = if let Err(e) = submit_result {
            entry.turn_in_flight.store(false, Ordering::SeqCst);
            tracing::warn!(error = %e, "agent turn failed");
            return Err(Error::internal_error());
        } else {
            self.drain_turn(&session_id, rx).await
        };

        entry.turn_in_flight.store(false, Ordering::SeqCst);
        Ok(PromptResponse { stop_reason, meta: None })
    }

    async fn cancel(&self, args: CancelNotification) -> Result<(), Error> {
        let session_id = args.session_id.to_string();
        if let Some(entry) = self.sessions.get(&session_id).await {
            entry.cancelled.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}
