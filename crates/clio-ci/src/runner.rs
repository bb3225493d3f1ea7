// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Drives a single prompt through the agentic loop to completion, outside
//! the ACP transport. This is the non-interactive counterpart to the ACP
//! agent: no client, no permission round-trips, no session persistence —
//! just a prompt in and a transcript out.

use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use clio_bootstrap::{AgentBuilder, RuntimeContext, ToolSetProfile};
use clio_config::{AgentMode, Config};
use clio_core::AgentEvent;
use clio_model::ModelProvider;
use tokio::sync::{mpsc, Mutex};

use crate::output::{finalise_stdout, write_progress, write_stderr, write_stdout};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_AGENT_ERROR: i32 = 1;
pub const EXIT_VALIDATION_ERROR: i32 = 2;
pub const EXIT_TIMEOUT: i32 = 124;
pub const EXIT_INTERRUPT: i32 = 130;

/// How the final transcript is rendered to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Plain assistant text, streamed as it arrives.
    #[default]
    Text,
    /// One JSON object per event, newline-delimited.
    Json,
}

#[derive(Debug, Clone)]
pub struct CiOptions {
    pub mode: AgentMode,
    pub prompt: String,
    pub project_root: Option<PathBuf>,
    pub output_format: OutputFormat,
    pub run_timeout_secs: Option<u64>,
    pub system_prompt_file: Option<PathBuf>,
    pub append_system_prompt: Option<String>,
}

impl Default for CiOptions {
    fn default() -> Self {
        Self {
            mode: AgentMode::Agent,
            prompt: String::new(),
            project_root: None,
            output_format: OutputFormat::default(),
            run_timeout_secs: None,
            system_prompt_file: None,
            append_system_prompt: None,
        }
    }
}

/// Headless agent runner: wires up a [`clio_core::Agent`] via
/// [`AgentBuilder`] the same way `clio-acp` does, then drives it through one
/// `submit()` call, draining `AgentEvent`s to stdout/stderr until
/// `TurnComplete`.
pub struct CiRunner {
    config: Arc<Config>,
    model: Arc<dyn ModelProvider>,
}

impl CiRunner {
    pub fn new(config: Arc<Config>, model: Arc<dyn ModelProvider>) -> Self {
        Self { config, model }
    }

    pub async fn run(&self, opts: CiOptions) -> anyhow::Result<i32> {
        if opts.prompt.trim().is_empty() {
            write_stderr("no prompt given");
            return Ok(EXIT_VALIDATION_ERROR);
        }

        let mut runtime_ctx = match &opts.project_root {
            Some(root) => RuntimeContext {
                project_root: Some(root.clone()),
                git_context: Some(clio_runtime::collect_git_context(root)),
                ci_context: Some(clio_runtime::detect_ci_context()),
                project_context_file: clio_runtime::load_project_context_file(root),
                append_system_prompt: None,
                system_prompt_override: None,
            },
            None => RuntimeContext::auto_detect(),
        };
        runtime_ctx.append_system_prompt = opts.append_system_prompt.clone();
        if let Some(path) = &opts.system_prompt_file {
            runtime_ctx.system_prompt_override = Some(std::fs::read_to_string(path)?);
        }

        let mut agent = AgentBuilder::new(self.config.clone())
            .with_runtime_context(runtime_ctx)
            .build(
                opts.mode,
                self.model.clone(),
                ToolSetProfile::Full {
                    question_tx: None,
                    todos: Arc::new(Mutex::new(Vec::new())),
                    task_depth: Arc::new(AtomicUsize::new(0)),
                },
            );

        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
        let prompt = opts.prompt.clone();
        let submit = tokio::spawn(async move { agent.submit(&prompt, tx).await });

        let format = opts.output_format;
        let drain = async move {
            while let Some(event) = rx.recv().await {
                let done = matches!(event, AgentEvent::TurnComplete);
                handle_event(&event, format);
                if done {
                    break;
                }
            }
        };

        let exit_code = match opts.run_timeout_secs {
            Some(secs) => {
                tokio::select! {
                    _ = drain => EXIT_SUCCESS,
                    _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                        write_stderr(&format!("run timed out after {secs}s"));
                        EXIT_TIMEOUT
                    }
                    _ = tokio::signal::ctrl_c() => {
                        write_stderr("interrupted");
                        EXIT_INTERRUPT
                    }
                }
            }
            None => {
                tokio::select! {
                    _ = drain => EXIT_SUCCESS,
                    _ = tokio::signal::ctrl_c() => {
                        write_stderr("interrupted");
                        EXIT_INTERRUPT
                    }
                }
            }
        };

        finalise_stdout("");

        match submit.await {
            Ok(Ok(())) => Ok(exit_code),
            Ok(Err(e)) => {
                write_stderr(&format!("agent error: {e}"));
                Ok(EXIT_AGENT_ERROR)
            }
            Err(e) => {
                write_stderr(&format!("agent task panicked: {e}"));
                Ok(EXIT_AGENT_ERROR)
            }
        }
    }
}

/// Render one `AgentEvent` according to the chosen output format.
///
/// In `Text` mode, only the assistant's streamed text reaches stdout; every
/// other event (tool calls, token usage, compaction) is a `[clio:...]`
/// diagnostic line on stderr so it never pollutes a piped transcript.
fn handle_event(event: &AgentEvent, format: OutputFormat) {
    if format == OutputFormat::Json {
        write_stdout(&format!("{:?}\n", event));
        return;
    }

    match event {
        AgentEvent::TextDelta(text) => write_stdout(text),
        AgentEvent::ToolCallStarted(call) => {
            write_progress(&format!("[clio:tool:start] {}", call.name));
        }
        AgentEvent::ToolCallFinished {
            tool_name,
            is_error,
            ..
        } => {
            let status = if *is_error { "error" } else { "ok" };
            write_progress(&format!("[clio:tool:end] {tool_name} status={status}"));
        }
        AgentEvent::ContextCompacted {
            tokens_before,
            tokens_after,
            ..
        } => {
            write_progress(&format!(
                "[clio:compact] {tokens_before} -> {tokens_after} tokens"
            ));
        }
        AgentEvent::Error(msg) => {
            write_progress(&format!("[clio:error] {msg}"));
        }
        AgentEvent::ModeChanged(mode) => {
            write_progress(&format!("[clio:mode] {mode}"));
        }
        AgentEvent::Aborted { .. } => {
            write_progress("[clio:aborted]");
        }
        AgentEvent::TurnComplete => {
            write_progress("[clio:turn:complete]");
        }
        _ => {}
    }
}
