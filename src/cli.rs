// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use std::path::PathBuf;
use clio_config::AgentMode;

/// `clio mcp` subcommands.
#[derive(Subcommand, Debug)]
pub enum McpCommands {
    /// Serve clio's built-in tools to an MCP client over stdio.
    ///
    /// Run this as the command an MCP host (Cursor, Claude Desktop, …)
    /// launches; see the `clio-mcp` crate docs for `mcp.json` examples.
    Serve {
        /// Comma-separated list of tool names to expose (default: all).
        #[arg(long)]
        tools: Option<String>,
    },

    /// Connect to a configured `tools.mcp_servers` entry and report its
    /// handshake result (protocol version, server info, tool count).
    ///
    /// Exits non-zero if the server is disabled or the connection fails.
    ClientTest {
        /// Name of the server entry in `tools.mcp_servers`.
        server: String,
    },
}

/// Output format for headless (`clio run`) output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormatArg {
    /// Only the assistant's streamed text on stdout.
    #[default]
    Text,
    /// One JSON object per event, newline-delimited, on stdout.
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "clio",
    about = "An efficient AI coding agent runtime",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to config file (overrides auto-discovery)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve an ACP (Agent Client Protocol) agent over stdin/stdout.
    ///
    /// This is the default when `clio` is invoked with no subcommand,
    /// matching how IDEs (Zed and others) launch ACP agents.
    Acp,

    /// Run one prompt headlessly (no ACP client attached) and print the
    /// transcript to stdout.
    Run {
        /// The prompt text. Omit (or pass "-") to read from stdin.
        #[arg(value_name = "PROMPT")]
        prompt: Option<String>,

        /// Agent mode.
        #[arg(long, short = 'm', value_enum, default_value = "agent")]
        mode: AgentMode,

        /// Project root (default: auto-detected from the current directory).
        #[arg(long)]
        project_root: Option<PathBuf>,

        /// Output format.
        #[arg(long, value_enum, default_value = "text")]
        output_format: OutputFormatArg,

        /// Total run timeout in seconds (default: no limit).
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Override the system prompt by reading from a file.
        #[arg(long, value_name = "PATH")]
        system_prompt_file: Option<PathBuf>,

        /// Append text to the default system prompt.
        #[arg(long, value_name = "TEXT")]
        append_system_prompt: Option<String>,
    },

    /// MCP server / client diagnostics.
    Mcp {
        #[command(subcommand)]
        command: McpCommands,
    },

    /// Generate shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Print the effective configuration and exit
    ShowConfig,

    /// List available models for the configured provider(s).
    ListModels {
        /// Filter by provider name (e.g. "openai", "anthropic", "groq")
        #[arg(long, short = 'p')]
        provider: Option<String>,
        /// Query the provider API for the live list of available models
        #[arg(long)]
        refresh: bool,
        /// Output as JSON instead of a formatted table
        #[arg(long)]
        json: bool,
    },

    /// List all supported model providers.
    ListProviders {
        /// Show detailed information for each provider
        #[arg(long, short = 'v')]
        verbose: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "clio", &mut std::io::stdout());
}
