// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{self, Read};
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use clap::Parser;
use cli::{Cli, Commands, McpCommands, OutputFormatArg};
use clio_ci::{CiOptions, CiRunner, OutputFormat};
use clio_model::catalog::ModelCatalogEntry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Subcommands that never need a config/model pair.
    if let Some(Commands::Completions { shell }) = &cli.command {
        cli::print_completions(*shell);
        return Ok(());
    }

    let config = Arc::new(clio_config::load(cli.config.as_deref())?);

    match cli.command.unwrap_or(Commands::Acp) {
        Commands::Acp => {
            let model: Arc<dyn clio_model::ModelProvider> =
                Arc::from(clio_model::from_config(&config.model)?);
            clio_acp::serve_stdio(config, model).await
        }

        Commands::Run {
            prompt,
            mode,
            project_root,
            output_format,
            timeout,
            system_prompt_file,
            append_system_prompt,
        } => run_headless(
            config,
            prompt,
            mode,
            project_root,
            output_format,
            timeout,
            system_prompt_file,
            append_system_prompt,
        )
        .await,

        Commands::Mcp { command } => run_mcp_command(config, command).await,

        Commands::ShowConfig => {
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }

        Commands::ListModels {
            provider,
            refresh,
            json,
        } => list_models_cmd(&config, provider.as_deref(), refresh, json).await,

        Commands::ListProviders { verbose, json } => list_providers_cmd(verbose, json),

        Commands::Completions { .. } => unreachable!("handled above"),
    }
}

// ── `clio run` ────────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
async fn run_headless(
    config: Arc<clio_config::Config>,
    prompt: Option<String>,
    mode: clio_config::AgentMode,
    project_root: Option<std::path::PathBuf>,
    output_format: OutputFormatArg,
    timeout: Option<u64>,
    system_prompt_file: Option<std::path::PathBuf>,
    append_system_prompt: Option<String>,
) -> anyhow::Result<()> {
    let prompt = match prompt {
        Some(p) if p != "-" => p,
        _ => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("reading prompt from stdin")?;
            buf
        }
    };

    let project_root = project_root.or_else(|| clio_ci::find_project_root().ok());

    let model: Arc<dyn clio_model::ModelProvider> =
        Arc::from(clio_model::from_config(&config.model)?);

    let opts = CiOptions {
        mode,
        prompt,
        project_root,
        output_format: match output_format {
            OutputFormatArg::Text => OutputFormat::Text,
            OutputFormatArg::Json => OutputFormat::Json,
        },
        run_timeout_secs: timeout,
        system_prompt_file,
        append_system_prompt,
    };

    let exit_code = CiRunner::new(config, model).run(opts).await?;
    std::process::exit(exit_code);
}

// ── `clio mcp` ────────────────────────────────────────────────────────────

async fn run_mcp_command(
    config: Arc<clio_config::Config>,
    command: McpCommands,
) -> anyhow::Result<()> {
    match command {
        McpCommands::Serve { tools } => {
            let registry = Arc::new(clio_mcp::build_mcp_registry(
                config.tools.web.search.api_key.clone(),
                tools.as_deref(),
            ));
            clio_mcp::serve_stdio(registry).await
        }

        McpCommands::ClientTest { server } => client_test(&config, &server).await,
    }
}

/// Connect to one configured `tools.mcp_servers` entry and print its
/// handshake result. Exists purely as an operator diagnostic — there is no
/// equivalent in an interactive session, since `McpManager::connect_all`
/// runs silently at agent startup.
async fn client_test(config: &clio_config::Config, server_name: &str) -> anyhow::Result<()> {
    let entry = config
        .tools
        .mcp_servers
        .iter()
        .find(|s| s.name == server_name)
        .ok_or_else(|| anyhow::anyhow!("no mcp server named {server_name:?} in config"))?;

    if entry.disabled {
        anyhow::bail!("server {server_name:?} is disabled in config");
    }

    use clio_config::McpTransportConfig;
    use clio_mcp_client::{ClientInfo, McpClient};
    use std::sync::Arc as StdArc;

    let transport: StdArc<dyn clio_mcp_client::transport::Transport> = match &entry.transport {
        McpTransportConfig::Stdio { command, args, env } => StdArc::new(
            clio_mcp_client::transport::StdioTransport::new(
                command.clone(),
                args.clone(),
                env.clone(),
            ),
        ),
        McpTransportConfig::Http {
            url,
            headers,
            bearer_token,
        } => StdArc::new(clio_mcp_client::transport::HttpTransport::new(
            url.clone(),
            headers.clone(),
            bearer_token.clone(),
        )),
    };

    let client = McpClient::new(transport);
    client.connect(&ClientInfo::default()).await?;

    let tools = client.tools().await;
    if let Some(info) = client.server_info().await {
        println!("server      : {} {}", info.name, info.version);
    }
    println!("tools       : {}", tools.len());
    for t in &tools {
        println!("  - {}", t.name);
    }
    println!("status      : ok");
    Ok(())
}

// ── `clio list-models` / `clio list-providers` ───────────────────────────

async fn list_models_cmd(
    config: &clio_config::Config,
    provider_filter: Option<&str>,
    refresh: bool,
    as_json: bool,
) -> anyhow::Result<()> {
    if let Some(prov) = provider_filter {
        if clio_model::get_driver(prov).is_none() {
            eprintln!("Unknown provider: {prov:?}");
            eprintln!("\nAvailable providers (run `clio list-providers` for details):");
            for d in clio_model::list_drivers() {
                eprintln!("  {:20} {}", d.id, d.name);
            }
            anyhow::bail!("Invalid provider: {prov}");
        }
    }

    let entries: Vec<ModelCatalogEntry> = if refresh {
        let model_cfg = if let Some(prov) = provider_filter {
            let mut c = config.model.clone();
            c.provider = prov.to_string();
            c
        } else {
            config.model.clone()
        };
        let model = clio_model::from_config(&model_cfg)?;
        let mut live = model.list_models().await?;
        if let Some(prov) = provider_filter {
            live.retain(|e| e.provider == prov);
        }
        live
    } else {
        let mut all = clio_model::catalog::static_catalog();
        if let Some(prov) = provider_filter {
            all.retain(|e| e.provider == prov);
        }
        all.sort_by(|a, b| a.provider.cmp(&b.provider).then(a.id.cmp(&b.id)));
        all
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No models found.");
        return Ok(());
    }

    let id_w = entries.iter().map(|e| e.id.len()).max().unwrap_or(10).max(10);
    let prov_w = entries
        .iter()
        .map(|e| e.provider.len())
        .max()
        .unwrap_or(8)
        .max(8);

    println!(
        "{:<id_w$}  {:<prov_w$}  {:>12}  {:>16}  DESCRIPTION",
        "ID",
        "PROVIDER",
        "CTX WINDOW",
        "MAX OUT TOKENS",
        id_w = id_w,
        prov_w = prov_w,
    );
    println!("{}", "-".repeat(id_w + prov_w + 50));

    for e in &entries {
        let ctx = if e.context_window == 0 {
            "  -".to_string()
        } else {
            format!("{:>12}", e.context_window)
        };
        let max_out = if e.max_output_tokens == 0 {
            "  -".to_string()
        } else {
            format!("{:>16}", e.max_output_tokens)
        };
        println!(
            "{:<id_w$}  {:<prov_w$}  {}  {}  {}",
            e.id,
            e.provider,
            ctx,
            max_out,
            e.description,
            id_w = id_w,
            prov_w = prov_w,
        );
    }
    println!("\nTotal: {} model(s)", entries.len());
    Ok(())
}

fn list_providers_cmd(verbose: bool, as_json: bool) -> anyhow::Result<()> {
    let drivers = clio_model::list_drivers();

    if as_json {
        #[derive(serde::Serialize)]
        struct ProviderJson {
            id: &'static str,
            name: &'static str,
            description: &'static str,
            default_api_key_env: Option<&'static str>,
            default_base_url: Option<&'static str>,
            requires_api_key: bool,
        }
        let rows: Vec<ProviderJson> = drivers
            .iter()
            .map(|d| ProviderJson {
                id: d.id,
                name: d.name,
                description: d.description,
                default_api_key_env: d.default_api_key_env,
                default_base_url: d.default_base_url,
                requires_api_key: d.requires_api_key,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Supported Model Providers ({} total)\n", drivers.len());

    if verbose {
        for d in drivers {
            println!("  {} — {}", d.id, d.name);
            println!("    {}", d.description);
            if let Some(env) = d.default_api_key_env {
                println!("    API key env : {env}");
            }
            if let Some(url) = d.default_base_url {
                println!("    Default URL : {url}");
            }
            if !d.requires_api_key {
                println!("    Auth        : none required");
            }
            println!();
        }
    } else {
        let id_w = drivers.iter().map(|d| d.id.len()).max().unwrap_or(10).max(10);
        let name_w = drivers
            .iter()
            .map(|d| d.name.len())
            .max()
            .unwrap_or(8)
            .max(8);
        println!("{:<id_w$}  {:<name_w$}  DESCRIPTION", "ID", "NAME");
        println!("{}", "-".repeat(id_w + name_w + 40));
        for d in drivers {
            println!("{:<id_w$}  {:<name_w$}  {}", d.id, d.name, d.description);
        }
        println!("\nUse `clio list-providers --verbose` for API key and URL details.");
        println!("Use `clio list-models --provider <ID>` to see models for a specific provider.");
    }
    Ok(())
}

// ── logging ───────────────────────────────────────────────────────────────

/// `clio acp` and `clio mcp serve` both speak JSON-RPC on stdout; tracing
/// output must never land there, so it always goes to stderr regardless of
/// subcommand.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
