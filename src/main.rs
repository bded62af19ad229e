//! plugkit - plugin-based LLM command dispatch
//!
//! This is the main entry point for the plugkit binary.

use anyhow::{bail, Context, Result};
use clap::Parser;
use plugkit::cli::{Args, Command};
use plugkit::config::Settings;
use plugkit::dispatcher::Dispatcher;
use plugkit::provider::{ExecuteOptions, OpenAiProvider, ToolPolicy};
use plugkit::registry::PluginRegistry;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.debug);

    let settings = Settings::load(args.config.as_deref()).context("Failed to load settings")?;
    let plugins_dir = args
        .plugins_dir
        .clone()
        .unwrap_or_else(|| settings.plugins_dir.clone());

    let mut registry = PluginRegistry::new();
    let report = registry.load(&plugins_dir);
    for failure in &report.failures {
        warn!("{}: {}", failure.directory.display(), failure.error);
    }
    info!(
        "Loaded {} plugins from {}",
        report.loaded_count(),
        plugins_dir.display()
    );

    match args.command {
        Command::List => {
            for name in registry.list() {
                let plugin = registry.get(name)?;
                println!(
                    "{} v{} - {}",
                    name,
                    plugin.version(),
                    plugin.manifest().description.as_deref().unwrap_or("")
                );
            }
            if registry.is_empty() {
                println!("No plugins found in {}", plugins_dir.display());
            }
        }

        Command::Show { plugin } => {
            let plugin = registry.get(&plugin)?;
            println!("{} v{}", plugin.name(), plugin.version());
            if let Some(description) = &plugin.manifest().description {
                println!("{description}");
            }
            println!("commands: {}", plugin.command_names().join(", "));
            println!("agents:   {}", plugin.agent_names().join(", "));
            println!("skills:   {}", plugin.skill_names().join(", "));
            if plugin.has_mcp() {
                let mut servers: Vec<&str> =
                    plugin.mcp_servers().keys().map(String::as_str).collect();
                servers.sort_unstable();
                println!("mcp:      {}", servers.join(", "));
            }
        }

        Command::Run {
            plugin,
            command,
            input,
            agent,
            require_tools,
            temperature,
        } => {
            // The API key is resolved here, at the process edge; the
            // library itself never reads the environment.
            let key_var = &settings.provider.api_key_env;
            let Ok(api_key) = std::env::var(key_var) else {
                bail!("API key not found in ${key_var}");
            };

            let provider = OpenAiProvider::new(settings.openai_settings(api_key));
            let dispatcher = Dispatcher::new(Arc::new(registry), settings.mcp_settings());

            let options = ExecuteOptions {
                temperature,
                tool_policy: if require_tools {
                    ToolPolicy::Required
                } else {
                    ToolPolicy::Optional
                },
                ..Default::default()
            };

            let result = if agent {
                dispatcher
                    .execute_agent(&plugin, &command, &input, &provider, &options)
                    .await?
            } else {
                dispatcher
                    .execute_command(&plugin, &command, &input, &provider, &options)
                    .await?
            };

            println!("{}", result.text);
            if result.used_tools() {
                let tools: Vec<&str> = result
                    .tool_invocations
                    .iter()
                    .map(|i| i.tool.as_str())
                    .collect();
                info!("Tools used: {}", tools.join(", "));
            }

            dispatcher.shutdown().await;
        }
    }

    Ok(())
}

/// Initialize the logging/tracing subsystem
fn init_logging(debug: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
