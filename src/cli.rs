//! Command-line argument parsing for plugkit

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// plugkit - plugin-based LLM command dispatch
#[derive(Parser, Debug)]
#[command(name = "plugkit")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to settings file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Plugins directory (overrides settings)
    #[arg(short, long, value_name = "DIR")]
    pub plugins_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List loaded plugins
    List,
    /// Show a plugin's commands, agents, and skills
    Show {
        /// Plugin name
        plugin: String,
    },
    /// Run a plugin command
    Run {
        /// Plugin name
        plugin: String,
        /// Command name
        command: String,
        /// User input passed to the command
        input: String,
        /// Treat the name as an agent instead of a command
        #[arg(long)]
        agent: bool,
        /// Fail instead of degrading when MCP tools are unavailable
        #[arg(long)]
        require_tools: bool,
        /// Sampling temperature
        #[arg(short, long)]
        temperature: Option<f32>,
    },
}
