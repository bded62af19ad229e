//! plugkit - a plugin-loading and LLM command dispatch framework
//!
//! Plugins are directories bundling a JSON manifest with markdown command,
//! agent, and skill definitions, plus an optional MCP server configuration
//! for tool calling:
//!
//! - [`registry::PluginRegistry`] discovers and holds plugins.
//! - [`dispatcher::Dispatcher`] resolves a named command or agent, attaches
//!   MCP tools, and delegates to a capability provider.
//! - [`provider::CapabilityProvider`] abstracts the LLM vendor; the bundled
//!   [`provider::OpenAiProvider`] speaks any OpenAI-compatible
//!   chat-completions API and drives bounded tool-call round trips.
//! - [`mcp`] spawns and speaks to MCP tool servers over stdio.
//! - [`routing::SmartRouter`] optionally augments free-text queries with
//!   web search before answering.

pub mod cli;
pub mod collab;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod manifest;
pub mod mcp;
pub mod plugin;
pub mod provider;
pub mod registry;
pub mod routing;

pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use manifest::PluginManifest;
pub use plugin::Plugin;
pub use provider::{CapabilityProvider, ExecuteOptions, ExecutionResult};
pub use registry::PluginRegistry;
