//! Plugin loading
//!
//! A plugin is a directory bundling a manifest, markdown command/agent/skill
//! definitions, and an optional MCP server configuration:
//!
//! ```text
//! <plugin-dir>/
//!     .claude-plugin/plugin.json
//!     commands/*.md
//!     agents/*.md
//!     skills/<name>/SKILL.md
//!     .mcp.json
//! ```
//!
//! Markdown contents are opaque instructional text; plugkit never interprets
//! them, it only hands them to a capability provider.

use crate::error::LoadError;
use crate::manifest::{PluginManifest, MANIFEST_DIR, MANIFEST_FILE};
use crate::mcp::McpServerConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the per-plugin MCP configuration.
pub const MCP_CONFIG_FILE: &str = ".mcp.json";

/// Skill definition file name inside each skill subdirectory.
const SKILL_FILE: &str = "SKILL.md";

/// A loaded plugin: manifest plus named instruction texts.
#[derive(Debug, Clone)]
pub struct Plugin {
    manifest: PluginManifest,
    root: PathBuf,
    commands: HashMap<String, String>,
    agents: HashMap<String, String>,
    skills: HashMap<String, String>,
    mcp_servers: HashMap<String, McpServerConfig>,
}

/// On-disk shape of `.mcp.json`.
#[derive(Debug, Deserialize)]
struct McpConfigFile {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: HashMap<String, McpServerConfig>,
}

impl Plugin {
    /// Load a plugin from its directory.
    ///
    /// The manifest is required; `commands/`, `agents/`, `skills/` and
    /// `.mcp.json` are all optional and yield empty maps when absent.
    pub fn from_dir(root: &Path) -> Result<Self, LoadError> {
        let manifest_path = root.join(MANIFEST_DIR).join(MANIFEST_FILE);
        let manifest = PluginManifest::from_path(&manifest_path)?;

        let commands = load_markdown_dir(&root.join("commands"))?;
        let agents = load_markdown_dir(&root.join("agents"))?;
        let skills = load_skills_dir(&root.join("skills"))?;
        let mcp_servers = load_mcp_config(&root.join(MCP_CONFIG_FILE))?;

        debug!(
            "Loaded plugin '{}' v{}: {} commands, {} agents, {} skills, {} MCP servers",
            manifest.name,
            manifest.version,
            commands.len(),
            agents.len(),
            skills.len(),
            mcp_servers.len()
        );

        Ok(Self {
            manifest,
            root: root.to_path_buf(),
            commands,
            agents,
            skills,
            mcp_servers,
        })
    }

    /// Plugin name from the manifest.
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// Plugin version from the manifest.
    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    /// The full manifest.
    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    /// Directory this plugin was loaded from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Command text by name.
    pub fn command(&self, name: &str) -> Option<&str> {
        self.commands.get(name).map(String::as_str)
    }

    /// Agent text by name.
    pub fn agent(&self, name: &str) -> Option<&str> {
        self.agents.get(name).map(String::as_str)
    }

    /// Skill text by name.
    pub fn skill(&self, name: &str) -> Option<&str> {
        self.skills.get(name).map(String::as_str)
    }

    /// Sorted command names.
    pub fn command_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Sorted agent names.
    pub fn agent_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Sorted skill names.
    pub fn skill_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.skills.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Whether this plugin declares any MCP servers.
    pub fn has_mcp(&self) -> bool {
        !self.mcp_servers.is_empty()
    }

    /// Declared MCP servers (name -> launch config).
    pub fn mcp_servers(&self) -> &HashMap<String, McpServerConfig> {
        &self.mcp_servers
    }
}

/// Read every `*.md` file in `dir` into a stem -> contents map.
fn load_markdown_dir(dir: &Path) -> Result<HashMap<String, String>, LoadError> {
    let mut entries = HashMap::new();
    if !dir.is_dir() {
        return Ok(entries);
    }

    for entry in read_dir_sorted(dir)? {
        if !entry.is_file() || entry.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let Some(stem) = entry.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let text = std::fs::read_to_string(&entry).map_err(|e| LoadError::Read {
            path: entry.clone(),
            reason: e.to_string(),
        })?;

        if entries.insert(stem.to_string(), text).is_some() {
            return Err(LoadError::DuplicateEntry {
                kind: "definition",
                name: stem.to_string(),
                dir: dir.to_path_buf(),
            });
        }
    }

    Ok(entries)
}

/// Read every `skills/<name>/SKILL.md` into a name -> contents map.
fn load_skills_dir(dir: &Path) -> Result<HashMap<String, String>, LoadError> {
    let mut entries = HashMap::new();
    if !dir.is_dir() {
        return Ok(entries);
    }

    for entry in read_dir_sorted(dir)? {
        if !entry.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        let skill_file = entry.join(SKILL_FILE);
        if !skill_file.is_file() {
            debug!("Skipping skill dir without {}: {:?}", SKILL_FILE, entry);
            continue;
        }

        let text = std::fs::read_to_string(&skill_file).map_err(|e| LoadError::Read {
            path: skill_file.clone(),
            reason: e.to_string(),
        })?;

        entries.insert(name.to_string(), text);
    }

    Ok(entries)
}

/// Parse `.mcp.json` if present.
fn load_mcp_config(path: &Path) -> Result<HashMap<String, McpServerConfig>, LoadError> {
    if !path.is_file() {
        return Ok(HashMap::new());
    }

    let contents = std::fs::read_to_string(path).map_err(|e| LoadError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let config: McpConfigFile =
        serde_json::from_str(&contents).map_err(|e| LoadError::McpConfig {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok(config.mcp_servers)
}

/// Directory entries sorted by file name, so load results are deterministic
/// across platforms.
fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let reader = std::fs::read_dir(dir).map_err(|e| LoadError::Read {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut paths: Vec<PathBuf> = reader.filter_map(|e| e.ok().map(|e| e.path())).collect();
    paths.sort();
    Ok(paths)
}
