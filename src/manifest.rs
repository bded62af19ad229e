//! Plugin manifest parsing
//!
//! Loads and validates the `plugin.json` descriptor found in a plugin's
//! `.claude-plugin/` directory.

use crate::error::ManifestError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Name of the directory holding the plugin manifest.
pub const MANIFEST_DIR: &str = ".claude-plugin";

/// Name of the manifest file inside [`MANIFEST_DIR`].
pub const MANIFEST_FILE: &str = "plugin.json";

/// Parsed plugin manifest.
///
/// Only `name` and `version` are required; everything else is optional so
/// that manifests written for other hosts of the same format keep loading.
/// Unknown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Unique plugin identifier (kebab-case by convention)
    pub name: String,
    /// Plugin version (semantic version by convention)
    pub version: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Author name or contact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Homepage URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    /// Repository URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// License identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Search keywords
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    /// Declared dependencies (name -> version requirement)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<HashMap<String, String>>,
    /// MCP server declarations embedded in the manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_servers: Option<HashMap<String, serde_json::Value>>,
}

impl PluginManifest {
    /// Load a manifest from a file path.
    ///
    /// Fails with [`ManifestError::NotFound`] if the file is absent,
    /// [`ManifestError::Malformed`] on invalid JSON, and
    /// [`ManifestError::MissingField`] when `name` or `version` is missing
    /// or empty. Version strings that are not valid semver are accepted
    /// with a warning.
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        if !path.exists() {
            return Err(ManifestError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path).map_err(|e| ManifestError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let manifest: PluginManifest =
            serde_json::from_str(&contents).map_err(|e| {
                // serde reports a missing required field as a data error;
                // surface it under the dedicated variant instead.
                let msg = e.to_string();
                for field in ["name", "version"] {
                    if msg.contains(&format!("missing field `{field}`")) {
                        return ManifestError::MissingField {
                            path: path.to_path_buf(),
                            field: field.to_string(),
                        };
                    }
                }
                ManifestError::Malformed {
                    path: path.to_path_buf(),
                    reason: msg,
                }
            })?;

        manifest.validate(path)?;
        Ok(manifest)
    }

    /// Validate required fields and warn on suspicious optional ones.
    fn validate(&self, path: &Path) -> Result<(), ManifestError> {
        if self.name.trim().is_empty() {
            return Err(ManifestError::MissingField {
                path: path.to_path_buf(),
                field: "name".to_string(),
            });
        }
        if self.version.trim().is_empty() {
            return Err(ManifestError::MissingField {
                path: path.to_path_buf(),
                field: "version".to_string(),
            });
        }

        if !looks_like_semver(&self.version) {
            warn!(
                "Plugin '{}' version '{}' is not semantic versioning",
                self.name, self.version
            );
        }

        Ok(())
    }
}

/// Best-effort semver shape check: `MAJOR.MINOR.PATCH` with numeric parts,
/// optionally followed by a pre-release/build suffix.
fn looks_like_semver(version: &str) -> bool {
    let core = version
        .split_once(['-', '+'])
        .map_or(version, |(core, _)| core);
    let parts: Vec<&str> = core.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}
