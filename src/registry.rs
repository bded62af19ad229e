//! Plugin registry
//!
//! Discovers plugins under a directory and exposes them by name. Loading is
//! partial-success: one broken plugin never prevents the others from
//! loading, and every failure is reported back to the caller.

use crate::error::{DispatchError, LoadError};
use crate::manifest::{MANIFEST_DIR, MANIFEST_FILE};
use crate::plugin::Plugin;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of a [`PluginRegistry::load`] call.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Names of plugins loaded, in scan order.
    pub loaded: Vec<String>,
    /// Directories that contained a manifest but failed to load.
    pub failures: Vec<LoadFailure>,
}

/// One plugin directory that failed to load.
#[derive(Debug)]
pub struct LoadFailure {
    /// The offending plugin directory.
    pub directory: PathBuf,
    /// Why it failed.
    pub error: LoadError,
}

impl LoadReport {
    /// Number of plugins loaded successfully.
    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }
}

/// Registry of loaded plugins, keyed by manifest name.
///
/// Built once at startup and read-only afterwards; lookups take `&self`, so
/// a registry behind `Arc` is safe to share across tasks.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Plugin>,
    // Load order, for deterministic listing.
    order: Vec<String>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan the immediate subdirectories of `plugins_dir` and load every
    /// plugin found there.
    ///
    /// Subdirectories without a manifest are skipped silently (they may be
    /// unrelated). Subdirectories are visited in name order, so results are
    /// deterministic. A directory whose manifest declares a name that is
    /// already registered is rejected and reported; the first occurrence
    /// wins.
    pub fn load(&mut self, plugins_dir: &Path) -> LoadReport {
        let mut report = LoadReport::default();

        if !plugins_dir.is_dir() {
            debug!("Plugins directory does not exist: {:?}", plugins_dir);
            return report;
        }

        let mut dirs: Vec<PathBuf> = match std::fs::read_dir(plugins_dir) {
            Ok(reader) => reader
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_dir())
                .collect(),
            Err(e) => {
                warn!("Failed to read plugins directory {:?}: {}", plugins_dir, e);
                return report;
            }
        };
        dirs.sort();

        for dir in dirs {
            let hidden = dir
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if hidden {
                continue;
            }

            if !dir.join(MANIFEST_DIR).join(MANIFEST_FILE).is_file() {
                debug!("Skipping {:?}: no plugin manifest", dir);
                continue;
            }

            match Plugin::from_dir(&dir) {
                Ok(plugin) => {
                    let name = plugin.name().to_string();
                    if self.plugins.contains_key(&name) {
                        warn!("Rejecting {:?}: plugin '{}' already loaded", dir, name);
                        report.failures.push(LoadFailure {
                            directory: dir,
                            error: LoadError::DuplicateName { name },
                        });
                        continue;
                    }
                    self.order.push(name.clone());
                    report.loaded.push(name.clone());
                    self.plugins.insert(name, plugin);
                }
                Err(error) => {
                    warn!("Failed to load plugin from {:?}: {}", dir, error);
                    report.failures.push(LoadFailure {
                        directory: dir,
                        error,
                    });
                }
            }
        }

        info!(
            "Loaded {} plugins from {:?} ({} failed)",
            report.loaded.len(),
            plugins_dir,
            report.failures.len()
        );
        report
    }

    /// Look up a plugin by name.
    pub fn get(&self, name: &str) -> Result<&Plugin, DispatchError> {
        self.plugins
            .get(name)
            .ok_or_else(|| DispatchError::PluginNotFound(name.to_string()))
    }

    /// Plugin names in load order. The iterator is finite and restartable:
    /// calling `list()` again yields the same sequence.
    pub fn list(&self) -> impl Iterator<Item = &str> + '_ {
        self.order.iter().map(String::as_str)
    }

    /// Number of loaded plugins.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn add_plugin(root: &Path, dir_name: &str, manifest: &str) -> PathBuf {
        let dir = root.join(dir_name);
        std::fs::create_dir_all(dir.join(MANIFEST_DIR)).unwrap();
        std::fs::write(dir.join(MANIFEST_DIR).join(MANIFEST_FILE), manifest).unwrap();
        dir
    }

    #[test]
    fn test_load_empty_dir() {
        let tmp = TempDir::new().unwrap();
        let mut registry = PluginRegistry::new();

        let report = registry.load(tmp.path());
        assert_eq!(report.loaded_count(), 0);
        assert!(report.failures.is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_load_nonexistent_dir() {
        let mut registry = PluginRegistry::new();
        let report = registry.load(Path::new("/nonexistent/plugins"));
        assert_eq!(report.loaded_count(), 0);
    }

    #[test]
    fn test_load_and_get() {
        let tmp = TempDir::new().unwrap();
        add_plugin(
            tmp.path(),
            "story",
            r#"{"name": "story-plugin", "version": "1.2.3", "description": "Stories"}"#,
        );

        let mut registry = PluginRegistry::new();
        let report = registry.load(tmp.path());
        assert_eq!(report.loaded, vec!["story-plugin"]);

        let plugin = registry.get("story-plugin").unwrap();
        assert_eq!(plugin.version(), "1.2.3");
        assert_eq!(plugin.manifest().description.as_deref(), Some("Stories"));
    }

    #[test]
    fn test_get_unknown_plugin() {
        let registry = PluginRegistry::new();
        let err = registry.get("ghost").unwrap_err();
        assert!(matches!(err, DispatchError::PluginNotFound(_)));
    }

    #[test]
    fn test_partial_success() {
        let tmp = TempDir::new().unwrap();
        add_plugin(tmp.path(), "good", r#"{"name": "good", "version": "1.0.0"}"#);
        add_plugin(tmp.path(), "bad", "{broken json");

        let mut registry = PluginRegistry::new();
        let report = registry.load(tmp.path());

        assert_eq!(report.loaded, vec!["good"]);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].directory.ends_with("bad"));
        // The valid plugin is still usable.
        assert!(registry.get("good").is_ok());
    }

    #[test]
    fn test_non_plugin_dirs_skipped() {
        let tmp = TempDir::new().unwrap();
        add_plugin(tmp.path(), "real", r#"{"name": "real", "version": "1.0.0"}"#);
        std::fs::create_dir(tmp.path().join("unrelated")).unwrap();
        std::fs::create_dir_all(tmp.path().join(".hidden/.claude-plugin")).unwrap();

        let mut registry = PluginRegistry::new();
        let report = registry.load(tmp.path());

        assert_eq!(report.loaded, vec!["real"]);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_duplicate_name_rejected_first_wins() {
        let tmp = TempDir::new().unwrap();
        // Scan order is by directory name: "a-copy" before "b-copy".
        add_plugin(
            tmp.path(),
            "a-copy",
            r#"{"name": "twin", "version": "1.0.0", "description": "first"}"#,
        );
        add_plugin(
            tmp.path(),
            "b-copy",
            r#"{"name": "twin", "version": "2.0.0", "description": "second"}"#,
        );

        let mut registry = PluginRegistry::new();
        let report = registry.load(tmp.path());

        assert_eq!(report.loaded, vec!["twin"]);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].error,
            LoadError::DuplicateName { .. }
        ));
        // First directory in scan order won.
        assert_eq!(registry.get("twin").unwrap().version(), "1.0.0");
    }

    #[test]
    fn test_list_is_ordered_and_restartable() {
        let tmp = TempDir::new().unwrap();
        add_plugin(tmp.path(), "01-alpha", r#"{"name": "alpha", "version": "1.0.0"}"#);
        add_plugin(tmp.path(), "02-beta", r#"{"name": "beta", "version": "1.0.0"}"#);
        add_plugin(tmp.path(), "03-gamma", r#"{"name": "gamma", "version": "1.0.0"}"#);

        let mut registry = PluginRegistry::new();
        registry.load(tmp.path());

        let first: Vec<&str> = registry.list().collect();
        assert_eq!(first, vec!["alpha", "beta", "gamma"]);
        // Iterating again yields the same sequence.
        let second: Vec<&str> = registry.list().collect();
        assert_eq!(first, second);
    }
}
