//! Plugin discovery strategies
//!
//! How candidates are found is pluggable so the admission logic in the
//! plugin host is unaffected by it: a directory scan for deployed servers,
//! a static registry for embedders and tests.

use std::path::PathBuf;
use std::sync::Arc;

use riptide_plugin_api::Plugin;

/// One place a plugin candidate may come from.
pub enum CandidateSource {
    /// A directory expected to contain a `plugin.toml` manifest and the
    /// plugin's dynamic library.
    Directory(PathBuf),
    /// An in-process plugin instance, no filesystem involved.
    Static(Arc<dyn Plugin>),
}

/// Enumerates plugin candidates. Implementations never load or validate
/// anything; that is the plugin host's job.
pub trait PluginDiscovery: Send + Sync {
    fn candidates(&self) -> Vec<CandidateSource>;
}

/// Scans the immediate subdirectories of a set of root directories.
/// Unreadable roots are skipped silently - an absent plugin directory is
/// the normal case, not an error.
pub struct DirectoryScan {
    roots: Vec<PathBuf>,
}

impl DirectoryScan {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// The conventional search paths used when no explicit plugins
    /// directory is configured: `<config dir>/riptide/plugins` and
    /// `~/.riptide/plugins`.
    pub fn conventional() -> Self {
        let mut roots = Vec::new();
        if let Some(config) = dirs::config_dir() {
            roots.push(config.join("riptide").join("plugins"));
        }
        if let Some(home) = dirs::home_dir() {
            roots.push(home.join(".riptide").join("plugins"));
        }
        Self::new(roots)
    }
}

impl PluginDiscovery for DirectoryScan {
    fn candidates(&self) -> Vec<CandidateSource> {
        let mut found = Vec::new();
        for root in &self.roots {
            let entries = match std::fs::read_dir(root) {
                Ok(entries) => entries,
                Err(_) => {
                    tracing::debug!(dir = %root.display(), "plugin directory not readable, skipping");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    found.push(CandidateSource::Directory(path));
                }
            }
        }
        found
    }
}

/// A fixed set of in-process plugins.
pub struct StaticRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl StaticRegistry {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }
}

impl PluginDiscovery for StaticRegistry {
    fn candidates(&self) -> Vec<CandidateSource> {
        self.plugins
            .iter()
            .map(|p| CandidateSource::Static(p.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_scan_lists_subdirectories_only() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("plugin-a")).unwrap();
        std::fs::create_dir(root.path().join("plugin-b")).unwrap();
        std::fs::write(root.path().join("stray-file.txt"), "not a plugin").unwrap();

        let scan = DirectoryScan::new(vec![root.path().to_path_buf()]);
        let candidates = scan.candidates();
        assert_eq!(candidates.len(), 2);
        assert!(candidates
            .iter()
            .all(|c| matches!(c, CandidateSource::Directory(_))));
    }

    #[test]
    fn missing_root_yields_no_candidates() {
        let scan = DirectoryScan::new(vec![PathBuf::from("/nonexistent/riptide/plugins")]);
        assert!(scan.candidates().is_empty());
    }
}
