//! PluginHost - discovers, admits, and keeps loaded plugins alive
//!
//! Discovery enumerates candidates, admission filters and loads them, and
//! every outcome is accounted for in a [`DiscoveryReport`]. A candidate that
//! fails any admission step is rejected with a reason; it never aborts
//! discovery of the rest.

pub mod discovery;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use thiserror::Error;

use riptide_plugin_api::{API_VERSION, Plugin, PluginError, PluginManifest};

use crate::error::PluginHostError;
use crate::hooks::HookHost;
use crate::options::PluginLoaderConfig;
use discovery::{CandidateSource, PluginDiscovery};

/// Why one candidate was not admitted.
#[derive(Error, Debug)]
pub enum RejectReason {
    #[error("no plugin.toml manifest")]
    ManifestMissing,

    #[error("manifest invalid: {0}")]
    ManifestInvalid(String),

    #[error("manifest is not marked riptide_plugin = true, or has no name")]
    NotMarked,

    #[error("not on the include list")]
    NotIncluded,

    #[error("on the exclude list")]
    Excluded,

    #[error("plugin API version mismatch: host {host}, plugin {plugin}")]
    ApiVersionMismatch { host: u32, plugin: u32 },

    #[error("load failed: {0}")]
    LoadFailed(#[source] PluginHostError),

    #[error("registration failed: {0}")]
    RegistrationFailed(#[source] PluginError),
}

/// One candidate that did not make it, and why.
#[derive(Debug)]
pub struct RejectedCandidate {
    /// Where the candidate came from: a directory path or a plugin name.
    pub source: String,
    pub reason: RejectReason,
}

/// The full outcome of one discovery pass.
///
/// Nothing is skipped silently: every candidate the discovery strategy
/// produced appears either in `admitted` or in `rejected`.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub admitted: Vec<PluginManifest>,
    pub rejected: Vec<RejectedCandidate>,
}

impl DiscoveryReport {
    pub fn is_admitted(&self, name: &str) -> bool {
        self.admitted.iter().any(|m| m.name == name)
    }
}

enum PluginInstance {
    /// Created through the library's C ABI entry point.
    Owned(Box<dyn Plugin>),
    /// Provided in-process by a static registry.
    Shared(Arc<dyn Plugin>),
}

/// A loaded plugin together with its library.
///
/// Field order is load-bearing: the instance, and any hooks it produced,
/// reference code inside the library, so the instance must drop first.
struct LoadedPlugin {
    manifest: PluginManifest,
    _instance: PluginInstance,
    _library: Option<Library>,
}

/// Keeps admitted plugins and their dynamic libraries alive.
///
/// Hooks registered by plugins point into plugin library code, so the host
/// must be dropped only after every hook registration is gone.
pub struct PluginHost {
    plugins: Vec<LoadedPlugin>,
}

impl PluginHost {
    /// A host with nothing loaded. Used whenever the plugin loader is not
    /// enabled.
    pub fn disabled() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    /// Run one discovery pass: enumerate candidates, admit each one through
    /// the filter pipeline, and register admitted plugins against `bus`.
    ///
    /// A disabled loader returns an empty host and an empty report without
    /// consulting the discovery strategy at all.
    pub fn load(
        config: &PluginLoaderConfig,
        discovery: &dyn PluginDiscovery,
        bus: &HookHost,
    ) -> (Self, DiscoveryReport) {
        if !config.enabled {
            return (Self::disabled(), DiscoveryReport::default());
        }

        let mut plugins = Vec::new();
        let mut report = DiscoveryReport::default();

        for candidate in discovery.candidates() {
            let source = describe_source(&candidate);
            match admit(config, bus, candidate) {
                Ok(plugin) => {
                    tracing::info!(
                        plugin = %plugin.manifest.name,
                        version = %plugin.manifest.version,
                        "Plugin admitted"
                    );
                    report.admitted.push(plugin.manifest.clone());
                    plugins.push(plugin);
                }
                Err(reason) => {
                    tracing::warn!(source = %source, reason = %reason, "Plugin rejected");
                    report.rejected.push(RejectedCandidate { source, reason });
                }
            }
        }

        (Self { plugins }, report)
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }
}

fn describe_source(candidate: &CandidateSource) -> String {
    match candidate {
        CandidateSource::Directory(dir) => dir.display().to_string(),
        CandidateSource::Static(plugin) => plugin.manifest().name,
    }
}

/// The admission pipeline for one candidate. The first failed step rejects.
fn admit(
    config: &PluginLoaderConfig,
    bus: &HookHost,
    candidate: CandidateSource,
) -> Result<LoadedPlugin, RejectReason> {
    match candidate {
        CandidateSource::Directory(dir) => admit_directory(config, bus, &dir),
        CandidateSource::Static(plugin) => admit_static(config, bus, plugin),
    }
}

fn admit_directory(
    config: &PluginLoaderConfig,
    bus: &HookHost,
    dir: &Path,
) -> Result<LoadedPlugin, RejectReason> {
    let raw = std::fs::read_to_string(dir.join("plugin.toml"))
        .map_err(|_| RejectReason::ManifestMissing)?;
    let manifest =
        PluginManifest::from_toml(&raw).map_err(|e| RejectReason::ManifestInvalid(e.to_string()))?;

    check_filters(config, &manifest)?;

    let lib_path = find_library(dir, &manifest.name)
        .ok_or_else(|| RejectReason::LoadFailed(PluginHostError::MissingLibrary(dir.to_path_buf())))?;

    // SAFETY: the library was placed in a configured plugin directory and
    // passed the manifest checks; it is expected to honour the export_plugin
    // ABI contract.
    let library = unsafe { Library::new(&lib_path) }
        .map_err(|e| RejectReason::LoadFailed(PluginHostError::Library(e)))?;

    let plugin_api_version = unsafe {
        library
            .get::<extern "C" fn() -> u32>(b"_riptide_plugin_api_version")
            .map_err(|e| RejectReason::LoadFailed(PluginHostError::Library(e)))?()
    };
    if plugin_api_version != API_VERSION {
        return Err(RejectReason::ApiVersionMismatch {
            host: API_VERSION,
            plugin: plugin_api_version,
        });
    }

    // SAFETY: create returns a Box::into_raw pointer that we take ownership
    // of; destroy is intentionally not called since the Box drop glue lives
    // in the still-loaded library.
    let instance = unsafe {
        let create = library
            .get::<extern "C" fn() -> *mut dyn Plugin>(b"_riptide_plugin_create")
            .map_err(|e| RejectReason::LoadFailed(PluginHostError::Library(e)))?;
        Box::from_raw(create())
    };

    instance
        .register(bus, config.options.get(&manifest.name))
        .map_err(RejectReason::RegistrationFailed)?;

    Ok(LoadedPlugin {
        manifest,
        _instance: PluginInstance::Owned(instance),
        _library: Some(library),
    })
}

fn admit_static(
    config: &PluginLoaderConfig,
    bus: &HookHost,
    plugin: Arc<dyn Plugin>,
) -> Result<LoadedPlugin, RejectReason> {
    let manifest = plugin.manifest();
    check_filters(config, &manifest)?;

    if manifest.api_version != API_VERSION {
        return Err(RejectReason::ApiVersionMismatch {
            host: API_VERSION,
            plugin: manifest.api_version,
        });
    }

    plugin
        .register(bus, config.options.get(&manifest.name))
        .map_err(RejectReason::RegistrationFailed)?;

    Ok(LoadedPlugin {
        manifest,
        _instance: PluginInstance::Shared(plugin),
        _library: None,
    })
}

/// Marker, include, and exclude checks, in that order.
fn check_filters(config: &PluginLoaderConfig, manifest: &PluginManifest) -> Result<(), RejectReason> {
    if !manifest.is_candidate() {
        return Err(RejectReason::NotMarked);
    }
    if let Some(include) = &config.include {
        if !include.contains(&manifest.name) {
            return Err(RejectReason::NotIncluded);
        }
    }
    if let Some(exclude) = &config.exclude {
        if exclude.contains(&manifest.name) {
            return Err(RejectReason::Excluded);
        }
    }
    Ok(())
}

/// Locate the plugin's dynamic library next to its manifest.
///
/// Tries `<name>.<ext>` and `lib<name>.<ext>`, with dashes also tried as
/// underscores since cargo normalises crate names that way.
fn find_library(dir: &Path, name: &str) -> Option<PathBuf> {
    let extensions: &[&str] = if cfg!(target_os = "macos") {
        &["dylib", "so"]
    } else if cfg!(target_os = "windows") {
        &["dll"]
    } else {
        &["so"]
    };

    let underscored = name.replace('-', "_");
    for stem in [name, underscored.as_str()] {
        for ext in extensions {
            for file in [format!("{stem}.{ext}"), format!("lib{stem}.{ext}")] {
                let path = dir.join(file);
                if path.exists() {
                    return Some(path);
                }
            }
        }
    }
    None
}
