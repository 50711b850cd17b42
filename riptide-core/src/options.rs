//! Server options
//!
//! Collaborator wiring plus the deserializable plugin-loader slice. Config
//! file loading and merging live outside the core; embedders hand over a
//! fully built [`ServerOptions`].

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::default_plugins::{
    LocalCache, NoopMessageConnector, NoopStorage, SingleNodeCluster, TracingLogger,
    TypedJsonCodec,
};
use crate::dependency::Dependency;
use crate::endpoint::ConnectionEndpoint;
use crate::logger::{LogLevel, Logger};
use crate::message::MessageCodec;
use crate::plugins::discovery::PluginDiscovery;
use crate::services::{ClusterRegistry, TopicHandlers};

/// Default wait for any one dependency to become ready.
pub const DEFAULT_DEPENDENCY_INIT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Configuration slice for the plugin loader.
///
/// When `enabled` is false the loader is inert: no filesystem access, no
/// registrations, and every hook emission takes the no-op path.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginLoaderConfig {
    #[serde(default)]
    pub enabled: bool,

    /// If set, discovery only looks in this directory. Otherwise a
    /// conventional set of search paths is scanned.
    #[serde(default)]
    pub plugins_dir: Option<PathBuf>,

    /// Allow-list by plugin name. Absent means everything is allowed.
    #[serde(default)]
    pub include: Option<HashSet<String>>,

    /// Deny-list by plugin name, applied after `include`.
    #[serde(default)]
    pub exclude: Option<HashSet<String>>,

    /// Per-plugin options, keyed by plugin name. Each admitted plugin
    /// receives only its own slice at registration.
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

/// Everything the lifecycle needs to bring a node up and down.
///
/// Defaults mirror a bare single-node server: tracing-backed logger, local
/// cache, no-op storage and message connector, no plugins discovered.
#[derive(Clone)]
pub struct ServerOptions {
    /// Unique name for this node; defaults to a generated id.
    pub server_name: String,
    pub log_level: LogLevel,
    pub logger: Arc<dyn Logger>,
    /// Configured plugin-type dependencies, in initialisation order.
    /// Kinds must be unique.
    pub plugins: Vec<(String, Arc<dyn Dependency>)>,
    pub connection_endpoints: Vec<Arc<dyn ConnectionEndpoint>>,
    pub handlers: TopicHandlers,
    pub cluster: Arc<dyn ClusterRegistry>,
    pub codec: Arc<dyn MessageCodec>,
    pub plugin_loader: PluginLoaderConfig,
    /// Discovery strategy override; defaults to a directory scan driven by
    /// `plugin_loader`. Mainly for embedders and tests.
    pub plugin_discovery: Option<Arc<dyn PluginDiscovery>>,
    pub dependency_init_timeout: Duration,
}

impl ServerOptions {
    pub fn new(
        connection_endpoints: Vec<Arc<dyn ConnectionEndpoint>>,
        handlers: TopicHandlers,
    ) -> Self {
        Self {
            server_name: uuid::Uuid::new_v4().to_string(),
            log_level: LogLevel::Info,
            logger: Arc::new(TracingLogger::new()),
            plugins: vec![
                (
                    "message-connector".to_string(),
                    Arc::new(NoopMessageConnector::new()) as Arc<dyn Dependency>,
                ),
                (
                    "cache".to_string(),
                    Arc::new(LocalCache::new()) as Arc<dyn Dependency>,
                ),
                (
                    "storage".to_string(),
                    Arc::new(NoopStorage::new()) as Arc<dyn Dependency>,
                ),
            ],
            connection_endpoints,
            handlers,
            cluster: Arc::new(SingleNodeCluster::new()),
            codec: Arc::new(TypedJsonCodec),
            plugin_loader: PluginLoaderConfig::default(),
            plugin_discovery: None,
            dependency_init_timeout: DEFAULT_DEPENDENCY_INIT_TIMEOUT,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Replace a configured plugin type, or append a new one.
    pub fn with_plugin(mut self, kind: impl Into<String>, plugin: Arc<dyn Dependency>) -> Self {
        let kind = kind.into();
        if let Some(entry) = self.plugins.iter_mut().find(|(k, _)| *k == kind) {
            entry.1 = plugin;
        } else {
            self.plugins.push((kind, plugin));
        }
        self
    }

    pub fn with_plugin_loader(mut self, config: PluginLoaderConfig) -> Self {
        self.plugin_loader = config;
        self
    }

    pub fn with_plugin_discovery(mut self, discovery: Arc<dyn PluginDiscovery>) -> Self {
        self.plugin_discovery = Some(discovery);
        self
    }

    pub fn with_cluster(mut self, cluster: Arc<dyn ClusterRegistry>) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_dependency_init_timeout(mut self, timeout: Duration) -> Self {
        self.dependency_init_timeout = timeout;
        self
    }
}
