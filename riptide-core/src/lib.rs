//! riptide-core: Control plane for the riptide realtime server
//!
//! This crate provides the lifecycle and dispatch machinery of a riptide
//! node:
//!
//! - **Lifecycle** - [`Server`] drives a flat state machine from `Stopped`
//!   through the init states to `Running` and back down, gating each phase
//!   on the readiness of its dependencies
//! - **Plugin host** - [`PluginHost`] discovers, filters, and loads native
//!   plugins which register [`Hook`]s against the server's hook bus
//! - **Hook host** - [`HookHost`] dispatches named events to registered
//!   hooks, serially or in parallel
//! - **Dispatch** - [`MessageDistributor`] routes inbound messages through
//!   the topic hook pipeline to the registered [`TopicHandler`]s
//! - **Collaborator contracts** - [`Dependency`], [`Logger`],
//!   [`ConnectionEndpoint`], and the handler traits; working defaults for
//!   all of them live in [`default_plugins`]
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use riptide_core::mock::{MockEndpoint, recording_handlers};
//! use riptide_core::{ConnectionEndpoint, Server, ServerNotification, ServerOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let endpoint: Arc<dyn ConnectionEndpoint> = MockEndpoint::ready();
//!     let (handlers, _, _) = recording_handlers();
//!
//!     let server = Server::new(ServerOptions::new(vec![endpoint], handlers));
//!     let mut notifications = server.subscribe();
//!
//!     server.start()?;
//!     while notifications.recv().await? != ServerNotification::Started {}
//!     assert!(server.is_running());
//!
//!     server.stop()?;
//!     Ok(())
//! }
//! ```

pub mod default_plugins;
pub mod dependency;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod hooks;
pub mod lifecycle;
pub mod logger;
pub mod message;
pub mod mock;
pub mod options;
pub mod plugins;
pub mod services;
pub mod shutdown;

// Re-export key types for convenience
pub use dependency::{Dependency, DependencyEvent, ReadinessGate};
pub use dispatch::MessageDistributor;
pub use endpoint::{ConnectionEndpoint, EndpointEvent};
pub use error::{PluginHostError, ServerError};
pub use hooks::HookHost;
pub use lifecycle::{Server, ServerNotification, ServerState, TransitionName};
pub use logger::{LogEvent, LogLevel, Logger};
pub use message::{CodecError, ConnectionHandle, Message, MessageCodec, Topic};
pub use options::{DEFAULT_DEPENDENCY_INIT_TIMEOUT, PluginLoaderConfig, ServerOptions};
pub use plugins::{
    DiscoveryReport, PluginHost, RejectReason, RejectedCandidate,
    discovery::{CandidateSource, DirectoryScan, PluginDiscovery, StaticRegistry},
};
pub use services::{ClusterRegistry, PresenceHandler, TopicHandler, TopicHandlers};
pub use shutdown::ShutdownBarrier;

// The plugin-facing API types, re-exported so embedders need only one crate.
pub use riptide_plugin_api::{Hook, HookBus, HookContext, Plugin, PluginError, PluginManifest, events};
