//! riptide-plugin-api - Plugin API for the riptide realtime server
//!
//! This crate provides the traits and types needed to write plugins for riptide.
//! Plugins are native Rust dynamic libraries that register hooks against the
//! server's hook bus and get to observe - or veto - every message the server
//! routes to its topic handlers.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use riptide_plugin_api::{
//!     Hook, HookBus, HookContext, Plugin, PluginError, PluginManifest, events, export_plugin,
//! };
//!
//! #[derive(Default)]
//! pub struct MyPlugin;
//!
//! struct DropAll;
//!
//! #[async_trait::async_trait]
//! impl Hook for DropAll {
//!     async fn invoke(&self, ctx: &HookContext) {
//!         ctx.set_skip();
//!     }
//! }
//!
//! impl Plugin for MyPlugin {
//!     fn manifest(&self) -> PluginManifest {
//!         PluginManifest {
//!             name: "my-plugin".to_string(),
//!             riptide_plugin: true,
//!             ..Default::default()
//!         }
//!     }
//!
//!     fn register(
//!         &self,
//!         bus: &dyn HookBus,
//!         _options: Option<&serde_json::Value>,
//!     ) -> Result<(), PluginError> {
//!         bus.register(events::TOPIC_EVENT, Arc::new(DropAll));
//!         Ok(())
//!     }
//! }
//!
//! export_plugin!(MyPlugin);
//! ```

pub mod error;
pub mod events;
pub mod hook;
pub mod types;

pub use error::PluginError;
pub use hook::{Hook, HookBus, HookContext};
pub use types::PluginManifest;

/// Current plugin API version. Plugins must match this exactly.
/// Checked when loading plugins to ensure ABI compatibility.
pub const API_VERSION: u32 = 1;

/// The core plugin trait - implement this to create a riptide plugin.
///
/// A plugin is handed the server's hook bus exactly once, during plugin
/// discovery, together with its own options slice from the server
/// configuration. Hooks registered there stay registered for the lifetime
/// of the host; there is no unregistration.
pub trait Plugin: Send + Sync {
    /// Return plugin metadata.
    ///
    /// For filesystem-discovered plugins this must agree with the
    /// `plugin.toml` manifest shipped next to the library.
    fn manifest(&self) -> PluginManifest;

    /// Called once at discovery time. Register hooks against the bus here.
    ///
    /// `options` is this plugin's slice of the server configuration, looked
    /// up by plugin name. Returning an error rejects the plugin; the server
    /// continues without it.
    fn register(
        &self,
        bus: &dyn HookBus,
        options: Option<&serde_json::Value>,
    ) -> Result<(), PluginError>;
}

/// Export a plugin type for dynamic loading.
///
/// Generates the C ABI entry points the riptide plugin host uses to load
/// plugins:
///
/// - `_riptide_plugin_create()`: creates a new plugin instance
/// - `_riptide_plugin_api_version()`: returns the API version
/// - `_riptide_plugin_destroy()`: destroys a plugin instance
///
/// # Usage
///
/// ```ignore
/// riptide_plugin_api::export_plugin!(MyPlugin);
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($plugin_type:ty) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn _riptide_plugin_create() -> *mut dyn $crate::Plugin {
            let plugin: Box<dyn $crate::Plugin> = Box::new(<$plugin_type>::default());
            Box::into_raw(plugin)
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn _riptide_plugin_api_version() -> u32 {
            $crate::API_VERSION
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn _riptide_plugin_destroy(ptr: *mut dyn $crate::Plugin) {
            if !ptr.is_null() {
                unsafe {
                    drop(Box::from_raw(ptr));
                }
            }
        }
    };
}
