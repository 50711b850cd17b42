//! Plugin manifest types
//!
//! Filesystem-discovered plugins ship a `plugin.toml` next to their dynamic
//! library. Only manifests carrying the `riptide_plugin = true` marker and a
//! non-empty name are considered plugin candidates.

use serde::{Deserialize, Serialize};

/// Plugin manifest containing metadata about the plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Plugin name (used for include/exclude filtering and options lookup)
    #[serde(default)]
    pub name: String,
    /// Plugin version (semver)
    #[serde(default = "default_version")]
    pub version: String,
    /// API version this plugin was built against
    #[serde(default = "default_api_version")]
    pub api_version: u32,
    /// Marker identifying the package as a riptide plugin. Packages without
    /// it are ignored by discovery.
    #[serde(default)]
    pub riptide_plugin: bool,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Plugin author
    #[serde(default)]
    pub author: String,
}

fn default_version() -> String {
    "0.0.1".to_string()
}

fn default_api_version() -> u32 {
    crate::API_VERSION
}

impl Default for PluginManifest {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: default_version(),
            api_version: crate::API_VERSION,
            riptide_plugin: false,
            description: String::new(),
            author: String::new(),
        }
    }
}

impl PluginManifest {
    /// Parse a manifest from the contents of a `plugin.toml` file.
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// True if this manifest describes a loadable plugin candidate:
    /// the marker is set and the name is non-empty.
    pub fn is_candidate(&self) -> bool {
        self.riptide_plugin && !self.name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_toml_roundtrip() {
        let manifest = PluginManifest {
            name: "test-plugin".to_string(),
            version: "1.0.0".to_string(),
            api_version: 1,
            riptide_plugin: true,
            description: "A test plugin".to_string(),
            author: "Test Author".to_string(),
        };

        let toml_str = toml::to_string(&manifest).expect("Failed to serialize");
        let parsed = PluginManifest::from_toml(&toml_str).expect("Failed to parse");

        assert_eq!(manifest.name, parsed.name);
        assert_eq!(manifest.version, parsed.version);
        assert!(parsed.is_candidate());
    }

    #[test]
    fn minimal_manifest_uses_defaults() {
        let parsed = PluginManifest::from_toml("name = \"tiny\"\nriptide_plugin = true\n")
            .expect("Failed to parse");

        assert_eq!(parsed.name, "tiny");
        assert_eq!(parsed.version, "0.0.1");
        assert_eq!(parsed.api_version, crate::API_VERSION);
        assert!(parsed.is_candidate());
    }

    #[test]
    fn unmarked_manifest_is_not_a_candidate() {
        let parsed = PluginManifest::from_toml("name = \"ordinary-package\"\n").unwrap();
        assert!(!parsed.is_candidate());
    }

    #[test]
    fn unnamed_manifest_is_not_a_candidate() {
        let parsed = PluginManifest::from_toml("riptide_plugin = true\n").unwrap();
        assert!(!parsed.is_candidate());
    }
}
