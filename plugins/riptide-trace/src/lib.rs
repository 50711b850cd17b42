//! riptide-trace: logs every message the server routes
//!
//! Registers a serial hook on each topic pipeline plus the startup event
//! and traces the payloads it sees. Topics listed in the plugin's
//! `drop_topics` option are vetoed after tracing, which makes the plugin
//! double as a crude per-topic kill switch.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use riptide_plugin_api::{
    Hook, HookBus, HookContext, Plugin, PluginError, PluginManifest, events, export_plugin,
};

#[derive(Debug, Default, Deserialize)]
struct TraceOptions {
    /// Topic names ("event", "rpc", "record", "presence") whose messages
    /// are dropped after tracing.
    #[serde(default)]
    drop_topics: HashSet<String>,
}

struct TraceHook {
    event_id: &'static str,
    drop: bool,
}

#[async_trait]
impl Hook for TraceHook {
    async fn invoke(&self, ctx: &HookContext) {
        tracing::info!(event = self.event_id, payload = %ctx.payload(), "trace");
        if self.drop {
            ctx.set_skip();
        }
    }
}

#[derive(Default)]
pub struct TracePlugin;

impl Plugin for TracePlugin {
    fn manifest(&self) -> PluginManifest {
        PluginManifest {
            name: "riptide-trace".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            riptide_plugin: true,
            description: "Traces every routed message and startup event".to_string(),
            ..Default::default()
        }
    }

    fn register(
        &self,
        bus: &dyn HookBus,
        options: Option<&serde_json::Value>,
    ) -> Result<(), PluginError> {
        let options: TraceOptions = match options {
            Some(value) => serde_json::from_value(value.clone())?,
            None => TraceOptions::default(),
        };

        for (topic, event_id) in [
            ("event", events::TOPIC_EVENT),
            ("rpc", events::TOPIC_RPC),
            ("record", events::TOPIC_RECORD),
            ("presence", events::TOPIC_PRESENCE),
        ] {
            bus.register(
                event_id,
                Arc::new(TraceHook {
                    event_id,
                    drop: options.drop_topics.contains(topic),
                }),
            );
        }
        bus.register(
            events::CORE_STARTED,
            Arc::new(TraceHook {
                event_id: events::CORE_STARTED,
                drop: false,
            }),
        );
        Ok(())
    }
}

export_plugin!(TracePlugin);

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingBus {
        registered: Mutex<Vec<(String, Arc<dyn Hook>)>>,
    }

    impl HookBus for RecordingBus {
        fn register(&self, event_id: &str, hook: Arc<dyn Hook>) {
            self.registered
                .lock()
                .unwrap()
                .push((event_id.to_string(), hook));
        }
    }

    #[test]
    fn registers_on_every_topic_and_the_startup_event() {
        let bus = RecordingBus::default();
        TracePlugin.register(&bus, None).unwrap();

        let registered = bus.registered.lock().unwrap();
        let ids: Vec<&str> = registered.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                events::TOPIC_EVENT,
                events::TOPIC_RPC,
                events::TOPIC_RECORD,
                events::TOPIC_PRESENCE,
                events::CORE_STARTED,
            ]
        );
    }

    #[tokio::test]
    async fn drop_topics_option_vetoes_those_pipelines_only() {
        let bus = RecordingBus::default();
        let options = serde_json::json!({ "drop_topics": ["rpc"] });
        TracePlugin.register(&bus, Some(&options)).unwrap();

        let registered = bus.registered.lock().unwrap();
        for (id, hook) in registered.iter() {
            let ctx = HookContext::empty();
            hook.invoke(&ctx).await;
            assert_eq!(ctx.skipped(), id == events::TOPIC_RPC, "event {id}");
        }
    }

    #[test]
    fn malformed_options_are_a_registration_error() {
        let bus = RecordingBus::default();
        let options = serde_json::json!({ "drop_topics": "not-a-list" });
        assert!(TracePlugin.register(&bus, Some(&options)).is_err());
    }

    #[test]
    fn manifest_matches_the_shipped_plugin_toml() {
        let manifest = TracePlugin.manifest();
        let shipped = PluginManifest::from_toml(include_str!("../plugin.toml")).unwrap();
        assert_eq!(manifest.name, shipped.name);
        assert_eq!(manifest.api_version, shipped.api_version);
        assert!(shipped.riptide_plugin);
    }
}
