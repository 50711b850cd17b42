//! Hook host: the named-event emitter plugins register against
//!
//! Two dispatch strategies over one registry: serial (registration order,
//! each hook completes before the next starts) and parallel (all hooks run
//! concurrently, completion is joined). A disabled host - no plugin loader
//! configured - short-circuits both without touching the registry.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::join_all;

use riptide_plugin_api::{Hook, HookBus, HookContext};

/// Owns every hook registration for the lifetime of one server run.
///
/// Hooks cannot be unregistered. Neither dispatch strategy imposes a
/// timeout: a hook that never resolves stalls its event's pipeline, which
/// is the accepted trusted-plugin trade-off at this layer.
pub struct HookHost {
    enabled: bool,
    hooks: RwLock<HashMap<String, Vec<Arc<dyn Hook>>>>,
}

impl HookHost {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            hooks: RwLock::new(HashMap::new()),
        }
    }

    /// A host with the no-op fast path permanently engaged.
    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of hooks registered for one event id.
    pub fn hook_count(&self, event_id: &str) -> usize {
        self.read_hooks(event_id).len()
    }

    /// Invoke every hook for `event_id` one at a time, in registration
    /// order. Returns once the last hook completed. Zero registered hooks,
    /// or a disabled host, return immediately.
    pub async fn emit_serial(&self, event_id: &str, ctx: &HookContext) {
        if !self.enabled {
            return;
        }
        for hook in self.read_hooks(event_id) {
            hook.invoke(ctx).await;
        }
    }

    /// Invoke every hook for `event_id` concurrently and join. Completion
    /// order among hooks is irrelevant; returns once all resolved.
    pub async fn emit_parallel(&self, event_id: &str, ctx: &HookContext) {
        if !self.enabled {
            return;
        }
        let hooks = self.read_hooks(event_id);
        join_all(hooks.iter().map(|hook| hook.invoke(ctx))).await;
    }

    // Clone the handler list and drop the guard before any await.
    fn read_hooks(&self, event_id: &str) -> Vec<Arc<dyn Hook>> {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl HookBus for HookHost {
    fn register(&self, event_id: &str, hook: Arc<dyn Hook>) {
        if !self.enabled {
            return;
        }
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_id.to_string())
            .or_default()
            .push(hook);
    }
}
