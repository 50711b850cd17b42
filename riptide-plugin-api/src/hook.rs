//! Hook types shared between the server and its plugins
//!
//! A hook is a plugin-supplied handler invoked when a named event fires on
//! the server's hook bus. Serial events run hooks one at a time in
//! registration order; parallel events run them concurrently and join.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

/// Per-invocation context handed to every hook for one event emission.
///
/// The payload is immutable; the skip flag is the one piece of state a hook
/// may set. For topic-scoped events, a set skip flag suppresses the topic
/// handler for that message.
#[derive(Debug)]
pub struct HookContext {
    payload: serde_json::Value,
    skip: AtomicBool,
}

impl HookContext {
    /// Create a context around an event payload.
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            skip: AtomicBool::new(false),
        }
    }

    /// Context with no payload, for events that carry none.
    pub fn empty() -> Self {
        Self::new(serde_json::Value::Null)
    }

    /// The event payload.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Mark the message as skipped. Once set the flag cannot be cleared.
    pub fn set_skip(&self) {
        self.skip.store(true, Ordering::SeqCst);
    }

    /// Whether any hook requested the message be skipped.
    pub fn skipped(&self) -> bool {
        self.skip.load(Ordering::SeqCst)
    }
}

/// A plugin-supplied event handler.
///
/// Completion is signaled by the future resolving; a hook that never
/// resolves stalls its event's pipeline (trusted-code contract, no timeout
/// is imposed by the host).
#[async_trait]
pub trait Hook: Send + Sync {
    async fn invoke(&self, ctx: &HookContext);
}

/// Registration surface of the server's hook host.
///
/// Registrations are permanent: hooks cannot be unregistered. Hooks for one
/// event id are invoked in registration order for serial emissions.
pub trait HookBus: Send + Sync {
    fn register(&self, event_id: &str, hook: Arc<dyn Hook>);
}
