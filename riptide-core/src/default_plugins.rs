//! Default collaborators for a bare single-node server
//!
//! Every configurable seam has a working default so `ServerOptions::new`
//! yields a startable server: a tracing-backed logger, an in-process cache,
//! no-op storage and message connector, a single-node cluster, and the
//! type-prefixed JSON codec.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;

use crate::dependency::{Dependency, DependencyEvent};
use crate::logger::{LogEvent, LogLevel, Logger};
use crate::message::{CodecError, MessageCodec};
use crate::services::ClusterRegistry;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Logger that forwards onto the `tracing` macros.
///
/// Ready from construction; close is acknowledged immediately since there
/// is nothing to flush.
pub struct TracingLogger {
    events: broadcast::Sender<DependencyEvent>,
}

impl TracingLogger {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { events }
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Dependency for TracingLogger {
    fn dependency_type(&self) -> &str {
        "logger"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn events(&self) -> broadcast::Receiver<DependencyEvent> {
        self.events.subscribe()
    }

    fn closeable(&self) -> bool {
        true
    }

    fn close(&self) {
        let _ = self.events.send(DependencyEvent::Closed);
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, event: LogEvent, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(event = %event, "{message}"),
            LogLevel::Info => tracing::info!(event = %event, "{message}"),
            LogLevel::Warn => tracing::warn!(event = %event, "{message}"),
            LogLevel::Error => tracing::error!(event = %event, "{message}"),
        }
    }
}

/// In-process cache plugin. Synchronous and always ready.
pub struct LocalCache {
    events: broadcast::Sender<DependencyEvent>,
    data: Mutex<HashMap<String, serde_json::Value>>,
}

impl LocalCache {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            events,
            data: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.lock().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.lock().insert(key.into(), value);
    }

    pub fn delete(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, serde_json::Value>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Dependency for LocalCache {
    fn dependency_type(&self) -> &str {
        "cache"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn events(&self) -> broadcast::Receiver<DependencyEvent> {
        self.events.subscribe()
    }
}

/// Storage plugin that stores nothing.
pub struct NoopStorage {
    events: broadcast::Sender<DependencyEvent>,
}

impl NoopStorage {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { events }
    }
}

impl Default for NoopStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Dependency for NoopStorage {
    fn dependency_type(&self) -> &str {
        "storage"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn events(&self) -> broadcast::Receiver<DependencyEvent> {
        self.events.subscribe()
    }
}

/// Message connector for a node with no peers.
pub struct NoopMessageConnector {
    events: broadcast::Sender<DependencyEvent>,
}

impl NoopMessageConnector {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { events }
    }
}

impl Default for NoopMessageConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Dependency for NoopMessageConnector {
    fn dependency_type(&self) -> &str {
        "message-connector"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn events(&self) -> broadcast::Receiver<DependencyEvent> {
        self.events.subscribe()
    }
}

/// Cluster registry for a node that is its own cluster.
pub struct SingleNodeCluster;

impl SingleNodeCluster {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SingleNodeCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterRegistry for SingleNodeCluster {
    fn leave_cluster(&self) {
        tracing::debug!("single-node cluster, nothing to leave");
    }
}

/// Type-prefixed string encoding for JSON values.
///
/// Strings, numbers, booleans, and null each get a single-character prefix;
/// objects and arrays are prefixed JSON. `U` (undefined) parses as null for
/// compatibility with clients that distinguish the two.
pub struct TypedJsonCodec;

impl MessageCodec for TypedJsonCodec {
    fn to_typed(&self, value: &serde_json::Value) -> String {
        match value {
            serde_json::Value::String(s) => format!("S{s}"),
            serde_json::Value::Number(n) => format!("N{n}"),
            serde_json::Value::Bool(true) => "T".to_string(),
            serde_json::Value::Bool(false) => "F".to_string(),
            serde_json::Value::Null => "L".to_string(),
            value @ (serde_json::Value::Object(_) | serde_json::Value::Array(_)) => {
                format!("O{value}")
            }
        }
    }

    fn convert_typed(&self, raw: &str) -> Result<serde_json::Value, CodecError> {
        let mut chars = raw.chars();
        let prefix = chars.next().ok_or(CodecError::Empty)?;
        let rest = chars.as_str();

        match prefix {
            'S' => Ok(serde_json::Value::String(rest.to_string())),
            'N' => {
                let number: f64 = rest
                    .parse()
                    .map_err(|_| CodecError::Number(rest.to_string()))?;
                serde_json::Number::from_f64(number)
                    .map(serde_json::Value::Number)
                    .ok_or_else(|| CodecError::Number(rest.to_string()))
            }
            'T' => Ok(serde_json::Value::Bool(true)),
            'F' => Ok(serde_json::Value::Bool(false)),
            'U' | 'L' => Ok(serde_json::Value::Null),
            'O' => Ok(serde_json::from_str(rest)?),
            other => Err(CodecError::UnknownPrefix(other)),
        }
    }
}
