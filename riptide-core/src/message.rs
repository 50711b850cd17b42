//! Message and topic types routed through the dispatcher
//!
//! The wire format itself lives in the connection endpoint; the core only
//! sees parsed messages with a topic, an action, and opaque data parts.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use riptide_plugin_api::events;

/// Coarse message category routed to a dedicated handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Event,
    Rpc,
    Record,
    Presence,
}

impl Topic {
    /// All routable topics, in registration order.
    pub const ALL: [Topic; 4] = [Topic::Event, Topic::Rpc, Topic::Record, Topic::Presence];

    /// The serial hook event id fired before this topic's handler.
    pub fn hook_event_id(self) -> &'static str {
        match self {
            Topic::Event => events::TOPIC_EVENT,
            Topic::Rpc => events::TOPIC_RPC,
            Topic::Record => events::TOPIC_RECORD,
            Topic::Presence => events::TOPIC_PRESENCE,
        }
    }
}

/// A parsed inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub topic: Topic,
    pub action: String,
    pub data: Vec<String>,
}

impl Message {
    pub fn new(topic: Topic, action: impl Into<String>, data: Vec<String>) -> Self {
        Self {
            topic,
            action: action.into(),
            data,
        }
    }
}

/// Identifies one client connection on a connection endpoint.
///
/// Cheap to clone; the auth data is what hooks get to see about the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub remote_address: Option<String>,
    pub user: Option<String>,
}

impl ConnectionHandle {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_address: None,
            user: None,
        }
    }

    pub fn with_user(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            ..Self::new()
        }
    }
}

impl Default for ConnectionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors from typed-value conversion.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Empty typed value")]
    Empty,

    #[error("Unknown type prefix `{0}`")]
    UnknownPrefix(char),

    #[error("Malformed number payload: {0}")]
    Number(String),

    #[error("Malformed object payload: {0}")]
    Object(#[from] serde_json::Error),
}

/// Typed-value conversion between JSON values and type-prefixed strings.
///
/// The core exposes this as two passthroughs on [`crate::Server`]; the
/// conversion rules belong entirely to the codec collaborator.
pub trait MessageCodec: Send + Sync {
    /// Render a JSON value as a type-prefixed string.
    fn to_typed(&self, value: &serde_json::Value) -> String;

    /// Parse a type-prefixed string back into a JSON value.
    fn convert_typed(&self, raw: &str) -> Result<serde_json::Value, CodecError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_topic_has_a_hook_event_id() {
        let ids: Vec<_> = Topic::ALL.iter().map(|t| t.hook_event_id()).collect();
        assert_eq!(ids.len(), 4);
        for id in &ids {
            assert!(id.starts_with("rt:"));
        }
    }

    #[test]
    fn topic_serializes_snake_case() {
        let json = serde_json::to_string(&Topic::Rpc).unwrap();
        assert_eq!(json, "\"rpc\"");
    }

    #[test]
    fn connection_handles_are_unique() {
        assert_ne!(ConnectionHandle::new().id, ConnectionHandle::new().id);
    }
}
