//! Connection endpoint collaborator contract
//!
//! The transport (WebSocket, TCP, ...) lives outside the core. The core
//! assigns an inbound message sink during endpoint initialisation, forwards
//! client connect/disconnect notifications to the presence handler, and
//! closes the endpoint through the [`Dependency`] contract at shutdown.

use tokio::sync::{broadcast, mpsc};

use crate::dependency::Dependency;
use crate::message::{ConnectionHandle, Message};

/// Client-level notifications from a connection endpoint.
#[derive(Debug, Clone)]
pub enum EndpointEvent {
    ClientConnected(ConnectionHandle),
    ClientDisconnected(ConnectionHandle),
}

/// A connection endpoint. Readiness, runtime errors, and close completion
/// all flow through the [`Dependency`] event channel.
pub trait ConnectionEndpoint: Dependency {
    /// Assignment point for the inbound message sink. Called once during
    /// endpoint initialisation; messages sent before that are the
    /// endpoint's problem to buffer or drop.
    fn on_messages(&self, sink: mpsc::UnboundedSender<(ConnectionHandle, Message)>);

    /// Subscribe to client connect/disconnect notifications.
    fn connection_events(&self) -> broadcast::Receiver<EndpointEvent>;
}
